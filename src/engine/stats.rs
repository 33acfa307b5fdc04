// src/engine/stats.rs

/// Running counters kept by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    /// Ticks skipped because the network gate said no.
    pub gated_ticks: u64,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub restricted: u64,
    pub repairs: u64,
}

// src/network/gate.rs

//! Cached, single-flight network location verdicts.
//!
//! `check` never blocks longer than the cheap lookups unless the caller
//! explicitly asks for the secondary probe. In background mode the route
//! trace runs on a spawned task and its verdict is merged into the cache
//! when it lands; the next `check` sees it.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::NetworkSection;
use crate::errors::Result;
use crate::network::probe::RouteProber;
use crate::network::range::PrivilegedRange;
use crate::network::system::NetworkEnvironment;

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Which check produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    /// Gating is switched off; everything is allowed.
    Disabled,
    LocalAddress,
    Gateway,
    SecondHop,
    /// The checks were inconclusive; this is the last verified verdict
    /// (or "not privileged" if there has never been one).
    Fallback,
}

/// Answer to "may actions run from here?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateVerdict {
    pub privileged: bool,
    pub address: Option<Ipv4Addr>,
    pub probe_info: Option<String>,
    pub source: VerdictSource,
    pub checked_at: NaiveDateTime,
    /// Served from cache without running any lookup.
    pub cached: bool,
}

impl fmt::Display for GateVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.privileged { "privileged" } else { "outside" };
        write!(f, "{state} via {:?}", self.source)?;
        if let Some(addr) = self.address {
            write!(f, " ({addr})")?;
        }
        if let Some(info) = &self.probe_info {
            write!(f, " [{info}]")?;
        }
        Ok(())
    }
}

/// Change between two verified verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecamePrivileged,
    LostPrivilege,
}

#[derive(Debug, Default)]
struct GateState {
    cache: Option<GateVerdict>,
    last_verified: Option<GateVerdict>,
    pending_transition: Option<Transition>,
}

struct GateInner {
    settings: NetworkSection,
    ranges: Vec<PrivilegedRange>,
    env: Arc<dyn NetworkEnvironment>,
    prober: Arc<dyn RouteProber>,
    clock: SharedClock,
    state: Mutex<GateState>,
    /// Held for the duration of one check cycle.
    cycle: tokio::sync::Mutex<()>,
    /// Background route trace, if one is in flight.
    probe_task: Mutex<Option<JoinHandle<()>>>,
}

/// Shared handle; clones observe the same cache.
#[derive(Clone)]
pub struct NetworkGate {
    inner: Arc<GateInner>,
}

impl fmt::Debug for NetworkGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkGate")
            .field("ranges", &self.inner.ranges)
            .field("enabled", &self.inner.settings.enabled)
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl NetworkGate {
    pub fn new(
        settings: NetworkSection,
        env: Arc<dyn NetworkEnvironment>,
        prober: Arc<dyn RouteProber>,
        clock: SharedClock,
    ) -> Result<Self> {
        let ranges = PrivilegedRange::parse_all(&settings.privileged_ranges)?;
        Ok(Self {
            inner: Arc::new(GateInner {
                settings,
                ranges,
                env,
                prober,
                clock,
                state: Mutex::new(GateState::default()),
                cycle: tokio::sync::Mutex::new(()),
                probe_task: Mutex::new(None),
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.settings.enabled
    }

    /// Current verdict.
    ///
    /// With `require_secondary` the route trace (if enabled and needed)
    /// runs inline, bounded by the probe timeout. Without it, the trace is
    /// started in the background and the best known verdict is returned.
    pub async fn check(&self, require_secondary: bool) -> GateVerdict {
        let inner = &self.inner;
        let now = inner.clock.now();

        if !inner.settings.enabled {
            return GateVerdict {
                privileged: true,
                address: None,
                probe_info: None,
                source: VerdictSource::Disabled,
                checked_at: now,
                cached: false,
            };
        }

        if let Some(hit) = self.fresh_cache(now) {
            return hit;
        }

        // Someone else is mid-cycle: take what is known instead of queueing.
        let Ok(_cycle) = inner.cycle.try_lock() else {
            debug!("network check already running; serving best known verdict");
            return self.best_known(now);
        };

        // Re-check: the previous cycle may have filled the cache.
        if let Some(hit) = self.fresh_cache(now) {
            return hit;
        }

        let local = inner.env.local_address().await;
        if let Some(addr) = local {
            if PrivilegedRange::any_contains(&inner.ranges, addr) {
                return inner.record_verified(GateVerdict {
                    privileged: true,
                    address: Some(addr),
                    probe_info: None,
                    source: VerdictSource::LocalAddress,
                    checked_at: now,
                    cached: false,
                });
            }
        }

        if !inner.settings.secondary_probe {
            return match local {
                Some(addr) => inner.record_verified(GateVerdict {
                    privileged: false,
                    address: Some(addr),
                    probe_info: None,
                    source: VerdictSource::LocalAddress,
                    checked_at: now,
                    cached: false,
                }),
                None => inner.fallback(now, None, Some("local address unknown".into())),
            };
        }

        let gateway = inner.env.default_gateway().await;
        if let Some(gw) = gateway {
            if PrivilegedRange::any_contains(&inner.ranges, gw) {
                return inner.record_verified(GateVerdict {
                    privileged: true,
                    address: local,
                    probe_info: Some(format!("gateway {gw}")),
                    source: VerdictSource::Gateway,
                    checked_at: now,
                    cached: false,
                });
            }
        }

        if require_secondary {
            let hop = inner.run_probe().await;
            return inner.merge_probe(hop, local, gateway);
        }

        self.spawn_background_probe(local, gateway);

        // Provisional answer until the trace lands; not cached so the next
        // tick picks up the background verdict.
        match lock(&inner.state).last_verified.clone() {
            Some(mut last) => {
                last.cached = true;
                last
            }
            None => GateVerdict {
                privileged: false,
                address: local,
                probe_info: gateway.map(|gw| format!("gateway {gw}; route trace pending")),
                source: VerdictSource::Fallback,
                checked_at: now,
                cached: false,
            },
        }
    }

    /// Drop the cache and run a full check including the route trace.
    ///
    /// A background trace still in flight is stopped first so only one
    /// trace runs at a time.
    pub async fn refresh(&self) -> GateVerdict {
        self.stop_background_probe().await;
        lock(&self.inner.state).cache = None;
        self.check(true).await
    }

    /// Transition recorded since the last call, if any.
    ///
    /// The first verified verdict only establishes a baseline.
    pub fn take_transition(&self) -> Option<Transition> {
        lock(&self.inner.state).pending_transition.take()
    }

    /// Whether a background route trace is still running.
    pub fn probe_in_flight(&self) -> bool {
        lock(&self.inner.probe_task)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Wait for an in-flight background trace to finish.
    pub async fn settle(&self) {
        let handle = lock(&self.inner.probe_task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Abort any in-flight trace and wait (bounded) for it to unwind. The
    /// child process is killed when its future is dropped.
    pub async fn shutdown(&self) {
        self.stop_background_probe().await;
    }

    async fn stop_background_probe(&self) {
        let handle = lock(&self.inner.probe_task).take();
        if let Some(handle) = handle {
            handle.abort();
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await.is_err() {
                warn!("route trace did not stop within {SHUTDOWN_JOIN_TIMEOUT:?}");
            }
        }
    }

    fn fresh_cache(&self, now: NaiveDateTime) -> Option<GateVerdict> {
        let state = lock(&self.inner.state);
        let cached = state.cache.as_ref()?;
        if now - cached.checked_at < self.inner.settings.cache_ttl() {
            let mut hit = cached.clone();
            hit.cached = true;
            Some(hit)
        } else {
            None
        }
    }

    fn best_known(&self, now: NaiveDateTime) -> GateVerdict {
        let state = lock(&self.inner.state);
        match state.cache.clone().or_else(|| state.last_verified.clone()) {
            Some(mut v) => {
                v.cached = true;
                v
            }
            None => GateVerdict {
                privileged: false,
                address: None,
                probe_info: Some("check in progress".into()),
                source: VerdictSource::Fallback,
                checked_at: now,
                cached: false,
            },
        }
    }

    fn spawn_background_probe(&self, local: Option<Ipv4Addr>, gateway: Option<Ipv4Addr>) {
        let mut slot = lock(&self.inner.probe_task);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("route trace already in flight");
            return;
        }

        let inner = self.inner.clone();
        *slot = Some(tokio::spawn(async move {
            let hop = inner.run_probe().await;
            let verdict = inner.merge_probe(hop, local, gateway);
            debug!(%verdict, "background route trace finished");
        }));
    }
}

impl GateInner {
    async fn run_probe(&self) -> Option<Ipv4Addr> {
        let timeout = self.settings.probe_timeout();
        let anchor = self.settings.anchor_host.as_str();
        match tokio::time::timeout(timeout, self.prober.second_hop(anchor, timeout)).await {
            Ok(Ok(hop)) => hop,
            Ok(Err(err)) => {
                debug!(error = %err, "route trace failed");
                None
            }
            Err(_) => {
                debug!(?timeout, "route trace timed out");
                None
            }
        }
    }

    fn merge_probe(
        &self,
        hop: Option<Ipv4Addr>,
        local: Option<Ipv4Addr>,
        gateway: Option<Ipv4Addr>,
    ) -> GateVerdict {
        let now = self.clock.now();
        let gw_info = gateway.map(|gw| format!("gateway {gw}; "));
        match hop {
            Some(hop) => self.record_verified(GateVerdict {
                privileged: PrivilegedRange::any_contains(&self.ranges, hop),
                address: local,
                probe_info: Some(format!("{}hop2 {hop}", gw_info.unwrap_or_default())),
                source: VerdictSource::SecondHop,
                checked_at: now,
                cached: false,
            }),
            None => self.fallback(
                now,
                local,
                Some(format!("{}hop2 unknown", gw_info.unwrap_or_default())),
            ),
        }
    }

    fn record_verified(&self, verdict: GateVerdict) -> GateVerdict {
        let mut state = lock(&self.state);
        if let Some(prev) = &state.last_verified {
            if prev.privileged != verdict.privileged {
                let transition = if verdict.privileged {
                    Transition::BecamePrivileged
                } else {
                    Transition::LostPrivilege
                };
                info!(?transition, %verdict, "network location changed");
                state.pending_transition = Some(transition);
            }
        }
        state.last_verified = Some(verdict.clone());
        state.cache = Some(verdict.clone());
        verdict
    }

    /// Inconclusive cycle: reuse the last verified verdict. The result is
    /// cached so an unreachable probe is not retried every tick.
    fn fallback(
        &self,
        now: NaiveDateTime,
        address: Option<Ipv4Addr>,
        probe_info: Option<String>,
    ) -> GateVerdict {
        let mut state = lock(&self.state);
        let privileged = state
            .last_verified
            .as_ref()
            .is_some_and(|v| v.privileged);
        let verdict = GateVerdict {
            privileged,
            address: address.or_else(|| state.last_verified.as_ref().and_then(|v| v.address)),
            probe_info,
            source: VerdictSource::Fallback,
            checked_at: now,
            cached: false,
        };
        state.cache = Some(verdict.clone());
        verdict
    }
}

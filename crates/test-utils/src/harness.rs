#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::NaiveDateTime;
use punchclock::auth::AuthSession;
use punchclock::clock::{ManualClock, SharedClock};
use punchclock::config::Settings;
use punchclock::engine::{Scheduler, SharedSink};
use punchclock::exec::ActionExecutor;
use punchclock::network::NetworkGate;

use crate::fakes::{FakeNetwork, FakePortal, FakeProber, RecordingSink};

/// Address inside the default privileged range.
pub const INSIDE: Ipv4Addr = Ipv4Addr::new(163, 23, 1, 10);
/// Typical home NAT address.
pub const OUTSIDE: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);

/// All fakes plus the pieces built on them.
pub struct Fakes {
    pub clock: ManualClock,
    pub portal: FakePortal,
    pub network: FakeNetwork,
    pub prober: FakeProber,
    pub sink: RecordingSink,
}

impl Fakes {
    /// Inside the privileged network, portal answering success.
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            clock: ManualClock::new(start),
            portal: FakePortal::new(),
            network: FakeNetwork::new(Some(INSIDE), None),
            prober: FakeProber::new(None),
            sink: RecordingSink::default(),
        }
    }

    pub fn shared_clock(&self) -> SharedClock {
        Arc::new(self.clock.clone())
    }

    pub fn shared_sink(&self) -> SharedSink {
        Arc::new(self.sink.clone())
    }

    pub fn session(&self, settings: &Settings) -> AuthSession<FakePortal> {
        AuthSession::new(
            self.portal.clone(),
            settings.portal.clone(),
            settings.session.clone(),
            self.shared_clock(),
            self.shared_sink(),
        )
        .expect("session")
    }

    pub fn executor(&self, settings: &Settings) -> ActionExecutor {
        ActionExecutor::new(settings, self.shared_clock(), self.shared_sink())
    }

    pub fn gate(&self, settings: &Settings) -> NetworkGate {
        NetworkGate::new(
            settings.network.clone(),
            Arc::new(self.network.clone()),
            Arc::new(self.prober.clone()),
            self.shared_clock(),
        )
        .expect("gate")
    }

    pub fn scheduler(&self, settings: &Settings) -> Scheduler<FakePortal> {
        Scheduler::new(
            settings.clone(),
            self.session(settings),
            self.executor(settings),
            self.gate(settings),
            self.shared_clock(),
            self.shared_sink(),
        )
    }
}

// tests/network_gate.rs

mod common;
use crate::common::builders::SettingsBuilder;
use crate::common::harness::{Fakes, INSIDE, OUTSIDE};
use crate::common::{at, init_tracing, with_timeout};

use std::net::Ipv4Addr;
use std::time::Duration;

use punchclock::network::probe::parse_second_hop;
use punchclock::network::system::{parse_gateway_output, parse_proc_route};
use punchclock::network::{Transition, VerdictSource};

const HOP_INSIDE: Ipv4Addr = Ipv4Addr::new(163, 23, 254, 1);
const HOP_OUTSIDE: Ipv4Addr = Ipv4Addr::new(10, 20, 0, 1);

#[tokio::test]
async fn test_privileged_local_address_skips_probe() {
    init_tracing();
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().secondary_probe(true).build();
    let gate = fakes.gate(&settings);

    let verdict = gate.check(true).await;
    assert!(verdict.privileged);
    assert_eq!(verdict.source, VerdictSource::LocalAddress);
    assert_eq!(verdict.address, Some(INSIDE));
    assert_eq!(fakes.prober.calls(), 0);
    assert_eq!(fakes.network.gateway_lookups(), 0);
}

#[tokio::test]
async fn test_outside_without_secondary_probe_is_not_privileged() {
    let fakes = Fakes::new(at("09:00"));
    fakes.network.set_local(Some(OUTSIDE));
    let gate = fakes.gate(&SettingsBuilder::new().build());

    let verdict = gate.check(true).await;
    assert!(!verdict.privileged);
    assert_eq!(verdict.source, VerdictSource::LocalAddress);
    assert_eq!(fakes.prober.calls(), 0);
}

#[tokio::test]
async fn test_disabled_gate_allows_everything_without_lookups() {
    let fakes = Fakes::new(at("09:00"));
    fakes.network.set_local(Some(OUTSIDE));
    let gate = fakes.gate(&SettingsBuilder::new().network_gate(false).build());

    let verdict = gate.check(false).await;
    assert!(verdict.privileged);
    assert_eq!(verdict.source, VerdictSource::Disabled);
    assert!(!gate.is_enabled());
    assert_eq!(fakes.network.local_lookups(), 0);
}

#[tokio::test]
async fn test_verdict_is_cached_for_ttl() {
    let fakes = Fakes::new(at("09:00"));
    let gate = fakes.gate(&SettingsBuilder::new().cache_ttl_secs(60).build());

    let first = gate.check(false).await;
    assert!(!first.cached);

    fakes.clock.advance(chrono::Duration::seconds(30));
    let second = gate.check(false).await;
    assert!(second.cached);
    assert!(second.privileged);
    assert_eq!(fakes.network.local_lookups(), 1);

    fakes.clock.advance(chrono::Duration::seconds(31));
    let third = gate.check(false).await;
    assert!(!third.cached);
    assert_eq!(fakes.network.local_lookups(), 2);
}

#[tokio::test]
async fn test_privileged_gateway_avoids_route_trace() {
    let fakes = Fakes::new(at("09:00"));
    fakes.network.set_local(Some(OUTSIDE));
    fakes.network.set_gateway(Some(Ipv4Addr::new(163, 23, 1, 1)));
    let gate = fakes.gate(&SettingsBuilder::new().secondary_probe(true).build());

    let verdict = gate.check(true).await;
    assert!(verdict.privileged);
    assert_eq!(verdict.source, VerdictSource::Gateway);
    assert_eq!(fakes.prober.calls(), 0);
}

#[tokio::test]
async fn test_inline_probe_uses_second_hop() {
    let fakes = Fakes::new(at("09:00"));
    fakes.network.set_local(Some(OUTSIDE));
    fakes.network.set_gateway(Some(Ipv4Addr::new(192, 168, 1, 1)));
    fakes.prober.set_hop(Some(HOP_INSIDE));
    let gate = fakes.gate(&SettingsBuilder::new().secondary_probe(true).build());

    let verdict = gate.check(true).await;
    assert!(verdict.privileged);
    assert_eq!(verdict.source, VerdictSource::SecondHop);
    assert!(verdict.probe_info.unwrap().contains("163.23.254.1"));
    assert_eq!(fakes.prober.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_probe_timeout_falls_back_to_last_verdict() {
    init_tracing();
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new()
        .secondary_probe(true)
        .probe_timeout_secs(3)
        .build();
    let gate = fakes.gate(&settings);

    // Establish a verified "privileged" verdict first.
    assert!(gate.check(true).await.privileged);

    fakes.network.set_local(Some(OUTSIDE));
    fakes.prober.set_hop(Some(HOP_OUTSIDE));
    fakes.prober.set_delay(Some(Duration::from_secs(30)));
    fakes.clock.advance(chrono::Duration::minutes(5));

    let started = tokio::time::Instant::now();
    let verdict = with_timeout(gate.refresh()).await;
    assert!(started.elapsed() <= Duration::from_secs(4));

    assert!(verdict.privileged, "unknown result keeps last verified verdict");
    assert_eq!(verdict.source, VerdictSource::Fallback);
    assert_eq!(gate.take_transition(), None);
}

#[tokio::test]
async fn test_probe_failure_without_history_is_not_privileged() {
    let fakes = Fakes::new(at("09:00"));
    fakes.network.set_local(Some(OUTSIDE));
    fakes.prober.set_fail(true);
    let gate = fakes.gate(&SettingsBuilder::new().secondary_probe(true).build());

    let verdict = gate.check(true).await;
    assert!(!verdict.privileged);
    assert_eq!(verdict.source, VerdictSource::Fallback);

    // Fallback verdicts are cached, so the next tick does not re-probe.
    let again = gate.check(true).await;
    assert!(again.cached);
    assert_eq!(fakes.prober.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_probe_merges_into_next_check() {
    let fakes = Fakes::new(at("09:00"));
    fakes.network.set_local(Some(OUTSIDE));
    fakes.prober.set_hop(Some(HOP_INSIDE));
    fakes.prober.set_delay(Some(Duration::from_millis(500)));
    let gate = fakes.gate(&SettingsBuilder::new().secondary_probe(true).build());

    let provisional = gate.check(false).await;
    assert!(!provisional.privileged);
    assert_eq!(provisional.source, VerdictSource::Fallback);
    assert!(gate.probe_in_flight());

    with_timeout(gate.settle()).await;
    assert!(!gate.probe_in_flight());

    let merged = gate.check(false).await;
    assert!(merged.privileged);
    assert!(merged.cached);
    assert_eq!(merged.source, VerdictSource::SecondHop);
    // The first verified verdict is a baseline, not a transition.
    assert_eq!(gate.take_transition(), None);
}

#[tokio::test(start_paused = true)]
async fn test_background_probe_is_single_flight() {
    let fakes = Fakes::new(at("09:00"));
    fakes.network.set_local(Some(OUTSIDE));
    fakes.prober.set_hop(Some(HOP_OUTSIDE));
    fakes.prober.set_delay(Some(Duration::from_secs(2)));
    let gate = fakes.gate(&SettingsBuilder::new().secondary_probe(true).build());

    for _ in 0..5 {
        let verdict = gate.check(false).await;
        assert!(!verdict.privileged);
    }
    with_timeout(gate.settle()).await;

    assert_eq!(fakes.prober.calls(), 1);
}

#[tokio::test]
async fn test_transitions_are_reported_once() {
    let fakes = Fakes::new(at("09:00"));
    let gate = fakes.gate(&SettingsBuilder::new().cache_ttl_secs(0).build());

    assert!(gate.check(false).await.privileged);
    assert_eq!(gate.take_transition(), None);

    fakes.network.set_local(Some(OUTSIDE));
    fakes.clock.advance(chrono::Duration::seconds(1));
    assert!(!gate.check(false).await.privileged);
    assert_eq!(gate.take_transition(), Some(Transition::LostPrivilege));
    assert_eq!(gate.take_transition(), None);

    fakes.network.set_local(Some(INSIDE));
    fakes.clock.advance(chrono::Duration::seconds(1));
    assert!(gate.check(false).await.privileged);
    assert_eq!(gate.take_transition(), Some(Transition::BecamePrivileged));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_replaces_background_probe() {
    let fakes = Fakes::new(at("09:00"));
    fakes.network.set_local(Some(OUTSIDE));
    fakes.prober.set_hop(Some(HOP_INSIDE));
    fakes.prober.set_delay(Some(Duration::from_secs(2)));
    let gate = fakes.gate(
        &SettingsBuilder::new()
            .secondary_probe(true)
            .probe_timeout_secs(5)
            .build(),
    );

    gate.check(false).await;
    assert!(gate.probe_in_flight());

    let verdict = with_timeout(gate.refresh()).await;
    assert!(verdict.privileged);
    assert_eq!(verdict.source, VerdictSource::SecondHop);
    assert!(!gate.probe_in_flight());
    // One background trace (stopped) plus the inline one.
    assert_eq!(fakes.prober.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_in_flight_probe() {
    let fakes = Fakes::new(at("09:00"));
    fakes.network.set_local(Some(OUTSIDE));
    fakes.prober.set_delay(Some(Duration::from_secs(600)));
    let gate = fakes.gate(
        &SettingsBuilder::new()
            .secondary_probe(true)
            .probe_timeout_secs(10)
            .build(),
    );

    gate.check(false).await;
    assert!(gate.probe_in_flight());

    with_timeout(gate.shutdown()).await;
    assert!(!gate.probe_in_flight());
}

#[test]
fn test_parse_second_hop_from_traceroute_and_tracert() {
    let traceroute = "traceroute to 8.8.8.8 (8.8.8.8), 2 hops max, 60 byte packets\n \
                      1  192.168.1.1  0.512 ms\n \
                      2  163.23.254.1  3.100 ms\n";
    assert_eq!(parse_second_hop(traceroute), Some(HOP_INSIDE));

    let tracert = "Tracing route to 8.8.8.8 over a maximum of 2 hops\r\n\r\n  \
                   1    <1 ms    <1 ms    <1 ms  192.168.1.1\r\n  \
                   2     3 ms     2 ms     3 ms  163.23.254.1\r\n";
    assert_eq!(parse_second_hop(tracert), Some(HOP_INSIDE));

    let silent = " 1  192.168.1.1  0.5 ms\n 2  *\n";
    assert_eq!(parse_second_hop(silent), None);
}

#[test]
fn test_parse_gateway_sources() {
    let proc_route = "Iface\tDestination\tGateway \tFlags\n\
                      eth0\t0000A8C0\t00000000\t0001\n\
                      eth0\t00000000\t0101A8C0\t0003\n";
    assert_eq!(parse_proc_route(proc_route), Some(Ipv4Addr::new(192, 168, 1, 1)));

    assert_eq!(
        parse_gateway_output("default via 10.0.0.1 dev wlan0 proto dhcp metric 600"),
        Some(Ipv4Addr::new(10, 0, 0, 1))
    );
    assert_eq!(
        parse_gateway_output("   route to: default\n    gateway: 172.16.0.1\n"),
        Some(Ipv4Addr::new(172, 16, 0, 1))
    );
    assert_eq!(
        parse_gateway_output("          0.0.0.0          0.0.0.0      192.168.0.1    192.168.0.5     25"),
        Some(Ipv4Addr::new(192, 168, 0, 1))
    );
    assert_eq!(parse_gateway_output("no routes"), None);
}

// src/network/probe.rs

//! Route-trace prober.
//!
//! The second hop towards an external host is usually the campus or ISP
//! edge router, which is a good signal when the local address is NATed.

use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{PunchclockError, Result};
use crate::types::BoxFuture;

/// Narrow seam over the route trace.
///
/// `Ok(Some(addr))` is a definitive second hop. `Ok(None)` (hop did not
/// answer) and `Err` (timeout, missing tool) both mean "unknown".
/// Implementations must give up after `timeout`.
pub trait RouteProber: Send + Sync {
    fn second_hop<'a>(
        &'a self,
        anchor: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Option<Ipv4Addr>>>;
}

/// Runs `traceroute` (`tracert` on Windows) limited to two hops.
#[derive(Debug, Clone, Default)]
pub struct TracerouteProber;

impl TracerouteProber {
    fn command(anchor: &str, timeout: Duration) -> Command {
        let wait = timeout.as_secs().max(1).to_string();
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("tracert");
            let wait_ms = (timeout.as_millis().max(1000)).to_string();
            c.args(["-d", "-h", "2", "-w", &wait_ms, anchor]);
            c
        } else {
            let mut c = Command::new("traceroute");
            c.args(["-n", "-m", "2", "-q", "1", "-w", &wait, anchor]);
            c
        };
        // Dropping the future (timeout, abort on shutdown) kills the child.
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl RouteProber for TracerouteProber {
    fn second_hop<'a>(
        &'a self,
        anchor: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Option<Ipv4Addr>>> {
        Box::pin(async move {
            let mut cmd = Self::command(anchor, timeout);
            debug!(%anchor, ?timeout, "tracing route");

            let output = match tokio::time::timeout(timeout, cmd.output()).await {
                Ok(result) => result.map_err(|e| {
                    PunchclockError::ProbeError(format!("spawning route trace: {e}"))
                })?,
                Err(_) => {
                    return Err(PunchclockError::ProbeError(format!(
                        "route trace timed out after {timeout:?}"
                    )));
                }
            };

            Ok(parse_second_hop(&String::from_utf8_lossy(&output.stdout)))
        })
    }
}

/// Address on the hop-2 line of traceroute/tracert output.
pub fn parse_second_hop(output: &str) -> Option<Ipv4Addr> {
    static IPV4: OnceLock<Option<Regex>> = OnceLock::new();
    let re = IPV4
        .get_or_init(|| Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3})\b").ok())
        .as_ref()?;

    output
        .lines()
        .map(str::trim_start)
        .find(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|hop| hop == "2")
        })
        .and_then(|line| {
            // Skip the hop number itself before looking for the address.
            let rest = line.split_once(char::is_whitespace)?.1;
            re.captures(rest)?.get(1)?.as_str().parse().ok()
        })
}

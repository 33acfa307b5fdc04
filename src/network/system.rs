// src/network/system.rs

//! Cheap network facts: which local address routes outward, and which
//! router is the default gateway.

use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::net::UdpSocket;
use tokio::process::Command;
use tracing::debug;

use crate::types::BoxFuture;

/// Source of local network facts. Both lookups are best effort: `None`
/// means "could not tell", never "not privileged".
pub trait NetworkEnvironment: Send + Sync {
    fn local_address(&self) -> BoxFuture<'_, Option<Ipv4Addr>>;
    fn default_gateway(&self) -> BoxFuture<'_, Option<Ipv4Addr>>;
}

/// Production implementation backed by the host's routing table.
#[derive(Debug, Clone)]
pub struct SystemNetwork {
    anchor: String,
    command_timeout: Duration,
}

impl SystemNetwork {
    pub fn new(anchor: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
            command_timeout: Duration::from_secs(2),
        }
    }
}

impl NetworkEnvironment for SystemNetwork {
    /// "Connecting" a UDP socket sends nothing; it only asks the kernel
    /// which source address it would use for the anchor host.
    fn local_address(&self) -> BoxFuture<'_, Option<Ipv4Addr>> {
        Box::pin(async move {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
            if let Err(err) = socket.connect((self.anchor.as_str(), 80)).await {
                debug!(error = %err, "could not resolve a route to the anchor host");
                return None;
            }
            match socket.local_addr().ok()?.ip() {
                std::net::IpAddr::V4(v4) if !v4.is_unspecified() => Some(v4),
                _ => None,
            }
        })
    }

    fn default_gateway(&self) -> BoxFuture<'_, Option<Ipv4Addr>> {
        Box::pin(async move {
            if cfg!(target_os = "linux") {
                if let Ok(table) = tokio::fs::read_to_string("/proc/net/route").await {
                    if let Some(gw) = parse_proc_route(&table) {
                        return Some(gw);
                    }
                }
            }

            let (program, args): (&str, &[&str]) = if cfg!(windows) {
                ("route", &["print", "0.0.0.0"])
            } else if cfg!(target_os = "macos") {
                ("route", &["-n", "get", "default"])
            } else {
                ("ip", &["route", "show", "default"])
            };

            let mut cmd = Command::new(program);
            cmd.args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true);

            let output = tokio::time::timeout(self.command_timeout, cmd.output())
                .await
                .ok()?
                .ok()?;
            parse_gateway_output(&String::from_utf8_lossy(&output.stdout))
        })
    }
}

/// Default route from `/proc/net/route` (hex, little-endian columns).
pub fn parse_proc_route(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 3 || cols[1] != "00000000" {
            return None;
        }
        let raw = u32::from_str_radix(cols[2], 16).ok()?;
        let gw = Ipv4Addr::from(raw.to_le_bytes());
        (!gw.is_unspecified()).then_some(gw)
    })
}

/// Gateway address from `ip route`, `route -n get default` or `route print`.
pub fn parse_gateway_output(output: &str) -> Option<Ipv4Addr> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"default via (\d{1,3}(?:\.\d{1,3}){3})",
            r"gateway:\s*(\d{1,3}(?:\.\d{1,3}){3})",
            r"0\.0\.0\.0\s+0\.0\.0\.0\s+(\d{1,3}(?:\.\d{1,3}){3})",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    });

    patterns.iter().find_map(|re| {
        re.captures(output)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

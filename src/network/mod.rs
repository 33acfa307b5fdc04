// src/network/mod.rs

//! Network location gating.
//!
//! The portal only accepts actions from inside a privileged address range.
//! [`NetworkGate`] answers "are we inside right now?" using, in order of
//! cost: the local interface address, the default gateway, and the second
//! hop of a route trace towards an external anchor host.
//!
//! - [`range`]: CIDR matching for the privileged ranges.
//! - [`system`]: local address and gateway discovery.
//! - [`probe`]: the route-trace prober (spawns `traceroute`/`tracert`).
//! - [`gate`]: caching, single-flight and background probing.

pub mod gate;
pub mod probe;
pub mod range;
pub mod system;

pub use gate::{GateVerdict, NetworkGate, Transition, VerdictSource};
pub use probe::{RouteProber, TracerouteProber};
pub use range::PrivilegedRange;
pub use system::{NetworkEnvironment, SystemNetwork};

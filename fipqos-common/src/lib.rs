#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Types shared by the fipqos crates: QoS policies and their rules, routers and the floating IPs
//! attached to them.

use std::fmt;

use serde::{Deserialize, Serialize};

mod policy;
mod router;

pub use policy::*;
pub use router::*;

/// Identifier of a QoS policy.
pub type PolicyId = String;

/// Identifier of a router.
pub type RouterId = String;

/// The direction of traffic, as seen from the gateway device a rate limit is installed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Traffic arriving at the device.
    Ingress,
    /// Traffic leaving the device.
    Egress,
}

impl Direction {
    /// Both directions, ingress first.
    pub const ALL: [Self; 2] = [Self::Ingress, Self::Egress];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Egress => "egress",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod constants {
    /// Burst used when a bandwidth limit rule does not set one.
    pub const IP_DEFAULT_BURST: u32 = 0;
}

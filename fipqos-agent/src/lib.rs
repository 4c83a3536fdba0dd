#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! The agent side of floating IP QoS.
//!
//! [`FipQosAgentExtension`] reacts to router lifecycle events and to QoS policy push
//! notifications. It keeps track of which floating IP is bound to which policy in a
//! [`RouterFipRateLimitMaps`] index and drives an [`IpRateLimiter`](fipqos_tc::IpRateLimiter) per
//! router gateway device to converge the installed limits to the desired ones.

mod device;
mod driver;
mod extension;
mod maps;
mod options;
mod rpc;
mod stats;

pub use device::*;
pub use driver::NotificationDriver;
pub use extension::*;
pub use maps::RouterFipRateLimitMaps;
pub use options::*;
pub use rpc::*;
pub use stats::ExtensionStats;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("traffic control error: {0}")]
    Tc(#[from] fipqos_tc::Error),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
}

pub type Result<T> = std::result::Result<T, Error>;

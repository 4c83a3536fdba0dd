#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Floating IP rate limiting with Linux traffic control.
//!
//! Limits are installed on the external gateway device of a router, inside the router's network
//! namespace, as u32 filters with a policing action:
//!
//! ```text
//! ingress qdisc (ffff:)                    root htb qdisc (1:)
//!   └── filter prio 1 match ip dst <fip>     └── filter prio 1 match ip src <fip>
//!         police rate <kbps> burst <kbit>          police rate <kbps> burst <kbit>
//!         drop flowid :1                           drop flowid :1
//! ```
//!
//! There is no way to update a filter in place, so changing a limit deletes the existing filter
//! and adds a new one.

use std::net::Ipv4Addr;

use fipqos_common::Direction;

pub mod command;
pub mod parse;
pub mod request;

mod fip;
pub use fip::FloatingIpTcCommand;

/// Handle of a filter, e.g. `800::800`.
pub type FilterId = String;

/// Handle of a qdisc, e.g. `ffff:`.
pub type QdiscId = String;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to add {direction} qdisc to device {device} in namespace {namespace:?}")]
    FailedToAddQdiscToDevice { direction: Direction, device: String, namespace: Option<String> },
    #[error("filter id for ip {ip} not found")]
    FilterIdForIpNotFound { ip: Ipv4Addr },
    #[error("multiple filter ids found for ip {ip}")]
    MultipleFilterIdForIpFound { ip: Ipv4Addr },
    #[error("command error: {0}")]
    Command(#[from] command::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Per-IP bandwidth limits on a single device.
///
/// All operations are synchronous and must not be invoked concurrently for the same device:
/// qdisc creation is check-then-act.
pub trait IpRateLimiter: Send + Sync {
    /// Installs a limit for traffic of `ip` in `direction`, replacing any existing one.
    fn set_ip_rate_limit(
        &self,
        direction: Direction,
        ip: Ipv4Addr,
        max_kbps: u32,
        max_burst_kbps: u32,
    ) -> Result<()>;

    /// Removes the limit for `ip` in `direction`. Removing a limit that does not exist succeeds.
    fn clear_ip_rate_limit(&self, direction: Direction, ip: Ipv4Addr) -> Result<()>;

    /// Removes every filter in `direction`.
    fn clear_all_filters(&self, direction: Direction) -> Result<()>;

    /// Returns the handle of the filter installed for `ip`, if any.
    fn get_filter_id_for_ip(&self, direction: Direction, ip: Ipv4Addr) -> Result<Option<FilterId>>;

    /// Returns the handles of all filters installed in `direction`.
    fn get_existing_filter_ids(&self, direction: Direction) -> Result<Vec<FilterId>>;

    /// Deletes the given filters.
    fn delete_filter_ids(&self, direction: Direction, filter_ids: &[FilterId]) -> Result<()>;
}

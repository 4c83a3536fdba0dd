#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Floating IP bandwidth limiting for L3 agents.
//!
//! - [`common`]: policy and router models.
//! - [`tc`]: per-IP limits with Linux traffic control.
//! - The agent extension, re-exported at the crate root.

pub use fipqos_agent::*;
pub use fipqos_common as common;
pub use fipqos_tc as tc;

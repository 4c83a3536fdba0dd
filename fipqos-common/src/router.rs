use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::{PolicyId, RouterId};

/// A floating IP attached to a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    /// The public address, which is what rate limits match on.
    #[serde(rename = "floating_ip_address")]
    pub address: Ipv4Addr,
    #[serde(default)]
    pub fixed_ip_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub floating_network_id: String,
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub qos_policy_id: Option<PolicyId>,
}

impl FloatingIp {
    pub fn new(id: impl Into<String>, address: Ipv4Addr) -> Self {
        Self {
            id: id.into(),
            address,
            fixed_ip_address: None,
            floating_network_id: String::new(),
            port_id: None,
            host: None,
            qos_policy_id: None,
        }
    }

    pub fn with_policy(mut self, policy_id: impl Into<PolicyId>) -> Self {
        self.qos_policy_id = Some(policy_id.into());
        self
    }
}

/// The external gateway port of a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPort {
    pub id: String,
}

/// A router snapshot, as handed to the agent on router events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    pub id: RouterId,
    #[serde(default)]
    pub gw_port: Option<GatewayPort>,
    #[serde(default)]
    pub ha: bool,
    #[serde(default)]
    pub distributed: bool,
    #[serde(default, alias = "_floatingips")]
    pub floating_ips: Vec<FloatingIp>,
}

impl Router {
    pub fn new(id: impl Into<RouterId>) -> Self {
        Self {
            id: id.into(),
            gw_port: None,
            ha: false,
            distributed: false,
            floating_ips: Vec::new(),
        }
    }

    pub fn with_gateway(mut self, port_id: impl Into<String>) -> Self {
        self.gw_port = Some(GatewayPort { id: port_id.into() });
        self
    }

    pub fn with_floating_ips(mut self, floating_ips: Vec<FloatingIp>) -> Self {
        self.floating_ips = floating_ips;
        self
    }
}

use fipqos_common::Router;
use fipqos_tc::{command::Runner, FloatingIpTcCommand, IpRateLimiter};

use crate::AgentMode;

/// Gateway device names are truncated to this length.
pub const DEVICE_NAME_LEN: usize = 14;
pub const EXTERNAL_DEVICE_PREFIX: &str = "qg-";
pub const ROUTER_NAMESPACE_PREFIX: &str = "qrouter-";
pub const SNAT_NAMESPACE_PREFIX: &str = "snat-";

/// The device floating IP traffic of a router passes through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GatewayDevice {
    pub name: String,
    pub namespace: Option<String>,
}

/// Locates the gateway device of a router.
pub trait DeviceResolver: Send + Sync {
    /// Returns `None` if floating IP limits cannot be applied for the router on this agent.
    fn gateway_device(&self, router: &Router) -> Option<GatewayDevice>;
}

/// Resolves devices with the naming conventions of the L3 agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct L3DeviceNaming {
    agent_mode: AgentMode,
}

impl L3DeviceNaming {
    pub fn new(agent_mode: AgentMode) -> Self {
        Self { agent_mode }
    }

    pub fn external_device_name(port_id: &str) -> String {
        let mut name = format!("{EXTERNAL_DEVICE_PREFIX}{port_id}");
        if let Some((idx, _)) = name.char_indices().nth(DEVICE_NAME_LEN) {
            name.truncate(idx);
        }
        name
    }
}

impl DeviceResolver for L3DeviceNaming {
    fn gateway_device(&self, router: &Router) -> Option<GatewayDevice> {
        let port = router.gw_port.as_ref()?;

        let namespace = match (router.distributed, self.agent_mode) {
            (false, _) => format!("{ROUTER_NAMESPACE_PREFIX}{}", router.id),
            (true, AgentMode::DvrSnat) => format!("{SNAT_NAMESPACE_PREFIX}{}", router.id),
            (true, _) => return None,
        };

        let name = Self::external_device_name(&port.id);
        Some(GatewayDevice { name, namespace: Some(namespace) })
    }
}

/// Builds the rate limiter for a gateway device.
pub trait RateLimiterFactory: Send + Sync {
    type Limiter: IpRateLimiter + 'static;

    fn build(&self, device: &GatewayDevice) -> Self::Limiter;
}

/// Builds [`FloatingIpTcCommand`]s sharing one command runner.
#[derive(Debug, Clone, Default)]
pub struct TcCommandFactory {
    runner: Runner,
}

impl TcCommandFactory {
    pub fn new(runner: Runner) -> Self {
        Self { runner }
    }
}

impl RateLimiterFactory for TcCommandFactory {
    type Limiter = FloatingIpTcCommand<Runner>;

    fn build(&self, device: &GatewayDevice) -> Self::Limiter {
        FloatingIpTcCommand::with_executor(
            device.name.clone(),
            device.namespace.clone(),
            self.runner.clone(),
        )
    }
}

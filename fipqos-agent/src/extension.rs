use std::{fmt, net::Ipv4Addr, sync::Arc};

use fipqos_common::{Direction, FloatingIp, PolicyRates, QosPolicy, QosRule, Router, RouterId};
use fipqos_tc::{FilterId, IpRateLimiter};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::task::JoinHandle;

use crate::{
    DeviceResolver, EventType, ExtensionOptions, ExtensionStats, L3DeviceNaming,
    NotificationDriver, PolicyPull, PushSubscriber, RateLimiterFactory, ResourceType, Result,
    RouterFipRateLimitMaps, RpcContext, TcCommandFactory,
};

/// The limiter of one router's gateway device.
#[derive(Debug)]
struct RouterLimiter<L> {
    limiter: L,
    /// Whether filters left behind by an earlier run were swept from the device.
    synced: bool,
}

/// Limiters are shared between router events and policy notifications. The mutex serializes
/// traffic control operations on one device.
type SharedLimiter<L> = Arc<Mutex<RouterLimiter<L>>>;

/// High availability role of a router on this agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaState {
    Primary,
    Backup,
}

impl fmt::Display for HaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Backup => f.write_str("backup"),
        }
    }
}

/// Returns true if `new` has different rules than `old`. Rules are compared as multisets, so
/// order does not matter but repetitions do.
pub fn policy_rules_modified(old: &QosPolicy, new: &QosPolicy) -> bool {
    let count = |rules: &[QosRule], rule: &QosRule| rules.iter().filter(|r| *r == rule).count();

    old.rules.len() != new.rules.len()
        || new.rules.iter().any(|rule| count(&old.rules, rule) != count(&new.rules, rule))
}

/// Applies QoS policy bandwidth limits to the floating IPs of the routers hosted by an agent.
///
/// Router handlers are synchronous and may be called from any thread. Policy notifications are
/// received by a [`NotificationDriver`] started with [`initialize`](Self::initialize).
pub struct FipQosAgentExtension<P, F: RateLimiterFactory = TcCommandFactory> {
    options: ExtensionOptions,
    resource_rpc: P,
    resolver: Box<dyn DeviceResolver>,
    factory: F,
    fip_qos_map: Mutex<RouterFipRateLimitMaps>,
    /// Limiter per router, created on first use.
    tc_wrappers: Mutex<FxHashMap<RouterId, SharedLimiter<F::Limiter>>>,
    stats: Arc<ExtensionStats>,
}

impl<P, F: RateLimiterFactory> fmt::Debug for FipQosAgentExtension<P, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FipQosAgentExtension")
            .field("options", &self.options)
            .field("fip_qos_map", &self.fip_qos_map)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<P: PolicyPull> FipQosAgentExtension<P> {
    /// Creates an extension that limits traffic with `tc`.
    pub fn new(resource_rpc: P, options: ExtensionOptions) -> Self {
        Self::with_factory(resource_rpc, TcCommandFactory::default(), options)
    }
}

impl<P: PolicyPull, F: RateLimiterFactory> FipQosAgentExtension<P, F> {
    pub fn with_factory(resource_rpc: P, factory: F, options: ExtensionOptions) -> Self {
        Self {
            resolver: Box::new(L3DeviceNaming::new(options.agent_mode)),
            options,
            resource_rpc,
            factory,
            fip_qos_map: Mutex::new(RouterFipRateLimitMaps::new()),
            tc_wrappers: Mutex::new(FxHashMap::default()),
            stats: Arc::new(ExtensionStats::default()),
        }
    }

    /// Replaces the default [`L3DeviceNaming`] resolver.
    pub fn with_resolver(mut self, resolver: impl DeviceResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn options(&self) -> &ExtensionOptions {
        &self.options
    }

    pub fn stats(&self) -> &Arc<ExtensionStats> {
        &self.stats
    }

    /// Runs `f` with the index locked.
    pub fn with_maps<T>(&self, f: impl FnOnce(&RouterFipRateLimitMaps) -> T) -> T {
        f(&self.fip_qos_map.lock())
    }

    /// Subscribes to QoS policy notifications and spawns the driver handling them.
    ///
    /// The driver runs until the subscription ends.
    pub async fn initialize<S>(self: &Arc<Self>, subscriber: &S) -> Result<JoinHandle<()>>
    where
        S: PushSubscriber + ?Sized,
        P: 'static,
        F: 'static,
    {
        let updates = subscriber
            .subscribe(ResourceType::QosPolicy, self.options.notification_buffer_size)
            .await?;

        tracing::debug!("subscribed to qos policy notifications");

        Ok(tokio::spawn(NotificationDriver::new(Arc::clone(self), updates)))
    }

    pub fn add_router(&self, context: &RpcContext, router: &Router) -> Result<()> {
        self.track(self.process_router(context, router))
    }

    /// Converges the limits of the router to its current floating IPs and their policies.
    /// Every limit is re-applied, even if unchanged.
    pub fn update_router(&self, context: &RpcContext, router: &Router) -> Result<()> {
        self.track(self.process_router(context, router))
    }

    /// Removes all limits of the router's floating IPs and forgets the router.
    ///
    /// Clearing continues past failures. The first failure is returned.
    pub fn delete_router(&self, _context: &RpcContext, router: &Router) -> Result<()> {
        let fips = self.fip_qos_map.lock().remove_router(&router.id);
        let tc = self.tc_wrappers.lock().remove(&router.id);

        let mut result = Ok(());
        for fip in fips {
            if let Some(tc) = &tc {
                let rates = PolicyRates::default();
                if let Err(e) = self.process_ip_rates(fip, &rates, &tc.lock().limiter) {
                    tracing::warn!(
                        router = %router.id,
                        %fip,
                        "failed to clear floating ip rate limits: {e}"
                    );
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
            self.fip_qos_map.lock().clean_by_fip(fip);
        }

        tracing::debug!(router = %router.id, "router deleted");
        self.track(result)
    }

    pub fn ha_state_change(&self, _context: &RpcContext, router_id: &str, state: HaState) {
        tracing::debug!(router = %router_id, %state, "router ha state changed");
    }

    /// Handles a pushed notification. Only updates of QoS policies are acted upon.
    pub fn handle_notification(
        &self,
        _context: &RpcContext,
        resource_type: ResourceType,
        policies: &[QosPolicy],
        event: EventType,
    ) {
        self.stats.increment_notifications();

        if resource_type != ResourceType::QosPolicy || event != EventType::Updated {
            tracing::debug!(%resource_type, %event, "ignoring notification");
            return;
        }

        for policy in policies {
            self.process_update_policy(policy);
        }
    }

    /// Re-applies an updated policy to all floating IPs bound to it.
    ///
    /// Nothing happens for policies no floating IP uses. Failures for one floating IP are logged
    /// and do not stop the others.
    pub fn process_update_policy(&self, policy: &QosPolicy) {
        let fips = {
            let mut map = self.fip_qos_map.lock();
            let modified = match map.get_policy(&policy.id) {
                Some(old) => policy_rules_modified(old, policy),
                None => {
                    tracing::debug!(policy = %policy.id, "policy not in use, skipping update");
                    return;
                }
            };

            if !modified {
                map.update_policy(policy.clone());
                return;
            }

            map.get_fips(&policy.id)
                .map(|fip| (fip, map.find_fip_router_id(fip).cloned()))
                .collect::<Vec<_>>()
        };

        tracing::info!(policy = %policy.id, fips = fips.len(), "applying updated policy");

        let rates = policy.bandwidth_limits();
        for (fip, router_id) in fips {
            let Some(router_id) = router_id else {
                tracing::debug!(%fip, "floating ip has no router, skipping");
                continue;
            };
            let Some(tc) = self.tc_wrappers.lock().get(&router_id).cloned() else {
                tracing::debug!(router = %router_id, %fip, "router has no limiter, skipping");
                continue;
            };

            let tc = tc.lock();
            // The binding may have moved while the index was unlocked.
            let still_bound = self
                .fip_qos_map
                .lock()
                .fip_policies()
                .get(&fip)
                .is_some_and(|id| *id == policy.id);
            if !still_bound {
                continue;
            }

            if let Err(e) = self.process_ip_rates(fip, &rates, &tc.limiter) {
                tracing::error!(policy = %policy.id, %fip, "failed to apply updated policy: {e}");
                self.stats.increment_failures();
            }
        }

        let mut map = self.fip_qos_map.lock();
        // The last floating IP using the policy may have gone while the index was unlocked.
        if map.get_policy(&policy.id).is_some() {
            map.update_policy(policy.clone());
        }
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.stats.increment_failures();
        }
        result
    }

    /// Returns the limiter of the router, creating it if needed.
    fn get_tc_wrapper(&self, router: &Router) -> Option<SharedLimiter<F::Limiter>> {
        let mut wrappers = self.tc_wrappers.lock();
        if let Some(tc) = wrappers.get(&router.id) {
            return Some(Arc::clone(tc));
        }

        let device = self.resolver.gateway_device(router)?;
        tracing::debug!(
            router = %router.id,
            device = %device.name,
            namespace = ?device.namespace,
            "found gateway device"
        );

        let limiter = self.factory.build(&device);
        let tc = Arc::new(Mutex::new(RouterLimiter { limiter, synced: false }));
        wrappers.insert(router.id.clone(), Arc::clone(&tc));
        Some(tc)
    }

    fn process_router(&self, context: &RpcContext, router: &Router) -> Result<()> {
        let Some(tc) = self.get_tc_wrapper(router) else {
            tracing::debug!(router = %router.id, "router has no gateway device, skipping");
            return Ok(());
        };

        let mut tc = tc.lock();
        self.process_floating_ip_addresses(context, router, &tc.limiter)?;

        if self.options.sync_stale_filters && !tc.synced {
            self.sync_filters(&router.id, &tc.limiter)?;
            tc.synced = true;
        }

        Ok(())
    }

    fn process_floating_ip_addresses(
        &self,
        context: &RpcContext,
        router: &Router,
        tc: &F::Limiter,
    ) -> Result<()> {
        let current: FxHashSet<Ipv4Addr> =
            router.floating_ips.iter().map(|fip| fip.address).collect();
        let previous =
            self.fip_qos_map.lock().router_floating_ips(&router.id).cloned().unwrap_or_default();

        // Floating IPs whose limits could not be cleared stay members, so the next event for
        // the router retries them.
        let mut members = current.clone();
        let mut removal = Ok(());
        for fip in previous.difference(&current) {
            tracing::debug!(router = %router.id, %fip, "floating ip removed from router");
            if let Err(e) = self.remove_fip_rate_limits(*fip, tc) {
                tracing::warn!(router = %router.id, %fip, "failed to remove floating ip: {e}");
                members.insert(*fip);
                if removal.is_ok() {
                    removal = Err(e);
                }
            }
        }
        self.fip_qos_map.lock().set_router_floating_ips(router.id.clone(), members);

        for fip in &router.floating_ips {
            self.process_floating_ip(context, fip, tc)?;
        }

        removal
    }

    fn process_floating_ip(
        &self,
        context: &RpcContext,
        fip: &FloatingIp,
        tc: &F::Limiter,
    ) -> Result<()> {
        let Some(policy_id) = &fip.qos_policy_id else {
            return self.remove_fip_rate_limits(fip.address, tc);
        };

        let policy = self.resource_rpc.pull(context, ResourceType::QosPolicy, policy_id)?;
        let rates = policy.bandwidth_limits();
        self.fip_qos_map.lock().set_fip_policy(fip.address, policy);

        self.process_ip_rates(fip.address, &rates, tc)
    }

    fn remove_fip_rate_limits(&self, fip: Ipv4Addr, tc: &F::Limiter) -> Result<()> {
        self.process_ip_rates(fip, &PolicyRates::default(), tc)?;
        self.fip_qos_map.lock().clean_by_fip(fip);
        Ok(())
    }

    /// Sets the limits present in `rates` and clears recorded limits for the other directions.
    fn process_ip_rates(&self, fip: Ipv4Addr, rates: &PolicyRates, tc: &F::Limiter) -> Result<()> {
        for direction in Direction::ALL {
            match rates.get(direction) {
                Some(limit) => {
                    tc.set_ip_rate_limit(direction, fip, limit.max_kbps, limit.max_burst_kbps)?;
                    self.fip_qos_map.lock().set_fip_ratelimit(direction, fip, limit);
                    self.stats.increment_limits_set();

                    tracing::info!(
                        %fip,
                        %direction,
                        max_kbps = limit.max_kbps,
                        max_burst_kbps = limit.max_burst_kbps,
                        "rate limit set"
                    );
                }
                None => {
                    let recorded = self.fip_qos_map.lock().get_fip_ratelimit(direction, fip);
                    if recorded.is_none() {
                        continue;
                    }

                    tc.clear_ip_rate_limit(direction, fip)?;
                    self.fip_qos_map.lock().remove_fip_ratelimit(direction, fip);
                    self.stats.increment_limits_cleared();

                    tracing::info!(%fip, %direction, "rate limit cleared");
                }
            }
        }

        Ok(())
    }

    /// Deletes filters on the gateway device that do not belong to a recorded limit of the
    /// router's floating IPs. Such filters are left behind by a previous agent run.
    fn sync_filters(&self, router_id: &str, tc: &F::Limiter) -> Result<()> {
        for direction in Direction::ALL {
            let existing = tc.get_existing_filter_ids(direction)?;
            if existing.is_empty() {
                continue;
            }

            let limited: Vec<Ipv4Addr> = {
                let map = self.fip_qos_map.lock();
                map.router_floating_ips(router_id)
                    .into_iter()
                    .flatten()
                    .copied()
                    .filter(|fip| map.get_fip_ratelimit(direction, *fip).is_some())
                    .collect()
            };

            let mut keep = FxHashSet::default();
            for fip in limited {
                if let Some(filter_id) = tc.get_filter_id_for_ip(direction, fip)? {
                    keep.insert(filter_id);
                }
            }

            let stale: Vec<FilterId> =
                existing.into_iter().filter(|filter_id| !keep.contains(filter_id)).collect();
            if !stale.is_empty() {
                tracing::info!(
                    router = %router_id,
                    %direction,
                    filters = ?stale,
                    "deleting stale filters"
                );
                tc.delete_filter_ids(direction, &stale)?;
            }
        }

        Ok(())
    }
}

use std::net::Ipv4Addr;

use fipqos_common::{Direction, PolicyId, QosPolicy, RateLimit, RouterId};
use rustc_hash::{FxHashMap, FxHashSet};

/// Index of floating IP, router and QoS policy associations.
///
/// The index only records what the agent *intends* to be installed. It never assumes the kernel
/// agrees with it.
///
/// Invariants:
/// - every policy referenced from `fip_policies` is in `known_policies`;
/// - `qos_policy_fips[p]` is exactly the set of floating IPs whose `fip_policies` entry is `p`;
/// - `router_floating_ips` records router membership only, independent of policies.
#[derive(Debug, Default)]
pub struct RouterFipRateLimitMaps {
    known_policies: FxHashMap<PolicyId, QosPolicy>,
    qos_policy_fips: FxHashMap<PolicyId, FxHashSet<Ipv4Addr>>,
    fip_policies: FxHashMap<Ipv4Addr, PolicyId>,
    router_floating_ips: FxHashMap<RouterId, FxHashSet<Ipv4Addr>>,
    /// The limits last applied per floating IP, per direction.
    ingress_ratelimits: FxHashMap<Ipv4Addr, RateLimit>,
    egress_ratelimits: FxHashMap<Ipv4Addr, RateLimit>,
}

impl RouterFipRateLimitMaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the cached snapshot of `policy`.
    pub fn update_policy(&mut self, policy: QosPolicy) {
        self.known_policies.insert(policy.id.clone(), policy);
    }

    pub fn get_policy(&self, policy_id: &str) -> Option<&QosPolicy> {
        self.known_policies.get(policy_id)
    }

    pub fn known_policies(&self) -> &FxHashMap<PolicyId, QosPolicy> {
        &self.known_policies
    }

    pub fn fip_policies(&self) -> &FxHashMap<Ipv4Addr, PolicyId> {
        &self.fip_policies
    }

    pub fn qos_policy_fips(&self, policy_id: &str) -> Option<&FxHashSet<Ipv4Addr>> {
        self.qos_policy_fips.get(policy_id)
    }

    /// Binds `fip` to `policy`, caching the policy. A previous binding to another policy is
    /// dropped first.
    pub fn set_fip_policy(&mut self, fip: Ipv4Addr, policy: QosPolicy) {
        let policy_id = policy.id.clone();
        if let Some(previous) = self.fip_policies.get(&fip).cloned() {
            if previous != policy_id {
                self.clean_policy_info(&previous, fip);
            }
        }

        self.update_policy(policy);
        self.fip_policies.insert(fip, policy_id.clone());
        self.qos_policy_fips.entry(policy_id).or_default().insert(fip);
    }

    pub fn get_fip_policy(&self, fip: Ipv4Addr) -> Option<&QosPolicy> {
        self.fip_policies.get(&fip).and_then(|policy_id| self.known_policies.get(policy_id))
    }

    /// The floating IPs currently bound to `policy_id`, in no particular order.
    pub fn get_fips<'a>(&'a self, policy_id: &str) -> impl Iterator<Item = Ipv4Addr> + 'a {
        self.qos_policy_fips.get(policy_id).into_iter().flatten().copied()
    }

    /// Stops tracking `fip`: unbinds it from its policy, forgetting the policy if nothing else
    /// references it, and drops its recorded limits.
    pub fn clean_by_fip(&mut self, fip: Ipv4Addr) {
        self.ingress_ratelimits.remove(&fip);
        self.egress_ratelimits.remove(&fip);

        if let Some(policy_id) = self.fip_policies.get(&fip).cloned() {
            self.clean_policy_info(&policy_id, fip);
        }
    }

    fn clean_policy_info(&mut self, policy_id: &str, fip: Ipv4Addr) {
        self.fip_policies.remove(&fip);

        let now_unused = match self.qos_policy_fips.get_mut(policy_id) {
            Some(fips) => {
                fips.remove(&fip);
                fips.is_empty()
            }
            None => true,
        };

        if now_unused {
            self.qos_policy_fips.remove(policy_id);
            self.known_policies.remove(policy_id);
        }
    }

    /// The router `fip` is a member of, if any.
    pub fn find_fip_router_id(&self, fip: Ipv4Addr) -> Option<&RouterId> {
        self.router_floating_ips
            .iter()
            .find_map(|(router_id, fips)| fips.contains(&fip).then_some(router_id))
    }

    pub fn router_floating_ips(&self, router_id: &str) -> Option<&FxHashSet<Ipv4Addr>> {
        self.router_floating_ips.get(router_id)
    }

    /// Records the current floating IPs of a router, returning the previous ones.
    pub fn set_router_floating_ips(
        &mut self,
        router_id: RouterId,
        fips: FxHashSet<Ipv4Addr>,
    ) -> FxHashSet<Ipv4Addr> {
        self.router_floating_ips.insert(router_id, fips).unwrap_or_default()
    }

    /// Forgets a router's membership, returning its floating IPs.
    pub fn remove_router(&mut self, router_id: &str) -> FxHashSet<Ipv4Addr> {
        self.router_floating_ips.remove(router_id).unwrap_or_default()
    }

    fn ratelimits(&self, direction: Direction) -> &FxHashMap<Ipv4Addr, RateLimit> {
        match direction {
            Direction::Ingress => &self.ingress_ratelimits,
            Direction::Egress => &self.egress_ratelimits,
        }
    }

    fn ratelimits_mut(&mut self, direction: Direction) -> &mut FxHashMap<Ipv4Addr, RateLimit> {
        match direction {
            Direction::Ingress => &mut self.ingress_ratelimits,
            Direction::Egress => &mut self.egress_ratelimits,
        }
    }

    pub fn set_fip_ratelimit(&mut self, direction: Direction, fip: Ipv4Addr, limit: RateLimit) {
        self.ratelimits_mut(direction).insert(fip, limit);
    }

    pub fn get_fip_ratelimit(&self, direction: Direction, fip: Ipv4Addr) -> Option<RateLimit> {
        self.ratelimits(direction).get(&fip).copied()
    }

    pub fn remove_fip_ratelimit(
        &mut self,
        direction: Direction,
        fip: Ipv4Addr,
    ) -> Option<RateLimit> {
        self.ratelimits_mut(direction).remove(&fip)
    }

    /// The directions with a recorded limit for `fip`.
    pub fn fip_directions(&self, fip: Ipv4Addr) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|direction| self.ratelimits(*direction).contains_key(&fip))
            .collect()
    }
}

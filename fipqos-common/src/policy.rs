use serde::{Deserialize, Serialize};

use crate::{constants::IP_DEFAULT_BURST, Direction, PolicyId};

/// A QoS policy snapshot, as pulled from the server.
///
/// Policies are replaced wholesale when a newer snapshot arrives, they are never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosPolicy {
    pub id: PolicyId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rules: Vec<QosRule>,
}

impl QosPolicy {
    pub fn new(id: impl Into<PolicyId>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), rules: Vec::new() }
    }

    /// Replaces the rules of the policy.
    pub fn with_rules(mut self, rules: Vec<QosRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Returns the bandwidth limit rules of this policy, in order.
    pub fn bandwidth_limit_rules(&self) -> impl Iterator<Item = &BandwidthLimitRule> + '_ {
        self.rules.iter().filter_map(|rule| match rule {
            QosRule::BandwidthLimit(rule) => Some(rule),
            _ => None,
        })
    }

    /// Returns the rate limit to enforce for each direction. If the policy has more than one
    /// bandwidth limit rule for a direction, the last one wins.
    pub fn bandwidth_limits(&self) -> PolicyRates {
        let mut rates = PolicyRates::default();
        for rule in self.bandwidth_limit_rules() {
            rates.set(rule.direction, rule.rate_limit());
        }

        rates
    }
}

/// A single rule of a [`QosPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QosRule {
    BandwidthLimit(BandwidthLimitRule),
    DscpMarking(DscpMarkingRule),
    MinimumBandwidth(MinimumBandwidthRule),
}

impl From<BandwidthLimitRule> for QosRule {
    fn from(rule: BandwidthLimitRule) -> Self {
        Self::BandwidthLimit(rule)
    }
}

impl From<DscpMarkingRule> for QosRule {
    fn from(rule: DscpMarkingRule) -> Self {
        Self::DscpMarking(rule)
    }
}

impl From<MinimumBandwidthRule> for QosRule {
    fn from(rule: MinimumBandwidthRule) -> Self {
        Self::MinimumBandwidth(rule)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthLimitRule {
    #[serde(default = "default_direction")]
    pub direction: Direction,
    pub max_kbps: u32,
    /// Burst allowance in kilobits. `0` when the rule does not set one.
    #[serde(default)]
    pub max_burst_kbps: u32,
}

impl BandwidthLimitRule {
    pub fn new(direction: Direction, max_kbps: u32) -> Self {
        Self { direction, max_kbps, max_burst_kbps: IP_DEFAULT_BURST }
    }

    pub fn with_burst(mut self, max_burst_kbps: u32) -> Self {
        self.max_burst_kbps = max_burst_kbps;
        self
    }

    pub fn rate_limit(&self) -> RateLimit {
        RateLimit { max_kbps: self.max_kbps, max_burst_kbps: self.max_burst_kbps }
    }
}

// Rules created before directions existed only limited egress traffic.
const fn default_direction() -> Direction {
    Direction::Egress
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DscpMarkingRule {
    pub dscp_mark: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimumBandwidthRule {
    #[serde(default = "default_direction")]
    pub direction: Direction,
    pub min_kbps: u32,
}

/// A bandwidth limit for one direction of one floating IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimit {
    /// Sustained rate, in kilobits per second.
    pub max_kbps: u32,
    /// Burst allowance, in kilobits.
    pub max_burst_kbps: u32,
}

impl RateLimit {
    pub const fn new(max_kbps: u32, max_burst_kbps: u32) -> Self {
        Self { max_kbps, max_burst_kbps }
    }
}

/// The rate limits a policy asks for, per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyRates {
    ingress: Option<RateLimit>,
    egress: Option<RateLimit>,
}

impl PolicyRates {
    #[inline]
    pub const fn get(&self, direction: Direction) -> Option<RateLimit> {
        match direction {
            Direction::Ingress => self.ingress,
            Direction::Egress => self.egress,
        }
    }

    #[inline]
    pub fn set(&mut self, direction: Direction, limit: RateLimit) {
        match direction {
            Direction::Ingress => self.ingress = Some(limit),
            Direction::Egress => self.egress = Some(limit),
        }
    }

    /// Returns true if no direction is limited.
    pub const fn is_empty(&self) -> bool {
        self.ingress.is_none() && self.egress.is_none()
    }

    /// Iterates over the limited directions, ingress first.
    pub fn iter(&self) -> impl Iterator<Item = (Direction, RateLimit)> + '_ {
        Direction::ALL
            .into_iter()
            .filter_map(|direction| self.get(direction).map(|limit| (direction, limit)))
    }
}

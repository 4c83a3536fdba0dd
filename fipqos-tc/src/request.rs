//! Builders for the `tc` argument vectors used to manage floating IP rate limits.
//!
//! Every builder is a pure function of its inputs. Namespacing and privilege escalation are added
//! later by [`CommandSpec::in_namespace`] and the [`Executor`](crate::command::Executor).

use std::net::Ipv4Addr;

use fipqos_common::Direction;

use crate::command::CommandSpec;

/// Handle of the root htb qdisc created for egress limits.
pub const EGRESS_QDISC_HANDLE: &str = "1:";

/// All filters are added in this priority band.
pub const FILTER_PRIORITY: u32 = 1;

/// Flow id every policing filter is bound to.
pub const FILTER_FLOW_ID: &str = ":1";

/// `tc qdisc show dev <device>`
pub fn qdisc_show(device: &str) -> CommandSpec {
    CommandSpec::new(["tc", "qdisc", "show", "dev", device])
}

/// `tc qdisc add dev <device> ingress` for ingress, `tc qdisc add dev <device> root handle 1: htb`
/// for egress.
pub fn qdisc_add(device: &str, direction: Direction) -> CommandSpec {
    let mut argv = vec!["tc", "qdisc", "add", "dev", device];
    match direction {
        Direction::Ingress => argv.push("ingress"),
        Direction::Egress => argv.extend(["root", "handle", EGRESS_QDISC_HANDLE, "htb"]),
    }

    CommandSpec::new(argv)
}

/// `tc -p -s -d filter show dev <device> parent <qdisc> prio 1`
pub fn filter_show(device: &str, qdisc_id: &str) -> CommandSpec {
    let prio = FILTER_PRIORITY.to_string();
    CommandSpec::new([
        "tc",
        "-p",
        "-s",
        "-d",
        "filter",
        "show",
        "dev",
        device,
        "parent",
        qdisc_id,
        "prio",
        prio.as_str(),
    ])
}

/// The match keyword used for a direction: ingress traffic is addressed *to* the floating IP,
/// egress traffic comes *from* it.
pub const fn match_keyword(direction: Direction) -> &'static str {
    match direction {
        Direction::Ingress => "dst",
        Direction::Egress => "src",
    }
}

/// `tc filter add dev <device> parent <qdisc> protocol ip prio 1 u32 match ip <dst|src> <ip>
/// police rate <rate>kbit burst <burst>kbit drop flowid :1`
pub fn filter_add(
    device: &str,
    qdisc_id: &str,
    direction: Direction,
    ip: Ipv4Addr,
    max_kbps: u32,
    max_burst_kbps: u32,
) -> CommandSpec {
    let prio = FILTER_PRIORITY.to_string();
    let ip = ip.to_string();
    let rate = format!("{max_kbps}kbit");
    let burst = format!("{max_burst_kbps}kbit");

    CommandSpec::new([
        "tc",
        "filter",
        "add",
        "dev",
        device,
        "parent",
        qdisc_id,
        "protocol",
        "ip",
        "prio",
        prio.as_str(),
        "u32",
        "match",
        "ip",
        match_keyword(direction),
        ip.as_str(),
        "police",
        "rate",
        rate.as_str(),
        "burst",
        burst.as_str(),
        "drop",
        "flowid",
        FILTER_FLOW_ID,
    ])
}

/// `tc filter del dev <device> parent <qdisc> prio 1 handle <filter> u32`
pub fn filter_del(device: &str, qdisc_id: &str, filter_id: &str) -> CommandSpec {
    let prio = FILTER_PRIORITY.to_string();
    CommandSpec::new([
        "tc",
        "filter",
        "del",
        "dev",
        device,
        "parent",
        qdisc_id,
        "prio",
        prio.as_str(),
        "handle",
        filter_id,
        "u32",
    ])
}

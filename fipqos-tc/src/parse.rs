//! Parsers for the textual listings printed by `tc qdisc show` and `tc -p -s -d filter show`.
//!
//! Parsing never fails: lines that cannot be understood are skipped, so a malformed or empty
//! listing simply yields no records.

use std::net::Ipv4Addr;

use fipqos_common::Direction;

/// A queuing discipline attached to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qdisc {
    /// The qdisc kind, e.g. `htb` or `ingress`.
    pub kind: String,
    /// The handle, including the trailing colon, e.g. `1:` or `ffff:`.
    pub handle: String,
    /// Whether this is the root qdisc of the device.
    pub root: bool,
    pub parent: Option<String>,
}

impl Qdisc {
    /// Returns true if rate limit filters for `direction` hang off this qdisc.
    pub fn serves(&self, direction: Direction) -> bool {
        match direction {
            Direction::Ingress => self.kind == "ingress",
            Direction::Egress => self.kind == "htb" && self.root,
        }
    }
}

/// Parses a single `qdisc <kind> <handle> ...` line.
fn parse_qdisc(line: &str) -> Option<Qdisc> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "qdisc" {
        return None;
    }

    let kind = tokens.next()?.to_string();
    let handle = tokens.next()?;
    if !handle.ends_with(':') {
        return None;
    }

    let mut qdisc = Qdisc { kind, handle: handle.to_string(), root: false, parent: None };
    while let Some(token) = tokens.next() {
        match token {
            "root" => qdisc.root = true,
            "parent" => qdisc.parent = tokens.next().map(str::to_string),
            _ => {}
        }
    }

    Some(qdisc)
}

/// Parses the output of `tc qdisc show dev <device>`.
pub fn parse_qdiscs(output: &str) -> Vec<Qdisc> {
    output.lines().filter_map(parse_qdisc).collect()
}

/// One u32 filter, as found in a filter listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterEntry {
    /// The filter handle, e.g. `800::800`.
    pub handle: String,
    /// The IP matched with a `/32` mask.
    pub target: Option<Ipv4Addr>,
    /// The match keyword preceding the target, `dst` or `src`.
    pub match_keyword: Option<String>,
    /// The police rate as printed, e.g. `3000Kbit`.
    pub rate: Option<String>,
    /// The police burst as printed, e.g. `3Mb`.
    pub burst: Option<String>,
}

impl FilterEntry {
    /// The direction this filter limits, derived from its match keyword.
    pub fn direction(&self) -> Option<Direction> {
        match self.match_keyword.as_deref()? {
            "dst" => Some(Direction::Ingress),
            "src" => Some(Direction::Egress),
            _ => None,
        }
    }
}

/// Returns the handle of a filter header line. Hash table headers such as `fh 800: ht divisor 1`
/// do not name a filter and are ignored.
fn parse_filter_handle(line: &str) -> Option<&str> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "filter" {
        return None;
    }

    tokens.skip_while(|token| *token != "fh").nth(1).filter(|handle| handle.contains("::"))
}

/// Parses a `match IP dst 172.16.5.146/32 (success 0 )` line.
fn parse_match(line: &str) -> Option<(String, Ipv4Addr)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first() != Some(&"match") {
        return None;
    }

    tokens.iter().enumerate().find_map(|(i, token)| {
        let ip = token.strip_suffix("/32")?.parse().ok()?;
        let keyword = i.checked_sub(1).map(|k| tokens[k].to_string()).unwrap_or_default();
        Some((keyword, ip))
    })
}

/// Parses a `police 0x3 rate 3000Kbit burst 3Mb ...` line into its rate and burst.
fn parse_police(line: &str) -> Option<(Option<String>, Option<String>)> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "police" {
        return None;
    }

    let (mut rate, mut burst) = (None, None);
    while let Some(token) = tokens.next() {
        match token {
            "rate" => rate = tokens.next().map(str::to_string),
            "burst" => burst = tokens.next().map(str::to_string),
            _ => {}
        }
    }

    Some((rate, burst))
}

/// Parses the output of `tc -p -s -d filter show`, returning the filters in listing order.
///
/// Every filter starts with a header line naming its handle (`fh <handle>`); the match, police
/// and statistics lines that follow belong to it until the next header.
pub fn parse_filters(output: &str) -> Vec<FilterEntry> {
    let mut entries: Vec<FilterEntry> = Vec::new();

    for line in output.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }

        if let Some(handle) = parse_filter_handle(line) {
            entries.push(FilterEntry { handle: handle.to_string(), ..Default::default() });
            continue;
        }

        // Anything before the first header has no filter to belong to.
        let Some(current) = entries.last_mut() else {
            continue;
        };

        if let Some((keyword, ip)) = parse_match(line) {
            if current.target.is_none() {
                current.target = Some(ip);
                current.match_keyword = Some(keyword);
            }
        } else if let Some((rate, burst)) = parse_police(line) {
            current.rate = rate;
            current.burst = burst;
        }
    }

    entries
}

//! Allowed/disallowed address sets.
//!
//! The set keeps, per address family, a sorted vector of coalesced closed
//! ranges. Insertions within a configurable distance of an existing range
//! extend that range instead of creating a new one, and adjacent ranges merge;
//! membership is a binary search. This keeps both the memory footprint and
//! the lookup cost low even when an autobanner keeps feeding it addresses.

use std::fmt;
use std::sync::RwLock;

use thiserror::Error;

use super::host_address::{AddressFamily, HostIp, HostScalar, IpRange, Ipv4Host, Ipv6Host};

/// A parse failure for one token of a textual address list.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid address list token {token:?} at position {index}")]
pub struct InvalidToken {
    /// Zero-based index of the offending token.
    pub index: usize,
    /// The token itself.
    pub token: String,
}

/// A set of IPv4/IPv6 addresses stored as coalesced ranges.
#[derive(Debug, Default)]
pub struct BinaryAddressList {
    inner: RwLock<Lists>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Lists {
    v4: Vec<IpRange<Ipv4Host>>,
    v6: Vec<IpRange<Ipv6Host>>,
    v4_threshold: u128,
    v6_threshold: u128,
}

impl Clone for BinaryAddressList {
    fn clone(&self) -> Self {
        let inner = self.inner.read().expect("address list lock").clone();
        BinaryAddressList {
            inner: RwLock::new(inner),
        }
    }
}

impl PartialEq for BinaryAddressList {
    fn eq(&self, other: &Self) -> bool {
        *self.inner.read().expect("address list lock") == *other.inner.read().expect("address list lock")
    }
}

impl Eq for BinaryAddressList {}

// Free functions over one family's list. `threshold` is the maximum distance
// at which a new point is absorbed into a neighbouring range.

fn find<H: HostScalar>(list: &[IpRange<H>], host: H) -> bool {
    let right = list.partition_point(|r| r.to < host);
    list.get(right).is_some_and(|r| host >= r.from)
}

fn insert_or_merge<H: HostScalar>(list: &mut Vec<IpRange<H>>, host: H, threshold: u128) -> bool {
    let right = list.partition_point(|r| r.to < host);

    if let Some(r) = list.get(right) {
        if host >= r.from {
            return false; // already covered
        }
    }

    let point = host.to_scalar();
    let distance_r = list.get(right).map(|r| r.from.to_scalar() - point).unwrap_or(threshold);
    let distance_l = right
        .checked_sub(1)
        .and_then(|li| list.get(li))
        .map(|l| point - l.to.to_scalar())
        .unwrap_or(threshold);

    if distance_l < threshold && distance_l <= distance_r {
        list[right - 1].to = host;

        // If the extended range now touches its right neighbour, fuse them.
        if let Some(r) = list.get(right) {
            if point.checked_add(1) == Some(r.from.to_scalar()) {
                list[right - 1].to = r.to;
                list.remove(right);
            }
        }
        return true;
    }

    if distance_r < threshold && distance_r <= distance_l {
        list[right].from = host;
        return true;
    }

    list.insert(right, IpRange::singleton(host));
    true
}

fn remove_and_maybe_split<H: HostScalar>(list: &mut Vec<IpRange<H>>, host: H) -> bool {
    let idx = list.partition_point(|r| r.to < host);

    let Some(range) = list.get(idx).copied() else {
        return false;
    };
    if host < range.from {
        return false;
    }

    // The split deliberately produces ranges that may lie within the
    // threshold of one another; an explicit removal must stay removed.
    let point = host.to_scalar();
    match (host == range.from, host == range.to) {
        (true, true) => {
            list.remove(idx);
        }
        (true, false) => {
            list[idx].from = H::from_scalar(point + 1);
        }
        (false, true) => {
            list[idx].to = H::from_scalar(point - 1);
        }
        (false, false) => {
            list[idx].from = H::from_scalar(point + 1);
            list.insert(
                idx,
                IpRange {
                    from: range.from,
                    to: H::from_scalar(point - 1),
                },
            );
        }
    }
    true
}

/// Merges overlapping or adjacent ranges of a sorted list in place.
fn coalesce_sorted<H: HostScalar>(list: &mut Vec<IpRange<H>>) {
    let mut out: Vec<IpRange<H>> = Vec::with_capacity(list.len());
    for r in list.drain(..) {
        match out.last_mut() {
            Some(last) if r.from.to_scalar() <= last.to.to_scalar().saturating_add(1) => {
                if r.to > last.to {
                    last.to = r.to;
                }
            }
            _ => out.push(r),
        }
    }
    *list = out;
}

impl BinaryAddressList {
    /// An empty set with zero thresholds (no absorption).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-family absorption thresholds.
    pub fn set_thresholds(&self, v4: u128, v6: u128) {
        let mut inner = self.inner.write().expect("address list lock");
        inner.v4_threshold = v4;
        inner.v6_threshold = v6;
    }

    /// Tells whether `ip` is in the set. With `family` given, only that
    /// family's list is consulted.
    pub fn contains(&self, ip: &HostIp, family: Option<AddressFamily>) -> bool {
        let inner = self.inner.read().expect("address list lock");
        match ip {
            HostIp::V4(h) if family != Some(AddressFamily::V6) => find(&inner.v4, *h),
            HostIp::V6(h) if family != Some(AddressFamily::V4) => find(&inner.v6, *h),
            _ => false,
        }
    }

    /// Adds `ip`. Returns `true` if it was newly accepted, `false` if an
    /// existing range already covered it.
    pub fn add(&self, ip: &HostIp) -> bool {
        let mut inner = self.inner.write().expect("address list lock");
        match ip {
            HostIp::V4(h) => {
                let threshold = inner.v4_threshold;
                insert_or_merge(&mut inner.v4, *h, threshold)
            }
            HostIp::V6(h) => {
                let threshold = inner.v6_threshold;
                insert_or_merge(&mut inner.v6, *h, threshold)
            }
            HostIp::Unknown => false,
        }
    }

    /// Removes `ip`, splitting the containing range if needed. Returns `true`
    /// if the address was present.
    pub fn remove(&self, ip: &HostIp) -> bool {
        let mut inner = self.inner.write().expect("address list lock");
        match ip {
            HostIp::V4(h) => remove_and_maybe_split(&mut inner.v4, *h),
            HostIp::V6(h) => remove_and_maybe_split(&mut inner.v6, *h),
            HostIp::Unknown => false,
        }
    }

    /// The number of ranges, across both families.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("address list lock");
        inner.v4.len() + inner.v6.len()
    }

    /// Tells whether the set holds no ranges at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a whole range to the given family list, keeping order and
    /// coalescing.
    fn push_v4(lists: &mut Lists, r: IpRange<Ipv4Host>) {
        lists.v4.push(r);
    }

    fn push_v6(lists: &mut Lists, r: IpRange<Ipv6Host>) {
        lists.v6.push(r);
    }

    /// Parses a textual list: tokens separated by whitespace, `;` or `,`,
    /// each an address, an `a-b` interval, a CIDR `a/p` or `*` (everything).
    /// On a bad token, `on_error` decides whether to keep going.
    pub fn parse_with<F>(text: &str, mut on_error: F) -> Result<Self, InvalidToken>
    where
        F: FnMut(&InvalidToken) -> bool,
    {
        let mut lists = Lists::default();

        for (index, token) in text
            .split(|c: char| c.is_whitespace() || c == ';' || c == ',')
            .filter(|t| !t.is_empty())
            .enumerate()
        {
            if token == "*" {
                Self::push_v4(&mut lists, IpRange::full());
                Self::push_v6(&mut lists, IpRange::full());
            } else if let Some(r) = IpRange::<Ipv4Host>::parse(token) {
                Self::push_v4(&mut lists, r);
            } else if let Some(r) = IpRange::<Ipv6Host>::parse(token) {
                Self::push_v6(&mut lists, r);
            } else {
                let err = InvalidToken {
                    index,
                    token: token.to_string(),
                };
                if !on_error(&err) {
                    return Err(err);
                }
            }
        }

        lists.v4.sort();
        lists.v6.sort();
        coalesce_sorted(&mut lists.v4);
        coalesce_sorted(&mut lists.v6);

        Ok(BinaryAddressList {
            inner: RwLock::new(lists),
        })
    }
}

impl BinaryAddressList {
    /// Serializes to the compact binary form: per family a little-endian
    /// count followed by `from`/`to` pairs in network bit order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let inner = self.inner.read().expect("address list lock");
        let mut out = Vec::with_capacity(8 + inner.v4.len() * 8 + inner.v6.len() * 32);

        out.extend_from_slice(&(inner.v4.len() as u32).to_le_bytes());
        for r in &inner.v4 {
            out.extend_from_slice(&r.from.0);
            out.extend_from_slice(&r.to.0);
        }

        out.extend_from_slice(&(inner.v6.len() as u32).to_le_bytes());
        for r in &inner.v6 {
            for hextet in r.from.0 {
                out.extend_from_slice(&hextet.to_be_bytes());
            }
            for hextet in r.to.0 {
                out.extend_from_slice(&hextet.to_be_bytes());
            }
        }

        out
    }

    /// Parses what [`BinaryAddressList::to_bytes`] produced.
    pub fn from_bytes(bytes: &[u8]) -> Option<BinaryAddressList> {
        fn take<'a>(bytes: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
            if bytes.len() < n {
                return None;
            }
            let (head, tail) = bytes.split_at(n);
            *bytes = tail;
            Some(head)
        }

        let mut cur = bytes;
        let mut lists = Lists::default();

        let v4_count = u32::from_le_bytes(take(&mut cur, 4)?.try_into().ok()?) as usize;
        for _ in 0..v4_count {
            let from = Ipv4Host(take(&mut cur, 4)?.try_into().ok()?);
            let to = Ipv4Host(take(&mut cur, 4)?.try_into().ok()?);
            lists.v4.push(IpRange { from, to });
        }

        let v6_count = u32::from_le_bytes(take(&mut cur, 4)?.try_into().ok()?) as usize;
        for _ in 0..v6_count {
            let mut read_host = |cur: &mut &[u8]| -> Option<Ipv6Host> {
                let mut hextets = [0u16; 8];
                for hextet in hextets.iter_mut() {
                    *hextet = u16::from_be_bytes(take(cur, 2)?.try_into().ok()?);
                }
                Some(Ipv6Host(hextets))
            };
            let from = read_host(&mut cur)?;
            let to = read_host(&mut cur)?;
            lists.v6.push(IpRange { from, to });
        }

        if !cur.is_empty() {
            return None;
        }

        lists.v4.sort();
        lists.v6.sort();
        coalesce_sorted(&mut lists.v4);
        coalesce_sorted(&mut lists.v6);

        Some(BinaryAddressList {
            inner: RwLock::new(lists),
        })
    }
}

impl std::str::FromStr for BinaryAddressList {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with(s, |_| false)
    }
}

impl fmt::Display for BinaryAddressList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().expect("address list lock");
        let mut first = true;
        for r in &inner.v4 {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", r)?;
            first = false;
        }
        for r in &inner.v6 {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", r)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v4(s: &str) -> HostIp {
        HostIp::V4(Ipv4Host({
            let mut cur = crate::net::host_address::Cursor::new(s);
            crate::net::host_address::parse_ipv4(&mut cur, '.').unwrap().0
        }))
    }

    #[test]
    fn add_contains_is_idempotent() {
        let list = BinaryAddressList::new();
        assert!(list.add(&v4("10.0.0.1")));
        assert!(list.contains(&v4("10.0.0.1"), None));
        // Adding a contained address is a no-op and reports so.
        assert!(!list.add(&v4("10.0.0.1")));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn threshold_extends_nearest_range() {
        let list = BinaryAddressList::new();
        list.set_thresholds(16, 0);
        assert!(list.add(&v4("10.0.0.10")));
        assert!(list.add(&v4("10.0.0.20")));
        // 10..=20 became one range, everything between is covered.
        assert_eq!(list.len(), 1);
        assert!(list.contains(&v4("10.0.0.15"), None));
    }

    #[test]
    fn adjacent_ranges_fuse() {
        let list = BinaryAddressList::new();
        list.set_thresholds(4, 0);
        assert!(list.add(&v4("10.0.0.1")));
        assert!(list.add(&v4("10.0.0.5")));
        assert!(list.add(&v4("10.0.0.3")));
        // 1..=3 extended left, then fused with 5 when 4 appeared.
        assert!(list.add(&v4("10.0.0.4")));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn far_point_starts_new_range() {
        let list = BinaryAddressList::new();
        list.set_thresholds(4, 0);
        assert!(list.add(&v4("10.0.0.1")));
        assert!(list.add(&v4("10.0.1.1")));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn remove_splits_covering_range() {
        let list: BinaryAddressList = "10.0.0.0-10.0.0.9".parse().unwrap();
        assert!(list.remove(&v4("10.0.0.5")));
        assert!(!list.contains(&v4("10.0.0.5"), None));
        assert!(list.contains(&v4("10.0.0.4"), None));
        assert!(list.contains(&v4("10.0.0.6"), None));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn remove_at_range_edges() {
        let list: BinaryAddressList = "10.0.0.0-10.0.0.9".parse().unwrap();
        assert!(list.remove(&v4("10.0.0.0")));
        assert!(list.remove(&v4("10.0.0.9")));
        assert_eq!(list.len(), 1);
        assert!(list.contains(&v4("10.0.0.1"), None));
        assert!(list.contains(&v4("10.0.0.8"), None));
    }

    #[test]
    fn remove_after_add_restores_original() {
        let list: BinaryAddressList = "10.0.0.0-10.0.0.9".parse().unwrap();
        let before = list.to_string();
        assert!(list.add(&v4("172.16.0.1")));
        assert!(list.remove(&v4("172.16.0.1")));
        assert_eq!(list.to_string(), before);
    }

    #[test]
    fn textual_round_trip() {
        let list: BinaryAddressList = "10.0.0.1 192.168.0.0/24; 2001:db8::1, 172.16.0.1-172.16.0.20".parse().unwrap();
        let reparsed: BinaryAddressList = list.to_string().parse().unwrap();
        assert_eq!(list, reparsed);
    }

    #[test]
    fn star_covers_both_families() {
        let list: BinaryAddressList = "*".parse().unwrap();
        assert!(list.contains(&v4("1.2.3.4"), None));
        assert!(list.contains(&HostIp::V6(Ipv6Host([0xfe80, 0, 0, 0, 0, 0, 0, 1])), None));
    }

    #[test]
    fn family_restriction() {
        let list: BinaryAddressList = "10.0.0.1".parse().unwrap();
        assert!(list.contains(&v4("10.0.0.1"), Some(AddressFamily::V4)));
        assert!(!list.contains(&v4("10.0.0.1"), Some(AddressFamily::V6)));
    }

    #[test]
    fn bad_token_reports_position() {
        let err = "10.0.0.1 not-an-ip".parse::<BinaryAddressList>().unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.token, "not-an-ip");
    }

    #[test]
    fn binary_round_trip() {
        let list: BinaryAddressList = "10.0.0.1 192.168.0.0/24 2001:db8::/64 172.16.0.1-172.16.0.20".parse().unwrap();
        let bytes = list.to_bytes();
        let back = BinaryAddressList::from_bytes(&bytes).unwrap();
        assert_eq!(list, back);
    }

    #[test]
    fn truncated_binary_is_rejected() {
        let list: BinaryAddressList = "10.0.0.1".parse().unwrap();
        let bytes = list.to_bytes();
        assert!(BinaryAddressList::from_bytes(&bytes[..bytes.len() - 1]).is_none());
    }

    #[test]
    fn overlapping_input_coalesces() {
        let list: BinaryAddressList = "10.0.0.0-10.0.0.5 10.0.0.3-10.0.0.9 10.0.0.10".parse().unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.contains(&v4("10.0.0.7"), None));
    }
}

// Copyright 2026 Fanout contributors

//! Covering host sets.
//!
//! A cover for a collection of shard keys is a set of hosts that contains at
//! least one owner of every key. The exact search enumerates the distinct
//! unions obtained by picking one owner per key (the cartesian product of the
//! owner sets) and keeps those of minimum size. Two reductions keep the
//! enumeration small without changing its result:
//!
//! * an owner set that is a superset of another key's owner set is dropped,
//!   since any host covering the smaller set covers it too;
//! * a partial union that already meets the next owner set is only extended
//!   by the host it already has, since adding another host can only produce
//!   a superset of a cover reachable from it.
//!
//! When the product is still larger than a caller-provided limit, a greedy
//! heuristic is used instead.

use std::collections::{BTreeMap, BTreeSet};

use crate::host::Host;

/// The largest number of owner combinations enumerated exactly.
pub const MAX_COVER_CANDIDATES: usize = 4096;

/// Drop duplicate owner sets and owner sets that are supersets of another.
pub fn reduce(owner_sets: &[BTreeSet<Host>]) -> Vec<BTreeSet<Host>> {
    let mut sets: Vec<BTreeSet<Host>> = owner_sets.to_vec();
    sets.sort_by_key(BTreeSet::len);
    sets.dedup();

    let mut reduced: Vec<BTreeSet<Host>> = Vec::with_capacity(sets.len());
    for set in sets {
        if !reduced.iter().any(|kept| kept.is_subset(&set)) {
            reduced.push(set);
        }
    }
    reduced
}

/// The number of combinations the exact search would enumerate.
pub fn combinations(owner_sets: &[BTreeSet<Host>]) -> usize {
    owner_sets
        .iter()
        .fold(1usize, |acc, set| acc.saturating_mul(set.len()))
}

/// All distinct covers of minimum size, in a deterministic order, or `None`
/// when the enumeration would exceed `limit` combinations.
///
/// Every owner set must be non-empty.
pub fn minimum_covers(
    owner_sets: &[BTreeSet<Host>],
    limit: usize,
) -> Option<Vec<BTreeSet<Host>>> {
    let owner_sets = reduce(owner_sets);
    if combinations(&owner_sets) > limit {
        return None;
    }

    let mut unions: BTreeSet<BTreeSet<Host>> = BTreeSet::new();
    unions.insert(BTreeSet::new());

    for owners in &owner_sets {
        let mut next = BTreeSet::new();
        for partial in unions {
            if !partial.is_disjoint(owners) {
                next.insert(partial);
                continue;
            }
            for host in owners {
                let mut extended = partial.clone();
                extended.insert(host.clone());
                next.insert(extended);
            }
        }
        unions = next;
    }

    let size = unions.iter().map(BTreeSet::len).min()?;
    Some(unions.into_iter().filter(|u| u.len() == size).collect())
}

/// A cover built by repeatedly taking the host that owns the most uncovered
/// sets, ties broken by the larger `weight` and then by host order.
pub fn greedy_cover<W>(owner_sets: &[BTreeSet<Host>], weight: W) -> BTreeSet<Host>
where
    W: Fn(&Host) -> usize,
{
    let mut uncovered: Vec<&BTreeSet<Host>> = owner_sets.iter().collect();
    let mut cover = BTreeSet::new();

    while !uncovered.is_empty() {
        let mut counts: BTreeMap<&Host, usize> = BTreeMap::new();
        for owners in &uncovered {
            for host in owners.iter() {
                *counts.entry(host).or_insert(0) += 1;
            }
        }

        let best = counts.into_iter().max_by(|(ha, ca), (hb, cb)| {
            ca.cmp(cb)
                .then_with(|| weight(ha).cmp(&weight(hb)))
                .then_with(|| hb.cmp(ha))
        });
        let host = match best {
            Some((host, _)) => host.clone(),
            // Only empty owner sets are left
            None => break,
        };

        uncovered.retain(|owners| !owners.contains(&host));
        cover.insert(host);
    }
    cover
}

/// Whether `hosts` contains an owner from every set.
pub fn covers(hosts: &BTreeSet<Host>, owner_sets: &[BTreeSet<Host>]) -> bool {
    owner_sets.iter().all(|owners| !owners.is_disjoint(hosts))
}

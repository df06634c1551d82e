//! Layout engine: turns an object's bytes into a sequence of
//! extents under a named composition rule, and locates the best host to
//! serve a read.

pub mod raid1;
pub mod raid5;

use crate::error::PhoResult;
use crate::model::{Layout, MediumId};

/// Per-split locate result: which host(s), if any, should serve a GET,
/// and how many new locks the locate call had to take to make that host
/// reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateResult {
    /// A specific host should be used.
    Host { hostname: String, new_locks: u32 },
    /// No host has an exclusive advantage; the caller may use the local
    /// host.
    NoPreference,
}

/// A locate-time view of one extent's medium: its id and, if locked,
/// the hostname holding it.
#[derive(Debug, Clone)]
pub struct MediumLockView {
    pub id: MediumId,
    pub locked_by: Option<String>,
}

pub trait Layouter {
    /// Human-readable layout type name, e.g. `"raid1"`.
    fn name(&self) -> &'static str;

    /// `true` once every split of `layout` has reached `sync` and the
    /// owning object may be marked `sync` too.
    fn is_durable(&self, layout: &Layout) -> bool {
        layout.all_synced()
    }
}

/// Implements the host-scoring locate algorithm shared by every layout
/// type: minimize splits the host cannot reach, tie-break by
/// maximizing splits where the host already holds a copy.
pub fn locate(splits: &[Vec<MediumLockView>], local_hostname: &str) -> PhoResult<LocateResult> {
    use std::collections::{HashMap, HashSet};

    if splits.iter().any(|split| split.is_empty()) {
        return Err(crate::error::PhoError::NoDevice(
            "at least one split has no live medium anywhere".into(),
        ));
    }

    // Every split's holders, and whether it has any unlocked medium, so a
    // host discovered only in a later split still gets scored against
    // the splits that came before it.
    let per_split: Vec<(HashSet<&str>, bool)> = splits
        .iter()
        .map(|split| {
            let holders: HashSet<&str> = split.iter().filter_map(|m| m.locked_by.as_deref()).collect();
            let has_unlocked = split.iter().any(|m| m.locked_by.is_none());
            (holders, has_unlocked)
        })
        .collect();
    let every_split_has_unlocked = per_split.iter().all(|(_, has_unlocked)| *has_unlocked);

    let all_hosts: HashSet<String> = per_split
        .iter()
        .flat_map(|(holders, _)| holders.iter().map(|h| h.to_string()))
        .collect();

    let mut unreachable: HashMap<String, u32> = HashMap::new();
    let mut fitted: HashMap<String, u32> = HashMap::new();
    for host in &all_hosts {
        for (holders, has_unlocked) in &per_split {
            let reachable = holders.contains(host.as_str()) || *has_unlocked;
            let fit = holders.contains(host.as_str());
            if !reachable {
                *unreachable.entry(host.clone()).or_insert(0) += 1;
            }
            if fit {
                *fitted.entry(host.clone()).or_insert(0) += 1;
            }
        }
    }

    let best = all_hosts
        .iter()
        .min_by_key(|h| (unreachable.get(*h).copied().unwrap_or(0), std::cmp::Reverse(fitted.get(*h).copied().unwrap_or(0))));

    match best {
        Some(host) => {
            let new_locks = splits
                .iter()
                .filter(|split| {
                    !split.iter().any(|m| m.locked_by.as_deref() == Some(host.as_str())) && split.iter().any(|m| m.locked_by.is_none())
                })
                .count() as u32;
            Ok(LocateResult::Host {
                hostname: host.clone(),
                new_locks,
            })
        }
        None if every_split_has_unlocked => {
            let _ = local_hostname;
            Ok(LocateResult::NoPreference)
        }
        None => Err(crate::error::PhoError::NoDevice(
            "no host can reach every split and some split has no unlocked medium".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(name: &str, locked_by: Option<&str>) -> MediumLockView {
        MediumLockView {
            id: MediumId {
                family: crate::model::MediumFamily::Dir,
                name: name.into(),
            },
            locked_by: locked_by.map(|s| s.to_string()),
        }
    }

    #[test]
    fn prefers_host_holding_every_split() {
        let splits = vec![
            vec![view("a", Some("host-a")), view("b", Some("host-b"))],
            vec![view("c", Some("host-a")), view("d", Some("host-b"))],
        ];
        let result = locate(&splits, "local").unwrap();
        assert_eq!(
            result,
            LocateResult::Host {
                hostname: "host-a".into(),
                new_locks: 0
            }
        );
    }

    #[test]
    fn no_preference_when_every_split_has_an_unlocked_copy() {
        let splits = vec![vec![view("a", None)], vec![view("b", None)]];
        assert_eq!(locate(&splits, "local").unwrap(), LocateResult::NoPreference);
    }

    #[test]
    fn fails_when_a_split_has_no_live_medium() {
        let splits: Vec<Vec<MediumLockView>> = vec![vec![]];
        assert!(locate(&splits, "local").is_err());
    }

    #[test]
    fn a_host_seen_only_in_a_later_split_is_still_charged_for_earlier_splits() {
        // Split 0 is held only by host-a, split 1 only by host-b, and
        // nothing is unlocked anywhere. Both hosts miss exactly one split
        // they don't hold, so they must tie: whichever comes first in
        // hash-set iteration order wins via id, not by an artifact of
        // discovery order.
        let splits = vec![vec![view("a", Some("host-a"))], vec![view("b", Some("host-b"))]];
        let result = locate(&splits, "local").unwrap();
        let LocateResult::Host { hostname, new_locks } = result else {
            panic!("expected a host to be chosen, got {result:?}");
        };
        assert!(hostname == "host-a" || hostname == "host-b");
        // Neither split has an unlocked medium, so the one the winner
        // doesn't hold is simply unreachable, not a lock away.
        assert_eq!(new_locks, 0);
    }
}

// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use derive_new::new;

use crate::proto::cluster;
use crate::Error;
use crate::Key;
use crate::Result;

/// The ID of a region
pub type RegionId = u64;
/// The ID of a store
pub type StoreId = u64;

/// RegionVerId is a unique ID that can identify a region at a specific
/// version. Regions with the same numeric id across time are different
/// regions once their epoch moved.
#[derive(Eq, PartialEq, Hash, Clone, Default, Debug)]
pub struct RegionVerId {
    /// The ID of the region
    pub id: RegionId,
    /// Conf change version, auto increment when a peer is added or removed
    pub conf_ver: u64,
    /// Region version, auto increment on split or merge
    pub ver: u64,
}

/// A region together with the peer the client currently believes is its
/// leader.
///
/// All data is partitioned by range; each partition is called a region. The
/// region meta comes from the metadata service and is immutable here except
/// for the leader, which the failover machinery rewrites in place when it
/// learns better.
#[derive(new, Clone, Default, Debug, PartialEq)]
pub struct RegionWithLeader {
    pub region: cluster::Region,
    pub leader: Option<cluster::Peer>,
}

impl Eq for RegionWithLeader {}

impl RegionWithLeader {
    /// Whether `key` falls in this region's half-open range.
    ///
    /// An empty end key is "+infinity": every key at or past the start key is
    /// contained.
    pub fn contains(&self, key: &Key) -> bool {
        let key: &[u8] = key.into();
        let start_key = &self.region.start_key;
        let end_key = &self.region.end_key;
        key >= start_key.as_slice() && (key < end_key.as_slice() || end_key.is_empty())
    }

    pub fn start_key(&self) -> Key {
        self.region.start_key.to_vec().into()
    }

    pub fn end_key(&self) -> Key {
        self.region.end_key.to_vec().into()
    }

    pub fn range(&self) -> (Key, Key) {
        (self.start_key(), self.end_key())
    }

    pub fn ver_id(&self) -> RegionVerId {
        let region = &self.region;
        let epoch = region.region_epoch.as_ref();
        RegionVerId {
            id: region.id,
            conf_ver: epoch.map(|e| e.conf_ver).unwrap_or_default(),
            ver: epoch.map(|e| e.version).unwrap_or_default(),
        }
    }

    pub fn id(&self) -> RegionId {
        self.region.id
    }

    /// Whether `other` carries the same epoch as this region. A request that
    /// fails against a region under a different epoch must be re-grouped, not
    /// retried.
    pub fn same_epoch(&self, other: &RegionWithLeader) -> bool {
        self.region.region_epoch == other.region.region_epoch
    }

    /// The peers that are not the current leader, in peer order.
    pub fn followers(&self) -> Vec<cluster::Peer> {
        let leader_store = self.leader.as_ref().map(|l| l.store_id);
        self.region
            .peers
            .iter()
            .filter(|peer| Some(peer.store_id) != leader_store)
            .copied()
            .collect()
    }

    pub fn get_store_id(&self) -> Result<StoreId> {
        self.leader
            .as_ref()
            .map(|peer| peer.store_id)
            .ok_or_else(|| Error::LeaderNotFound {
                region: self.ver_id(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::cluster::Peer;
    use crate::proto::cluster::Region;
    use crate::proto::cluster::RegionEpoch;

    fn region(start: Vec<u8>, end: Vec<u8>) -> RegionWithLeader {
        RegionWithLeader {
            region: Region {
                id: 7,
                start_key: start,
                end_key: end,
                region_epoch: Some(RegionEpoch {
                    conf_ver: 1,
                    version: 2,
                }),
                peers: vec![
                    Peer { id: 70, store_id: 1 },
                    Peer { id: 71, store_id: 2 },
                    Peer { id: 72, store_id: 3 },
                ],
            },
            leader: Some(Peer { id: 71, store_id: 2 }),
        }
    }

    #[test]
    fn contains_is_half_open() {
        let r = region(vec![10], vec![20]);
        assert!(!r.contains(&vec![9].into()));
        assert!(r.contains(&vec![10].into()));
        assert!(r.contains(&vec![19, 255].into()));
        assert!(!r.contains(&vec![20].into()));
    }

    #[test]
    fn empty_bounds_are_infinite() {
        let r = region(vec![], vec![]);
        assert!(r.contains(&Key::EMPTY));
        assert!(r.contains(&vec![255, 255].into()));

        let tail = region(vec![200], vec![]);
        assert!(tail.contains(&vec![255].into()));
        assert!(!tail.contains(&vec![199].into()));
    }

    #[test]
    fn followers_exclude_leader_store() {
        let r = region(vec![], vec![]);
        let followers = r.followers();
        assert_eq!(followers.len(), 2);
        assert!(followers.iter().all(|peer| peer.store_id != 2));
    }

    #[test]
    fn ver_id_tracks_epoch() {
        let r = region(vec![], vec![]);
        let ver_id = r.ver_id();
        assert_eq!(ver_id.id, 7);
        assert_eq!(ver_id.conf_ver, 1);
        assert_eq!(ver_id.ver, 2);

        let mut split = r.clone();
        split.region.region_epoch = Some(RegionEpoch {
            conf_ver: 1,
            version: 3,
        });
        assert!(!r.same_epoch(&split));
        assert_ne!(r.ver_id(), split.ver_id());
    }

    #[test]
    fn get_store_id_requires_leader() {
        let mut r = region(vec![], vec![]);
        assert_eq!(r.get_store_id().unwrap(), 2);
        r.leader = None;
        assert!(matches!(
            r.get_store_id(),
            Err(Error::LeaderNotFound { .. })
        ));
    }
}

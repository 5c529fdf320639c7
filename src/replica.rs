// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use log::debug;
use log::warn;

use crate::meta::MetaClient;
use crate::proto::cluster;
use crate::proto::kvpb;
use crate::region::RegionWithLeader;
use crate::region::StoreId;
use crate::router::RegionRouter;
use crate::store::StoreInfo;
use crate::Result;

/// Where the selector currently stands. Forwarding is an attribute of the
/// target rather than a separate dispatch mode, so the state is derived from
/// the selector's fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectorState {
    /// Sending to the store the cached region names as leader.
    DirectLeader,
    /// Probing a follower that may have become leader.
    TryFollowerAsLeader,
    /// Relaying to the (unreachable) target through a follower proxy.
    ProxyForward,
    /// Retry budget spent; the batch fails.
    Exhausted,
}

/// The address an attempt goes to, plus the forward header when a proxy
/// relays it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcTarget {
    pub address: String,
    /// The ultimate store address, set only while proxy-forwarding.
    pub forward_to: Option<String>,
    pub store_id: StoreId,
}

/// Per-request replica choice for one region.
///
/// A selector is constructed for a single batch and owned by its dispatch
/// task; it is never shared. Each failed attempt feeds back through one of
/// the `on_*` event methods, which either re-aim the selector or report that
/// the retry budget is spent.
pub struct ReplicaSelector {
    region: RegionWithLeader,
    target_store: Arc<StoreInfo>,
    origin_store: Option<Arc<StoreInfo>>,
    proxy: Option<cluster::Store>,
    candidate_leader: Option<cluster::Peer>,
    retry_leader_count: usize,
    retry_forward_count: usize,
    enable_forward: bool,
    exhausted: bool,
}

impl ReplicaSelector {
    /// Aim at the region's leader store. A proxy pairing remembered in the
    /// store cache puts the selector straight into forwarding.
    pub async fn new<C: MetaClient>(
        region: RegionWithLeader,
        router: &RegionRouter<C>,
        enable_forward: bool,
    ) -> Result<ReplicaSelector> {
        let leader_store_id = region.get_store_id()?;
        let target_store = router.cache().get_store_by_id(leader_store_id).await?;
        let proxy = target_store.proxy();
        let origin_store = proxy.is_some().then(|| target_store.clone());
        Ok(ReplicaSelector {
            region,
            target_store,
            origin_store,
            proxy,
            candidate_leader: None,
            retry_leader_count: 0,
            retry_forward_count: 0,
            enable_forward,
            exhausted: false,
        })
    }

    pub fn region(&self) -> &RegionWithLeader {
        &self.region
    }

    pub fn state(&self) -> SelectorState {
        if self.exhausted {
            SelectorState::Exhausted
        } else if self.proxy.is_some() {
            SelectorState::ProxyForward
        } else if self.candidate_leader.is_some() {
            SelectorState::TryFollowerAsLeader
        } else {
            SelectorState::DirectLeader
        }
    }

    pub fn is_forwarding(&self) -> bool {
        self.proxy.is_some()
    }

    pub fn rpc_target(&self) -> RpcTarget {
        match &self.proxy {
            Some(proxy) => RpcTarget {
                address: proxy.address.clone(),
                forward_to: Some(self.target_store.address().to_owned()),
                store_id: self.target_store.id(),
            },
            None => RpcTarget {
                address: self.target_store.address().to_owned(),
                forward_to: None,
                store_id: self.target_store.id(),
            },
        }
    }

    /// The routing context for the next attempt. While probing, the peer is
    /// the candidate leader rather than the cached one.
    pub fn context(&self, attempt: usize) -> kvpb::Context {
        kvpb::Context {
            region_id: self.region.id(),
            region_epoch: self.region.region.region_epoch,
            peer: self.candidate_leader.or(self.region.leader),
            is_retry_request: attempt > 0,
        }
    }

    /// Handle a NotLeader response. Returns `false` when the batch's key
    /// range must be re-split (epoch moved), `true` when the selector
    /// re-aimed and the attempt should be retried.
    pub async fn on_not_leader<C: MetaClient>(
        &mut self,
        router: &RegionRouter<C>,
        leader: Option<cluster::Peer>,
        new_region: Option<RegionWithLeader>,
    ) -> Result<bool> {
        if let Some(new_region) = new_region {
            debug!(
                "region {}: not leader, responder names store {:?}",
                self.region.id(),
                new_region.leader.map(|l| l.store_id)
            );
            if !self.region.same_epoch(&new_region) {
                // Epoch moved underneath the request; the batch's keys may now
                // span several regions.
                return Ok(false);
            }
            let Ok(leader_store_id) = new_region.get_store_id() else {
                router.invalidate(self.region.ver_id());
                return Ok(false);
            };
            router.update_leader(self.region.ver_id(), leader_store_id)?;
            self.candidate_leader = None;
            self.proxy = None;
            self.origin_store = None;
            self.region = new_region;
            self.target_store = router.cache().get_store_by_id(leader_store_id).await?;
            return Ok(true);
        }

        if let Some(leader) = leader {
            router.update_leader(self.region.ver_id(), leader.store_id)?;
            self.candidate_leader = None;
            self.proxy = None;
            self.origin_store = None;
            self.region.leader = Some(leader);
            self.target_store = router.cache().get_store_by_id(leader.store_id).await?;
            return Ok(true);
        }

        // The responder does not know the leader either; likely an election
        // in progress. Drop the mapping and let the caller re-route.
        router.invalidate(self.region.ver_id());
        Ok(false)
    }

    /// Handle a RegionNotFound response. The selector is done; the caller
    /// must re-route.
    pub fn on_region_not_found(&mut self) {
        self.candidate_leader = None;
        self.exhausted = true;
    }

    /// Handle a transport-level failure to reach the current target. Returns
    /// `true` when a new target was chosen, `false` when the budget is spent
    /// and the batch fails.
    pub async fn on_store_unreachable<C: MetaClient>(
        &mut self,
        router: &RegionRouter<C>,
    ) -> Result<bool> {
        if self.proxy.is_none() {
            self.target_store.mark_unreachable();
            if self.try_next_follower(router).await? {
                return Ok(true);
            }
            if self.enable_forward && self.try_switch_proxy(router).await? {
                return Ok(true);
            }
        } else {
            // The relay itself failed; blame the proxy, not the target.
            if let Some(proxy) = &self.proxy {
                if let Ok(store) = router.cache().get_store_by_id(proxy.id).await {
                    store.mark_unreachable();
                }
            }
            if self.try_switch_proxy(router).await? {
                return Ok(true);
            }
        }

        self.candidate_leader = None;
        self.exhausted = true;
        router.report_request_fail(&self.region);
        Ok(false)
    }

    /// Record a successful response: promote a candidate leader, or remember
    /// a working proxy pairing.
    pub fn on_success<C: MetaClient>(&mut self, router: &RegionRouter<C>) -> Result<()> {
        if let (Some(origin), Some(proxy)) = (&self.origin_store, &self.proxy) {
            warn!(
                "remember proxy [{}] for store [{}]",
                proxy.address,
                origin.address()
            );
            origin.set_proxy(proxy.clone());
            return Ok(());
        }

        if let Some(candidate) = self.candidate_leader.take() {
            // The follower answered where the leader could not: it is the new
            // leader. Teach the router so future requests skip the search.
            warn!(
                "update leader of region [{}] to store [{}]",
                self.region.id(),
                candidate.store_id
            );
            self.target_store.mark_reachable();
            router.update_leader(self.region.ver_id(), candidate.store_id)?;
        }
        Ok(())
    }

    /// Advance the candidate-leader cursor to the next reachable, valid
    /// follower. The scan is circular starting after the current candidate;
    /// the attempt counter bounds it so the search terminates.
    async fn try_next_follower<C: MetaClient>(
        &mut self,
        router: &RegionRouter<C>,
    ) -> Result<bool> {
        let followers = self.region.followers();
        if self.retry_leader_count >= followers.len() {
            return Ok(false);
        }
        self.retry_leader_count += 1;

        let current = self.candidate_leader.map(|c| c.id);
        let start = current
            .and_then(|id| followers.iter().position(|peer| peer.id == id))
            .map(|pos| pos + 1)
            .unwrap_or(0);
        for offset in 0..followers.len() {
            let peer = &followers[(start + offset) % followers.len()];
            if Some(peer.id) == current {
                continue;
            }
            let store = match router.cache().get_store_by_id(peer.store_id).await {
                Ok(store) => store,
                Err(e) => {
                    debug!("skip follower on store {}: {}", peer.store_id, e);
                    continue;
                }
            };
            if store.is_reachable() && store.is_valid() {
                warn!(
                    "try store [{}], peer [{}] for region [{}], which may be new leader",
                    store.id(),
                    peer.id,
                    self.region.id()
                );
                self.target_store = store;
                self.candidate_leader = Some(*peer);
                self.origin_store = None;
                return Ok(true);
            }
        }

        self.candidate_leader = None;
        self.retry_leader_count = followers.len();
        Ok(false)
    }

    /// Pick the next qualified proxy: a reachable, valid follower store that
    /// is not itself relaying for someone, in peer order after the proxy that
    /// just failed.
    async fn try_switch_proxy<C: MetaClient>(&mut self, router: &RegionRouter<C>) -> Result<bool> {
        let followers = self.region.followers();
        if self.retry_forward_count >= followers.len() + 1 {
            return Ok(false);
        }
        self.retry_forward_count += 1;

        // Forwarding always aims at the leader store; follower probing is
        // abandoned once we start relaying.
        if self.origin_store.is_none() {
            let leader_store_id = self.region.get_store_id()?;
            let leader_store = router.cache().get_store_by_id(leader_store_id).await?;
            self.target_store = leader_store.clone();
            self.origin_store = Some(leader_store);
            self.candidate_leader = None;
        }

        let failed = self.proxy.as_ref().map(|p| p.id);
        let start = failed
            .and_then(|id| followers.iter().position(|peer| peer.store_id == id))
            .map(|pos| pos + 1)
            .unwrap_or(0);
        for offset in 0..followers.len() {
            let peer = &followers[(start + offset) % followers.len()];
            if Some(peer.store_id) == failed || peer.store_id == self.target_store.id() {
                continue;
            }
            let store = match router.cache().get_store_by_id(peer.store_id).await {
                Ok(store) => store,
                Err(e) => {
                    debug!("skip proxy candidate on store {}: {}", peer.store_id, e);
                    continue;
                }
            };
            if store.is_reachable() && store.is_valid() && !store.is_proxy() {
                warn!(
                    "forward requests for store [{}] through store [{}] for region [{}]",
                    self.target_store.address(),
                    store.address(),
                    self.region.id()
                );
                self.proxy = Some(store.meta().clone());
                return Ok(true);
            }
        }

        self.proxy = None;
        Ok(false)
    }

    #[cfg(test)]
    pub(crate) fn retry_counts(&self) -> (usize, usize) {
        (self.retry_leader_count, self.retry_forward_count)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::meta::MetaClient;
    use crate::proto::cluster::Peer;
    use crate::proto::cluster::RegionEpoch;
    use crate::proto::cluster::StoreState;
    use crate::region::RegionId;
    use crate::util::Deadline;
    use crate::Config;
    use crate::Error;
    use crate::Key;

    struct ClusterMeta {
        regions: Mutex<HashMap<RegionId, RegionWithLeader>>,
        stores: Mutex<HashMap<StoreId, cluster::Store>>,
    }

    #[async_trait]
    impl MetaClient for ClusterMeta {
        async fn locate(self: Arc<Self>, key: Vec<u8>) -> Result<RegionWithLeader> {
            let key: Key = key.into();
            self.regions
                .lock()
                .await
                .values()
                .find(|r| r.contains(&key))
                .cloned()
                .ok_or_else(|| Error::RegionForKeyNotFound { key: key.into() })
        }

        async fn store_by_id(self: Arc<Self>, id: StoreId) -> Result<cluster::Store> {
            self.stores
                .lock()
                .await
                .get(&id)
                .cloned()
                .ok_or(Error::StoreNotFound { store_id: id })
        }

        async fn all_stores(self: Arc<Self>) -> Result<Vec<cluster::Store>> {
            Ok(self.stores.lock().await.values().cloned().collect())
        }
    }

    fn store_meta(id: StoreId) -> cluster::Store {
        cluster::Store {
            id,
            address: format!("s{id}:20160"),
            state: StoreState::Up as i32,
        }
    }

    /// One region with peers on stores 1..=n, leader on store 1.
    fn test_region(store_count: u64) -> RegionWithLeader {
        RegionWithLeader {
            region: cluster::Region {
                id: 1,
                start_key: vec![],
                end_key: vec![],
                region_epoch: Some(RegionEpoch {
                    conf_ver: 1,
                    version: 1,
                }),
                peers: (1..=store_count)
                    .map(|id| Peer {
                        id: 100 + id,
                        store_id: id,
                    })
                    .collect(),
            },
            leader: Some(Peer {
                id: 101,
                store_id: 1,
            }),
        }
    }

    async fn cluster(store_count: u64) -> (Arc<ClusterMeta>, RegionRouter<ClusterMeta>) {
        let region = test_region(store_count);
        let meta = Arc::new(ClusterMeta {
            regions: Mutex::new([(1, region)].into()),
            stores: Mutex::new((1..=store_count).map(|id| (id, store_meta(id))).collect()),
        });
        let router = RegionRouter::new(meta.clone(), &Config::default());
        (meta, router)
    }

    async fn selector(
        router: &RegionRouter<ClusterMeta>,
        store_count: u64,
        enable_forward: bool,
    ) -> ReplicaSelector {
        ReplicaSelector::new(test_region(store_count), router, enable_forward)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn starts_aimed_at_leader() {
        let (_, router) = cluster(3).await;
        let s = selector(&router, 3, false).await;
        assert_eq!(s.state(), SelectorState::DirectLeader);
        let target = s.rpc_target();
        assert_eq!(target.address, "s1:20160");
        assert_eq!(target.forward_to, None);
        assert_eq!(s.context(0).peer.unwrap().store_id, 1);
        assert!(!s.context(0).is_retry_request);
        assert!(s.context(1).is_retry_request);
    }

    #[tokio::test]
    async fn unreachable_leader_rotates_followers_without_revisiting() {
        let (_, router) = cluster(3).await;
        let mut s = selector(&router, 3, false).await;

        assert!(s.on_store_unreachable(&router).await.unwrap());
        assert_eq!(s.state(), SelectorState::TryFollowerAsLeader);
        let first = s.rpc_target().store_id;

        assert!(s.on_store_unreachable(&router).await.unwrap());
        let second = s.rpc_target().store_id;
        assert_ne!(first, second);
        assert!(first == 2 || first == 3);
        assert!(second == 2 || second == 3);

        // Two followers, so the third failure exhausts the selector.
        assert!(!s.on_store_unreachable(&router).await.unwrap());
        assert_eq!(s.state(), SelectorState::Exhausted);
        let (leader_retries, forward_retries) = s.retry_counts();
        assert!(leader_retries <= 2);
        assert_eq!(forward_retries, 0);
    }

    #[tokio::test]
    async fn follower_success_promotes_candidate_in_router() {
        let (_, router) = cluster(3).await;
        // Seed the cache so the promotion has an entry to rewrite.
        router
            .lookup(&vec![1].into(), Deadline::from_now(Duration::from_secs(1)))
            .await
            .unwrap();
        let mut s = selector(&router, 3, false).await;

        assert!(s.on_store_unreachable(&router).await.unwrap());
        let candidate_store = s.rpc_target().store_id;
        s.on_success(&router).unwrap();

        let cached = router
            .lookup(&vec![1].into(), Deadline::from_now(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(cached.leader.unwrap().store_id, candidate_store);
    }

    #[tokio::test]
    async fn no_promotion_without_candidate() {
        let (_, router) = cluster(3).await;
        // Seed the cache so we can observe the leader is untouched.
        router
            .lookup(&vec![1].into(), Deadline::from_now(Duration::from_secs(1)))
            .await
            .unwrap();
        let mut s = selector(&router, 3, false).await;
        s.on_success(&router).unwrap();
        let cached = router
            .lookup(&vec![1].into(), Deadline::from_now(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(cached.leader.unwrap().store_id, 1);
    }

    #[tokio::test]
    async fn skips_unreachable_followers() {
        let (_, router) = cluster(3).await;
        // Store 2 is already known bad.
        router
            .cache()
            .get_store_by_id(2)
            .await
            .unwrap()
            .mark_unreachable();

        let mut s = selector(&router, 3, false).await;
        assert!(s.on_store_unreachable(&router).await.unwrap());
        assert_eq!(s.rpc_target().store_id, 3);
    }

    #[tokio::test]
    async fn forwarding_kicks_in_after_leader_search_exhausts() {
        // The client is partitioned from the leader store only: followers
        // answer, but with NotLeader pointing back at store 1. The leader
        // retry counter, not per-store flags, is what ends the search.
        let (_, router) = cluster(3).await;
        router
            .lookup(&vec![1].into(), Deadline::from_now(Duration::from_secs(1)))
            .await
            .unwrap();
        let mut s = selector(&router, 3, true).await;

        for _ in 0..2 {
            // Leader unreachable → probe a follower.
            assert!(s.on_store_unreachable(&router).await.unwrap());
            assert_eq!(s.state(), SelectorState::TryFollowerAsLeader);
            // The follower answers: it is not leader, store 1 still is.
            let handled = s
                .on_not_leader(
                    &router,
                    Some(Peer {
                        id: 101,
                        store_id: 1,
                    }),
                    Some(test_region(3)),
                )
                .await
                .unwrap();
            assert!(handled);
            assert_eq!(s.state(), SelectorState::DirectLeader);
        }

        // Leader-search budget spent → relay through a follower.
        assert!(s.on_store_unreachable(&router).await.unwrap());
        assert_eq!(s.state(), SelectorState::ProxyForward);

        let target = s.rpc_target();
        // The relay goes to a follower address with the leader's address in
        // the forward header.
        assert_eq!(target.forward_to.as_deref(), Some("s1:20160"));
        assert_ne!(target.address, "s1:20160");
        assert_eq!(target.store_id, 1);
    }

    #[tokio::test]
    async fn proxy_success_remembers_pairing() {
        let (_, router) = cluster(2).await;
        router
            .lookup(&vec![1].into(), Deadline::from_now(Duration::from_secs(1)))
            .await
            .unwrap();
        let mut s = selector(&router, 2, true).await;

        // Probe the lone follower, which reports the leader is still store 1.
        assert!(s.on_store_unreachable(&router).await.unwrap());
        assert_eq!(s.state(), SelectorState::TryFollowerAsLeader);
        assert!(s
            .on_not_leader(
                &router,
                Some(Peer {
                    id: 101,
                    store_id: 1,
                }),
                Some(test_region(2)),
            )
            .await
            .unwrap());

        // The leader still cannot be reached directly → forward through the
        // follower.
        assert!(s.on_store_unreachable(&router).await.unwrap());
        assert_eq!(s.state(), SelectorState::ProxyForward);

        s.on_success(&router).unwrap();
        let leader_store = router.cache().get_store_by_id(1).await.unwrap();
        assert_eq!(leader_store.proxy().unwrap().id, 2);

        // A fresh selector for the same region starts in forwarding mode.
        let fresh = selector(&router, 2, true).await;
        assert_eq!(fresh.state(), SelectorState::ProxyForward);
        assert_eq!(fresh.rpc_target().forward_to.as_deref(), Some("s1:20160"));
    }

    #[tokio::test]
    async fn forward_budget_is_followers_plus_one() {
        let (_, router) = cluster(4).await;
        let mut s = selector(&router, 4, true).await;

        // Exhaust follower probing: stores 2, 3, 4 go down as they are tried.
        for _ in 0..3 {
            assert!(s.on_store_unreachable(&router).await.unwrap());
            assert_eq!(s.state(), SelectorState::TryFollowerAsLeader);
            router
                .cache()
                .get_store_by_id(s.rpc_target().store_id)
                .await
                .unwrap()
                .mark_unreachable();
        }

        // Revive the followers so proxy rotation has candidates.
        for id in 2..=4 {
            router
                .cache()
                .get_store_by_id(id)
                .await
                .unwrap()
                .mark_reachable();
        }

        let mut forwards = 0;
        while s.on_store_unreachable(&router).await.unwrap() {
            assert_eq!(s.state(), SelectorState::ProxyForward);
            forwards += 1;
            assert!(forwards <= 4, "forward budget must cap at followers + 1");
        }
        assert_eq!(s.state(), SelectorState::Exhausted);
        let (_, forward_retries) = s.retry_counts();
        assert!(forward_retries <= 4);
    }

    #[tokio::test]
    async fn not_leader_same_epoch_adopts_new_leader() {
        let (_, router) = cluster(3).await;
        // Seed cache.
        router
            .lookup(&vec![1].into(), Deadline::from_now(Duration::from_secs(1)))
            .await
            .unwrap();
        let mut s = selector(&router, 3, false).await;

        let mut new_region = test_region(3);
        new_region.leader = Some(Peer {
            id: 102,
            store_id: 2,
        });
        let handled = s
            .on_not_leader(&router, new_region.leader, Some(new_region))
            .await
            .unwrap();
        assert!(handled);
        assert_eq!(s.state(), SelectorState::DirectLeader);
        assert_eq!(s.rpc_target().store_id, 2);

        // The router learned the new leader too.
        let cached = router
            .lookup(&vec![1].into(), Deadline::from_now(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(cached.leader.unwrap().store_id, 2);
    }

    #[tokio::test]
    async fn not_leader_epoch_change_requires_resplit() {
        let (_, router) = cluster(3).await;
        let mut s = selector(&router, 3, false).await;

        let mut new_region = test_region(3);
        new_region.region.region_epoch = Some(RegionEpoch {
            conf_ver: 1,
            version: 2,
        });
        let handled = s
            .on_not_leader(&router, new_region.leader, Some(new_region))
            .await
            .unwrap();
        assert!(!handled);
    }

    #[tokio::test]
    async fn region_not_found_exhausts_selector() {
        let (_, router) = cluster(3).await;
        let mut s = selector(&router, 3, false).await;
        assert!(s.on_store_unreachable(&router).await.unwrap());
        s.on_region_not_found();
        assert_eq!(s.state(), SelectorState::Exhausted);
    }
}

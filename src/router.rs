// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::warn;
use tokio::time::timeout;

use crate::meta::MetaClient;
use crate::region::RegionVerId;
use crate::region::RegionWithLeader;
use crate::region::StoreId;
use crate::region_cache::RegionCache;
use crate::util::Deadline;
use crate::Config;
use crate::Error;
use crate::Key;
use crate::Result;

/// Maps keys to the regions that own them.
///
/// The router fronts the process-wide [`RegionCache`]: lookups consult the
/// cache first and read through to the metadata service on a miss. Failover
/// feedback (`update_leader`, `report_request_fail`) flows back through the
/// router so later requests route better.
pub struct RegionRouter<C> {
    cache: RegionCache<C>,
}

impl<C> RegionRouter<C> {
    pub fn new(meta_client: Arc<C>, config: &Config) -> RegionRouter<C> {
        RegionRouter {
            cache: RegionCache::new_with_ttl(
                meta_client,
                config.region_cache_ttl,
                config.region_cache_ttl_jitter,
            ),
        }
    }

    pub(crate) fn cache(&self) -> &RegionCache<C> {
        &self.cache
    }

    /// Drop the cached mapping for a region.
    pub fn invalidate(&self, ver_id: RegionVerId) {
        self.cache.invalidate_region(ver_id);
    }

    /// Rewrite the cached leader of a region to the peer on `new_store_id`.
    pub fn update_leader(&self, ver_id: RegionVerId, new_store_id: StoreId) -> Result<()> {
        self.cache.update_leader(ver_id, new_store_id)
    }

    /// A request against this region exhausted its failover budget: drop the
    /// cached mapping so the next lookup re-resolves from the metadata
    /// service.
    pub fn report_request_fail(&self, region: &RegionWithLeader) {
        warn!(
            "request failed terminally for region {}, invalidating cached route",
            region.id()
        );
        self.cache.invalidate_region(region.ver_id());
    }
}

impl<C: MetaClient> RegionRouter<C> {
    /// The region owning `key`.
    ///
    /// Fails with [`Error::RoutingUnavailable`] once `deadline` elapses; the
    /// metadata service is given exactly the remaining budget.
    pub async fn lookup(&self, key: &Key, deadline: Deadline) -> Result<RegionWithLeader> {
        let Some(remaining) = deadline.remaining() else {
            return Err(Error::RoutingUnavailable {
                message: "deadline elapsed before region lookup".to_owned(),
            });
        };
        match timeout(remaining, self.cache.get_region_by_key(key)).await {
            Ok(result) => result,
            Err(_) => Err(Error::RoutingUnavailable {
                message: format!("region lookup timed out after {remaining:?}"),
            }),
        }
    }

    /// Partition `keys` by owning region.
    ///
    /// Input duplicates collapse (set semantics). Groups come back in
    /// ascending region order and the keys inside each group ascend. Sorting
    /// first means one lookup amortizes over every key the region owns.
    pub async fn group_by_region(
        &self,
        keys: impl IntoIterator<Item = impl Into<Key>>,
        deadline: Deadline,
    ) -> Result<Vec<(RegionWithLeader, Vec<Key>)>> {
        let keys: BTreeSet<Key> = keys.into_iter().map(Into::into).collect();
        let mut groups: Vec<(RegionWithLeader, Vec<Key>)> = Vec::new();
        for key in keys {
            match groups.last_mut() {
                Some((region, group)) if region.contains(&key) => group.push(key),
                _ => {
                    let region = self.lookup(&key, deadline).await?;
                    groups.push((region, vec![key]));
                }
            }
        }
        Ok(groups)
    }
}

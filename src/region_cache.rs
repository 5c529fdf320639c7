// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use rand::thread_rng;
use rand::Rng;
use tokio::sync::Mutex;

use crate::meta::MetaClient;
use crate::region::RegionId;
use crate::region::RegionVerId;
use crate::region::RegionWithLeader;
use crate::region::StoreId;
use crate::store::StoreInfo;
use crate::Key;
use crate::Result;

/// How long a learned route is trusted.
///
/// Expiry is jittered so routes learned together do not all come due
/// together. A zero base disables expiry entirely.
#[derive(Clone, Copy, Debug)]
struct RouteTtl {
    base: Duration,
    jitter: Duration,
}

impl RouteTtl {
    fn new(base: Duration, jitter: Duration) -> RouteTtl {
        RouteTtl { base, jitter }
    }

    /// The instant a route learned `now` stops being trusted. `None` means
    /// it never does.
    fn expiry(&self, now: Instant) -> Option<Instant> {
        if self.base.is_zero() {
            return None;
        }
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms > 0 {
            Duration::from_millis(thread_rng().gen_range(0..jitter_ms))
        } else {
            Duration::ZERO
        };
        now.checked_add(self.base)
            .and_then(|at| at.checked_add(extra))
    }
}

/// One cached route and the moment it stops being trusted.
struct Route {
    region: RegionWithLeader,
    expires_at: Option<Instant>,
}

impl Route {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// The route index.
///
/// Live regions tile the keyspace without overlap, so routes are keyed by
/// their start key and the owner of a key is the entry with the greatest
/// start key at or below it. `start_by_id` gives the failover paths (leader
/// updates, invalidation) direct access by region id.
///
/// Invariant: no two routes in `by_start` have intersecting ranges, and
/// `start_by_id` maps exactly the ids present in `by_start`.
#[derive(Default)]
struct RouteTable {
    by_start: BTreeMap<Key, Route>,
    start_by_id: HashMap<RegionId, Key>,
}

impl RouteTable {
    /// The fresh route owning `key`, if any.
    fn find(&self, key: &Key, now: Instant) -> Option<RegionWithLeader> {
        let (_, route) = self.by_start.range(..=key).next_back()?;
        if route.is_fresh(now) && route.region.contains(key) {
            Some(route.region.clone())
        } else {
            None
        }
    }

    /// Install a route, displacing every cached route its range covers.
    ///
    /// The incoming region is always the authority: it was either just
    /// resolved from the metadata service or attached to a response under a
    /// newer epoch, so anything it overlaps is stale by construction.
    fn insert(&mut self, region: RegionWithLeader, expires_at: Option<Instant>) {
        let start = region.start_key();
        let end = region.end_key();

        let mut stale: Vec<Key> = Vec::new();
        // The route starting just below may spill into the new range.
        if let Some((neighbor_start, neighbor)) = self.by_start.range(..&start).next_back() {
            let neighbor_end = neighbor.region.end_key();
            if neighbor_end.is_empty() || neighbor_end > start {
                stale.push(neighbor_start.clone());
            }
        }
        // Everything starting inside the new range is covered by it.
        let covered = if end.is_empty() {
            self.by_start.range(&start..)
        } else {
            self.by_start.range(&start..&end)
        };
        stale.extend(covered.map(|(covered_start, _)| covered_start.clone()));

        for stale_start in stale {
            if let Some(route) = self.by_start.remove(&stale_start) {
                self.start_by_id.remove(&route.region.id());
            }
        }
        // After a merge the region's previous incarnation can sit anywhere.
        if let Some(old_start) = self.start_by_id.remove(&region.id()) {
            self.by_start.remove(&old_start);
        }

        self.start_by_id.insert(region.id(), start.clone());
        self.by_start.insert(start, Route { region, expires_at });
    }

    /// The route for exactly this region incarnation, or `None` when the
    /// slot is empty or a fresher incarnation took it.
    fn get_mut(&mut self, ver_id: &RegionVerId) -> Option<&mut Route> {
        let start = self.start_by_id.get(&ver_id.id)?.clone();
        let route = self.by_start.get_mut(&start)?;
        (route.region.ver_id() == *ver_id).then_some(route)
    }

    fn remove(&mut self, ver_id: &RegionVerId) {
        let Some(start) = self.start_by_id.get(&ver_id.id) else {
            return;
        };
        if let Some(route) = self.by_start.get(start) {
            if route.region.ver_id() != *ver_id {
                return;
            }
        }
        let start = start.clone();
        self.by_start.remove(&start);
        self.start_by_id.remove(&ver_id.id);
    }
}

/// Process-wide routing state shared by every request.
///
/// Map access happens in short synchronous critical sections; no lock is
/// held across a metadata round trip. A lookup racing an invalidation may
/// observe either state, which is safe: invalidation only ever sends callers
/// back to the metadata service.
pub struct RegionCache<C> {
    routes: RwLock<RouteTable>,
    stores: RwLock<HashMap<StoreId, Arc<StoreInfo>>>,
    /// Serializes route read-throughs. Concurrent misses queue here; the
    /// first resolves and fills the table, the rest are answered by the
    /// re-check and skip their own metadata round trip.
    load_gate: Mutex<()>,
    meta_client: Arc<C>,
    ttl: RouteTtl,
}

impl<C> RegionCache<C> {
    pub fn new_with_ttl(
        meta_client: Arc<C>,
        region_cache_ttl: Duration,
        region_cache_ttl_jitter: Duration,
    ) -> RegionCache<C> {
        RegionCache {
            routes: RwLock::new(RouteTable::default()),
            stores: RwLock::new(HashMap::new()),
            load_gate: Mutex::new(()),
            meta_client,
            ttl: RouteTtl::new(region_cache_ttl, region_cache_ttl_jitter),
        }
    }

    fn routes(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.routes.read().unwrap_or_else(|poison| poison.into_inner())
    }

    fn routes_mut(&self) -> RwLockWriteGuard<'_, RouteTable> {
        self.routes
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Cache a region learned out of band, e.g. attached to a routing error.
    pub fn add_region(&self, region: RegionWithLeader) {
        let expires_at = self.ttl.expiry(Instant::now());
        self.routes_mut().insert(region, expires_at);
    }

    /// Rewrite the cached leader of a region to the peer on `new_store_id`,
    /// leaving range and epoch untouched. A leader update re-validates the
    /// route, so its expiry restarts.
    ///
    /// If the cached region has no peer on that store, the route is dropped
    /// instead: the cached membership must be stale.
    pub fn update_leader(&self, ver_id: RegionVerId, new_store_id: StoreId) -> Result<()> {
        let mut routes = self.routes_mut();
        let Some(route) = routes.get_mut(&ver_id) else {
            return Ok(());
        };
        let new_leader = route
            .region
            .region
            .peers
            .iter()
            .find(|peer| peer.store_id == new_store_id)
            .copied();
        if let Some(new_leader) = new_leader {
            route.region.leader = Some(new_leader);
            route.expires_at = self.ttl.expiry(Instant::now());
            return Ok(());
        }
        debug!(
            "no peer on store {} in cached region {}, dropping route",
            new_store_id, ver_id.id
        );
        routes.remove(&ver_id);
        Ok(())
    }

    /// Drop the cached route for a region incarnation.
    pub fn invalidate_region(&self, ver_id: RegionVerId) {
        self.routes_mut().remove(&ver_id);
    }
}

impl<C: MetaClient> RegionCache<C> {
    /// The region owning `key`: from the table when a fresh route is cached,
    /// from the metadata service otherwise.
    pub async fn get_region_by_key(&self, key: &Key) -> Result<RegionWithLeader> {
        if let Some(region) = self.routes().find(key, Instant::now()) {
            return Ok(region);
        }

        let _load = self.load_gate.lock().await;
        if let Some(region) = self.routes().find(key, Instant::now()) {
            return Ok(region);
        }
        let region = self.meta_client.clone().locate(key.clone().into()).await?;
        self.add_region(region.clone());
        Ok(region)
    }

    /// The shared handle for a store, dialing the metadata service on a
    /// miss. Handles are shared on purpose: reachability flags and remembered
    /// proxies must be visible to every selector at once, so on a racing
    /// read-through the first writer wins and the rest adopt its handle.
    pub async fn get_store_by_id(&self, id: StoreId) -> Result<Arc<StoreInfo>> {
        let cached = {
            let stores = self.stores.read().unwrap_or_else(|poison| poison.into_inner());
            stores.get(&id).cloned()
        };
        if let Some(store) = cached {
            return Ok(store);
        }

        let meta = self.meta_client.clone().store_by_id(id).await?;
        let store = Arc::new(StoreInfo::new(meta));
        let mut stores = self
            .stores
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        Ok(stores.entry(id).or_insert(store).clone())
    }
}

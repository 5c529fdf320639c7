// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Test doubles for the metadata service and the store RPC layer.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::meta::MetaClient;
use crate::proto::cluster;
use crate::region::RegionId;
use crate::region::RegionWithLeader;
use crate::region::StoreId;
use crate::store::KvClient;
use crate::store::KvConnect;
use crate::store::Request;
use crate::Error;
use crate::Key;
use crate::Result;

/// An in-memory metadata service.
#[derive(Default)]
pub struct MockMetaClient {
    pub regions: Mutex<HashMap<RegionId, RegionWithLeader>>,
    pub stores: Mutex<HashMap<StoreId, cluster::Store>>,
}

impl MockMetaClient {
    pub async fn with_cluster(
        regions: Vec<RegionWithLeader>,
        stores: Vec<cluster::Store>,
    ) -> Arc<MockMetaClient> {
        let meta = MockMetaClient::default();
        *meta.regions.lock().await = regions.into_iter().map(|r| (r.id(), r)).collect();
        *meta.stores.lock().await = stores.into_iter().map(|s| (s.id, s)).collect();
        Arc::new(meta)
    }
}

#[async_trait]
impl MetaClient for MockMetaClient {
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

/// Answers every RPC a dispatched request makes.
///
/// The hook sees the dialed address, the request, and the forward header, so
/// tests can fail specific stores, delay answers, or verify relaying. It
/// returns a future so delays suspend instead of blocking the executor.
pub type DispatchHook = Arc<
    dyn Fn(&str, &dyn Request, Option<&str>) -> BoxFuture<'static, Result<Box<dyn Any>>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct MockKvConnect {
    hook: DispatchHook,
}

impl MockKvConnect {
    pub fn new(hook: DispatchHook) -> MockKvConnect {
        MockKvConnect { hook }
    }
}

#[async_trait]
impl KvConnect for MockKvConnect {
    type KvClient = MockKvClient;

    async fn connect(&self, address: &str) -> Result<MockKvClient> {
        Ok(MockKvClient {
            address: address.to_owned(),
            hook: self.hook.clone(),
        })
    }
}

#[derive(Clone)]
pub struct MockKvClient {
    pub address: String,
    hook: DispatchHook,
}

#[async_trait]
impl KvClient for MockKvClient {
    async fn dispatch(
        &self,
        req: &dyn Request,
        _timeout: Duration,
        forward_to: Option<&str>,
    ) -> Result<Box<dyn Any>> {
        (self.hook)(&self.address, req, forward_to).await
    }
}

/// Cluster fixtures shared by dispatcher tests.
pub fn store(id: StoreId) -> cluster::Store {
    cluster::Store {
        id,
        address: format!("s{id}:20160"),
        state: cluster::StoreState::Up as i32,
    }
}

pub fn region_with_peers(
    id: RegionId,
    start: Vec<u8>,
    end: Vec<u8>,
    store_ids: &[StoreId],
) -> RegionWithLeader {
    RegionWithLeader {
        region: cluster::Region {
            id,
            start_key: start,
            end_key: end,
            region_epoch: Some(cluster::RegionEpoch {
                conf_ver: 1,
                version: 1,
            }),
            peers: store_ids
                .iter()
                .map(|store_id| cluster::Peer {
                    id: id * 100 + *store_id,
                    store_id: *store_id,
                })
                .collect(),
        },
        leader: store_ids.first().map(|store_id| cluster::Peer {
            id: id * 100 + *store_id,
            store_id: *store_id,
        }),
    }
}

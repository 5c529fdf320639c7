// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use tokio::time::sleep;

use super::MetaClient;
use crate::config::MetaRetryConfig;
use crate::proto::cluster;
use crate::region::RegionWithLeader;
use crate::region::StoreId;
use crate::Error;
use crate::Result;

/// Wraps a [`MetaClient`] with bounded retries.
///
/// Metadata lookups sit on the hot path of every cache miss, so transient
/// failures (a metadata-service leader change, a dropped connection) are
/// retried a few times with a fixed reconnect interval before the routing
/// layer reports `RoutingUnavailable`.
pub struct RetryMetaClient<C> {
    inner: Arc<C>,
    config: MetaRetryConfig,
}

impl<C> RetryMetaClient<C> {
    pub fn new(inner: Arc<C>, config: MetaRetryConfig) -> RetryMetaClient<C> {
        RetryMetaClient { inner, config }
    }
}

impl<C: MetaClient> RetryMetaClient<C> {
    async fn with_retry<T, F, Fut>(&self, label: &'static str, f: F) -> Result<T>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for attempt in 0..self.config.max_retry_attempts.max(1) {
            if attempt > 0 {
                sleep(self.config.reconnect_interval).await;
            }
            match f(self.inner.clone()).await {
                Ok(value) => return Ok(value),
                // A missing region or store is an answer, not an outage.
                Err(e @ Error::RegionForKeyNotFound { .. })
                | Err(e @ Error::StoreNotFound { .. }) => return Err(e),
                Err(e) => {
                    warn!("meta {label} attempt {attempt} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(Error::RoutingUnavailable {
            message: format!(
                "meta {label} failed after {} attempts: {}",
                self.config.max_retry_attempts.max(1),
                last_err.map(|e| e.to_string()).unwrap_or_default()
            ),
        })
    }
}

#[async_trait]
impl<C: MetaClient> MetaClient for RetryMetaClient<C> {
    async fn locate(self: Arc<Self>, key: Vec<u8>) -> Result<RegionWithLeader> {
        self.with_retry("locate", |inner| {
            let key = key.clone();
            async move { inner.locate(key).await }
        })
        .await
    }

    async fn store_by_id(self: Arc<Self>, id: StoreId) -> Result<cluster::Store> {
        self.with_retry("store_by_id", |inner| async move {
            inner.store_by_id(id).await
        })
        .await
    }

    async fn all_stores(self: Arc<Self>) -> Result<Vec<cluster::Store>> {
        self.with_retry("all_stores", |inner| async move {
            inner.all_stores().await
        })
        .await
    }
}

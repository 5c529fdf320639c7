// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::debug;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio::time::timeout;

use crate::backoff::Backoff;
use crate::batch::Batch;
use crate::common::routing_error_into_error;
use crate::meta::MetaClient;
use crate::proto::kvpb;
use crate::replica::ReplicaSelector;
use crate::router::RegionRouter;
use crate::store::HasRegionError;
use crate::store::KvClient;
use crate::store::KvClientPool;
use crate::store::KvConnect;
use crate::store::Request;
use crate::util::Deadline;
use crate::util::Interrupt;
use crate::Config;
use crate::Error;
use crate::KvPair;
use crate::Result;

/// Fans batches out to their replica endpoints and gathers a stable result.
///
/// One task runs per batch, bounded by a worker pool of
/// `config.worker_pool_size` permits. Each task owns a [`ReplicaSelector`]
/// and retries until success, terminal failure, or its deadline. Completion
/// order is arbitrary; read results are re-sorted by key before returning so
/// callers see deterministic output.
pub struct Dispatcher<C, KvC: KvConnect> {
    router: Arc<RegionRouter<C>>,
    clients: Arc<KvClientPool<KvC>>,
    config: Config,
    backoff: Backoff,
}

impl<C: MetaClient, KvC: KvConnect> Dispatcher<C, KvC> {
    pub fn new(
        router: Arc<RegionRouter<C>>,
        clients: Arc<KvClientPool<KvC>>,
        config: Config,
        backoff: Backoff,
    ) -> Dispatcher<C, KvC> {
        Dispatcher {
            router,
            clients,
            config,
            backoff,
        }
    }

    pub fn router(&self) -> &Arc<RegionRouter<C>> {
        &self.router
    }

    /// Dispatch read batches and return their pairs sorted ascending by key.
    pub async fn dispatch(
        &self,
        batches: Vec<Batch>,
        interrupt: Interrupt,
    ) -> Result<Vec<KvPair>> {
        let responses: Vec<kvpb::BatchGetResponse> = self
            .fan_out(&batches, interrupt, |batch, context| {
                kvpb::BatchGetRequest {
                    context: Some(context),
                    keys: batch.keys.iter().map(|key| key.clone().into()).collect(),
                }
            })
            .await?;

        let mut pairs: Vec<KvPair> = responses
            .into_iter()
            .flat_map(|resp| resp.pairs)
            .map(KvPair::from)
            .collect();
        pairs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(pairs)
    }

    /// Dispatch write batches. Returns once every batch is acknowledged;
    /// there is no cross-batch atomicity.
    pub async fn dispatch_void(&self, batches: Vec<Batch>, interrupt: Interrupt) -> Result<()> {
        for batch in &batches {
            let value_count = batch.values.as_ref().map(Vec::len);
            if value_count != Some(batch.keys.len()) {
                return Err(crate::internal_err!(
                    "write batch for region {} carries {} keys but {:?} values",
                    batch.region.id(),
                    batch.keys.len(),
                    value_count
                ));
            }
        }

        self.fan_out::<_, kvpb::BatchPutResponse, _>(&batches, interrupt, |batch, context| {
            let values = batch.values.as_deref().unwrap_or_default();
            kvpb::BatchPutRequest {
                context: Some(context),
                pairs: batch
                    .keys
                    .iter()
                    .zip(values)
                    .map(|(key, value)| kvpb::KvPair {
                        key: key.clone().into(),
                        value: value.clone(),
                    })
                    .collect(),
            }
        })
        .await?;
        Ok(())
    }

    /// Submit one task per batch and drain completions.
    ///
    /// The first terminal failure is surfaced verbatim; dropping the task set
    /// on that path cancels in-flight attempts without awaiting them. Caller
    /// interruption is observed between completions and inside every task.
    async fn fan_out<Req, Resp, F>(
        &self,
        batches: &[Batch],
        interrupt: Interrupt,
        make: F,
    ) -> Result<Vec<Resp>>
    where
        Req: Request,
        Resp: HasRegionError + Send + 'static,
        F: Fn(&Batch, kvpb::Context) -> Req + Sync,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));
        let per_batch_deadline = self.config.per_batch_deadline;
        let make = &make;

        let mut tasks: FuturesUnordered<_> = batches
            .iter()
            .map(|batch| {
                let semaphore = semaphore.clone();
                let interrupt = interrupt.clone();
                async move {
                    let _permit = semaphore.acquire().await.map_err(|e| {
                        crate::internal_err!("worker pool closed while submitting: {:?}", e)
                    })?;
                    interrupt.check()?;
                    let deadline = Deadline::from_now(per_batch_deadline);
                    match timeout(
                        per_batch_deadline,
                        self.run_batch(batch, deadline, &interrupt, |context| {
                            make(batch, context)
                        }),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout),
                    }
                }
            })
            .collect();

        let mut results = Vec::with_capacity(batches.len());
        loop {
            let next = tokio::select! {
                next = tasks.next() => next,
                _ = interrupt.interrupted() => return Err(Error::Interrupted),
            };
            match next {
                Some(result) => results.push(result?),
                None => break,
            }
        }
        Ok(results)
    }

    /// Run one batch to completion: attempt, classify the failure, let the
    /// selector re-aim, back off, repeat.
    async fn run_batch<Req, Resp, F>(
        &self,
        batch: &Batch,
        deadline: Deadline,
        interrupt: &Interrupt,
        make: F,
    ) -> Result<Resp>
    where
        Req: Request,
        Resp: HasRegionError + Send + 'static,
        F: Fn(kvpb::Context) -> Req,
    {
        let mut selector =
            ReplicaSelector::new(batch.region.clone(), &self.router, self.config.enable_forward)
                .await?;
        let mut backoff = self.backoff.clone();
        let mut attempt = 0usize;

        loop {
            interrupt.check()?;
            let target = selector.rpc_target();
            let client = self.clients.client(&target.address).await?;
            let request = make(selector.context(attempt));
            attempt += 1;

            let remaining = deadline.remaining().ok_or(Error::Timeout)?;
            let rpc_timeout = if selector.is_forwarding() {
                remaining.min(self.config.forward_deadline)
            } else {
                remaining
            };

            let outcome = tokio::select! {
                outcome = client.dispatch(&request, rpc_timeout, target.forward_to.as_deref()) => outcome,
                _ = interrupt.interrupted() => return Err(Error::Interrupted),
            };

            let error = match outcome {
                Ok(boxed) => {
                    let mut resp = *boxed.downcast::<Resp>().map_err(|_| {
                        crate::internal_err!("store returned an unexpected response type")
                    })?;
                    match resp.region_error() {
                        Some(region_error) => {
                            routing_error_into_error(region_error, selector.region())
                        }
                        None => {
                            selector.on_success(&self.router)?;
                            return Ok(resp);
                        }
                    }
                }
                Err(Error::Rpc(status)) => {
                    Error::from_status(status, target.store_id, &target.address)
                }
                Err(other) => return Err(other),
            };
            debug!(
                "batch for region {} attempt {} failed: {}",
                batch.region.id(),
                attempt,
                error
            );

            match error {
                Error::NotLeader {
                    leader, new_region, ..
                } => {
                    if let Some(new_region) = &new_region {
                        if !selector.region().same_epoch(new_region) {
                            // The region split or merged; these keys may now
                            // belong to several regions, so the caller must
                            // re-group.
                            let new_region = *new_region.clone();
                            self.router.invalidate(selector.region().ver_id());
                            return Err(Error::EpochNotMatch(vec![new_region.region]));
                        }
                    }
                    let new_region = new_region.map(|boxed| *boxed);
                    if selector
                        .on_not_leader(&self.router, leader, new_region)
                        .await?
                    {
                        // Re-aimed at the real leader; retry without
                        // consuming backoff budget.
                        continue;
                    }
                    // Nobody knows the leader: an election is running. Wait
                    // for the cluster to converge.
                    match backoff.next_delay_duration() {
                        Some(delay) => self.backoff_sleep(delay, interrupt).await?,
                        None => {
                            return Err(Error::BatchFailed(Box::new(Error::NotLeader {
                                region: selector.region().ver_id(),
                                leader: None,
                                new_region: None,
                            })))
                        }
                    }
                }
                Error::EpochNotMatch(current_regions) => {
                    self.router.invalidate(selector.region().ver_id());
                    return Err(Error::EpochNotMatch(current_regions));
                }
                Error::RegionNotFound { region_id } => {
                    selector.on_region_not_found();
                    self.router.invalidate(selector.region().ver_id());
                    return Err(Error::RegionNotFound { region_id });
                }
                Error::StoreUnreachable { store_id, address } => {
                    if !selector.on_store_unreachable(&self.router).await? {
                        return Err(Error::BatchFailed(Box::new(Error::StoreUnreachable {
                            store_id,
                            address,
                        })));
                    }
                    match backoff.next_delay_duration() {
                        Some(delay) => self.backoff_sleep(delay, interrupt).await?,
                        None => {
                            return Err(Error::BatchFailed(Box::new(Error::StoreUnreachable {
                                store_id,
                                address,
                            })))
                        }
                    }
                }
                terminal => return Err(terminal),
            }
        }
    }

    /// Back-off sleeps consume the deadline budget and observe interruption.
    async fn backoff_sleep(&self, delay: std::time::Duration, interrupt: &Interrupt) -> Result<()> {
        tokio::select! {
            _ = sleep(delay) => Ok(()),
            _ = interrupt.interrupted() => Err(Error::Interrupted),
        }
    }
}

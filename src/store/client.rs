// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use derive_new::new;
use log::info;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;

use crate::proto::kvpb;
use crate::Error;
use crate::Result;
use crate::SecurityManager;

/// Request-scoped metadata key carrying the ultimate target address while a
/// follower relays the request.
pub const FORWARD_METADATA_KEY: &str = "rangekv-forwarded-host";

/// A request the store service understands.
#[async_trait]
pub trait Request: Any + Sync + Send + 'static {
    async fn dispatch(
        &self,
        channel: &Channel,
        timeout: Duration,
        forward_to: Option<&str>,
    ) -> Result<Box<dyn Any>>;
    fn label(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

async fn unary<M1, M2>(
    channel: &Channel,
    path: &'static str,
    message: M1,
    timeout: Duration,
    forward_to: Option<&str>,
) -> Result<M2>
where
    M1: prost::Message + 'static,
    M2: prost::Message + Default + 'static,
{
    let mut grpc = tonic::client::Grpc::new(channel.clone());
    grpc.ready()
        .await
        .map_err(|e| Error::Rpc(tonic::Status::unknown(format!("service not ready: {e}"))))?;

    let mut request = tonic::Request::new(message);
    request.set_timeout(timeout);
    if let Some(host) = forward_to {
        let value = MetadataValue::try_from(host)
            .map_err(|e| crate::internal_err!("invalid forward host {}: {}", host, e))?;
        request.metadata_mut().insert(FORWARD_METADATA_KEY, value);
    }

    let codec: ProstCodec<M1, M2> = ProstCodec::default();
    grpc.unary(request, PathAndQuery::from_static(path), codec)
        .await
        .map(|resp| resp.into_inner())
        .map_err(Error::Rpc)
}

macro_rules! impl_request {
    ($name: ident, $resp: ident, $path: literal, $label: literal) => {
        #[async_trait]
        impl Request for kvpb::$name {
            async fn dispatch(
                &self,
                channel: &Channel,
                timeout: Duration,
                forward_to: Option<&str>,
            ) -> Result<Box<dyn Any>> {
                unary::<kvpb::$name, kvpb::$resp>(
                    channel,
                    $path,
                    self.clone(),
                    timeout,
                    forward_to,
                )
                .await
                .map(|resp| Box::new(resp) as Box<dyn Any>)
            }

            fn label(&self) -> &'static str {
                $label
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

impl_request!(
    BatchGetRequest,
    BatchGetResponse,
    "/rangekv.Kv/BatchGet",
    "batch_get"
);
impl_request!(
    BatchPutRequest,
    BatchPutResponse,
    "/rangekv.Kv/BatchPut",
    "batch_put"
);

/// A trait for connecting to stores.
#[async_trait]
pub trait KvConnect: Sized + Send + Sync + 'static {
    type KvClient: KvClient + Clone + Send + Sync + 'static;

    async fn connect(&self, address: &str) -> Result<Self::KvClient>;
}

#[derive(new, Clone)]
pub struct GrpcConnect {
    security_mgr: Arc<SecurityManager>,
}

#[async_trait]
impl KvConnect for GrpcConnect {
    type KvClient = KvRpcClient;

    async fn connect(&self, address: &str) -> Result<KvRpcClient> {
        self.security_mgr
            .connect(address, KvRpcClient::new)
            .await
    }
}

#[async_trait]
pub trait KvClient {
    async fn dispatch(
        &self,
        req: &dyn Request,
        timeout: Duration,
        forward_to: Option<&str>,
    ) -> Result<Box<dyn Any>>;
}

/// Handles requests for a single store over one shared channel.
#[derive(new, Clone)]
pub struct KvRpcClient {
    channel: Channel,
}

#[async_trait]
impl KvClient for KvRpcClient {
    async fn dispatch(
        &self,
        request: &dyn Request,
        timeout: Duration,
        forward_to: Option<&str>,
    ) -> Result<Box<dyn Any>> {
        request.dispatch(&self.channel, timeout, forward_to).await
    }
}

/// Lazily dialed, shared clients keyed by store address.
///
/// Dialing is deduplicated per address: concurrent callers for the same
/// address wait on one `OnceCell` initialization instead of racing dials.
pub struct KvClientPool<KvC: KvConnect> {
    connect: KvC,
    clients: tokio::sync::RwLock<HashMap<String, Arc<tokio::sync::OnceCell<KvC::KvClient>>>>,
}

impl<KvC: KvConnect> KvClientPool<KvC> {
    pub fn new(connect: KvC) -> KvClientPool<KvC> {
        KvClientPool {
            connect,
            clients: Default::default(),
        }
    }

    pub async fn client(&self, address: &str) -> Result<KvC::KvClient> {
        let cached = { self.clients.read().await.get(address).cloned() };
        let cell = match cached {
            Some(cell) => cell,
            None => {
                let new = Arc::new(tokio::sync::OnceCell::new());
                self.clients
                    .write()
                    .await
                    .entry(address.to_owned())
                    .or_insert_with(|| new.clone())
                    .clone()
            }
        };

        let client = cell
            .get_or_try_init(|| async {
                info!("connect to store endpoint: {:?}", address);
                self.connect.connect(address).await
            })
            .await?;
        Ok(client.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use tokio::sync::watch;
    use tokio::sync::Barrier;

    use super::*;

    #[derive(Clone)]
    struct CountingClient {
        addr: String,
    }

    #[async_trait]
    impl KvClient for CountingClient {
        async fn dispatch(
            &self,
            _req: &dyn Request,
            _timeout: Duration,
            _forward_to: Option<&str>,
        ) -> Result<Box<dyn Any>> {
            Ok(Box::new(self.addr.clone()))
        }
    }

    #[derive(Clone)]
    struct CountingConnect {
        calls: Arc<AtomicUsize>,
        release_rx: watch::Receiver<bool>,
    }

    #[async_trait]
    impl KvConnect for CountingConnect {
        type KvClient = CountingClient;

        async fn connect(&self, address: &str) -> Result<CountingClient> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            // Hold the dial so other tasks can race on `client`.
            let mut rx = self.release_rx.clone();
            while !*rx.borrow() {
                rx.changed().await.expect("watch sender dropped");
            }

            Ok(CountingClient {
                addr: address.to_owned(),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_dials_are_deduped_per_address() {
        let (release_tx, release_rx) = watch::channel(false);
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(KvClientPool::new(CountingConnect {
            calls: calls.clone(),
            release_rx,
        }));

        let addr = "same-addr";
        let task_count = 16usize;
        let start = Arc::new(Barrier::new(task_count + 1));

        let mut handles = Vec::with_capacity(task_count);
        for _ in 0..task_count {
            let pool = pool.clone();
            let start = start.clone();
            handles.push(tokio::spawn(async move {
                start.wait().await;
                pool.client(addr).await
            }));
        }

        start.wait().await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while calls.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("connect not observed");

        // Give other tasks time to contend if multiple dials were attempted.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        release_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_addresses_get_distinct_clients() {
        let (release_tx, release_rx) = watch::channel(true);
        let pool = KvClientPool::new(CountingConnect {
            calls: Arc::new(AtomicUsize::new(0)),
            release_rx,
        });
        drop(release_tx);

        let a = pool.client("a").await.unwrap();
        let b = pool.client("b").await.unwrap();
        let b2 = pool.client("b").await.unwrap();
        assert_ne!(a.addr, b.addr);
        assert_eq!(b.addr, b2.addr);
    }
}

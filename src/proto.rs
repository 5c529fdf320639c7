// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! Wire message types shared with the cluster.
//!
//! These mirror the server's protobuf definitions. The messages are written
//! out by hand rather than generated because the core only speaks a small
//! subset of the full protocol surface.

/// Cluster metadata: regions, peers, stores.
pub mod cluster {
    /// Identifies a region's membership and split history. Any change
    /// invalidates cached routing for the region.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, prost::Message)]
    pub struct RegionEpoch {
        /// Conf change version, incremented when a peer is added or removed.
        #[prost(uint64, tag = "1")]
        pub conf_ver: u64,
        /// Region version, incremented on split or merge.
        #[prost(uint64, tag = "2")]
        pub version: u64,
    }

    /// A replica of a region hosted on a specific store.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, prost::Message)]
    pub struct Peer {
        #[prost(uint64, tag = "1")]
        pub id: u64,
        #[prost(uint64, tag = "2")]
        pub store_id: u64,
    }

    /// A contiguous key-range shard of the keyspace.
    ///
    /// The range is half-open: `[start_key, end_key)`. An empty `end_key`
    /// means "+infinity", an empty `start_key` means "-infinity".
    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct Region {
        #[prost(uint64, tag = "1")]
        pub id: u64,
        #[prost(bytes = "vec", tag = "2")]
        pub start_key: Vec<u8>,
        #[prost(bytes = "vec", tag = "3")]
        pub end_key: Vec<u8>,
        #[prost(message, optional, tag = "4")]
        pub region_epoch: Option<RegionEpoch>,
        #[prost(message, repeated, tag = "5")]
        pub peers: Vec<Peer>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
    #[repr(i32)]
    pub enum StoreState {
        Up = 0,
        Offline = 1,
        /// The store has been removed from the cluster for good.
        Tombstone = 2,
    }

    /// A server process hosting region replicas.
    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct Store {
        #[prost(uint64, tag = "1")]
        pub id: u64,
        #[prost(string, tag = "2")]
        pub address: String,
        #[prost(enumeration = "StoreState", tag = "3")]
        pub state: i32,
    }
}

/// Routing errors attached to responses when a request reached the wrong
/// place or raced with a metadata change.
pub mod routing {
    use super::cluster;

    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct NotLeader {
        #[prost(uint64, tag = "1")]
        pub region_id: u64,
        /// The leader the store believes in, when it knows one. The attached
        /// region carries the full peer list under the responder's epoch.
        #[prost(message, optional, tag = "2")]
        pub leader: Option<cluster::Peer>,
        #[prost(message, optional, tag = "3")]
        pub region: Option<cluster::Region>,
    }

    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct EpochNotMatch {
        /// The regions currently covering the requested range, under the
        /// responder's (newer) epochs.
        #[prost(message, repeated, tag = "1")]
        pub current_regions: Vec<cluster::Region>,
    }

    #[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
    pub struct RegionNotFound {
        #[prost(uint64, tag = "1")]
        pub region_id: u64,
    }

    #[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
    pub struct StoreNotMatch {
        #[prost(uint64, tag = "1")]
        pub request_store_id: u64,
        #[prost(uint64, tag = "2")]
        pub actual_store_id: u64,
    }

    /// The closed set of routing errors a store can attach to a response.
    /// At most one variant is set.
    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct Error {
        #[prost(string, tag = "1")]
        pub message: String,
        #[prost(message, optional, tag = "2")]
        pub not_leader: Option<NotLeader>,
        #[prost(message, optional, tag = "3")]
        pub epoch_not_match: Option<EpochNotMatch>,
        #[prost(message, optional, tag = "4")]
        pub region_not_found: Option<RegionNotFound>,
        #[prost(message, optional, tag = "5")]
        pub store_not_match: Option<StoreNotMatch>,
    }
}

/// Key-value request/response messages.
pub mod kvpb {
    use super::cluster;
    use super::routing;

    /// Routing context attached to every request so the store can verify the
    /// client's view of the region.
    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct Context {
        #[prost(uint64, tag = "1")]
        pub region_id: u64,
        #[prost(message, optional, tag = "2")]
        pub region_epoch: Option<cluster::RegionEpoch>,
        #[prost(message, optional, tag = "3")]
        pub peer: Option<cluster::Peer>,
        #[prost(bool, tag = "4")]
        pub is_retry_request: bool,
    }

    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct KvPair {
        #[prost(bytes = "vec", tag = "1")]
        pub key: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub value: Vec<u8>,
    }

    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct BatchGetRequest {
        #[prost(message, optional, tag = "1")]
        pub context: Option<Context>,
        #[prost(bytes = "vec", repeated, tag = "2")]
        pub keys: Vec<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct BatchGetResponse {
        #[prost(message, optional, tag = "1")]
        pub region_error: Option<routing::Error>,
        #[prost(message, repeated, tag = "2")]
        pub pairs: Vec<KvPair>,
    }

    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct BatchPutRequest {
        #[prost(message, optional, tag = "1")]
        pub context: Option<Context>,
        #[prost(message, repeated, tag = "2")]
        pub pairs: Vec<KvPair>,
    }

    #[derive(Clone, PartialEq, Eq, prost::Message)]
    pub struct BatchPutResponse {
        #[prost(message, optional, tag = "1")]
        pub region_error: Option<routing::Error>,
    }
}

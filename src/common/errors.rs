// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::result;

use thiserror::Error;

use crate::proto::cluster;
use crate::proto::routing;
use crate::region::RegionVerId;

/// An error originating from the client or its dependencies.
///
/// Routing errors form a closed set: retry logic pattern-matches on the
/// variants rather than dispatching through an error hierarchy.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer asked is not the region's leader. A new leader (and the
    /// responder's view of the region) may be attached.
    #[error("Peer is not leader for region {}", region.id)]
    NotLeader {
        region: RegionVerId,
        leader: Option<cluster::Peer>,
        new_region: Option<Box<crate::region::RegionWithLeader>>,
    },
    /// The region split or merged since the client cached it. The caller must
    /// re-group the affected keys and dispatch again.
    #[error("Region epoch does not match")]
    EpochNotMatch(Vec<cluster::Region>),
    /// The store no longer hosts the region.
    #[error("Region {region_id} not found on store")]
    RegionNotFound { region_id: u64 },
    /// Transport-level failure reaching the target store.
    #[error("Store {store_id} at {address} is unreachable")]
    StoreUnreachable { store_id: u64, address: String },
    /// The operation deadline elapsed.
    #[error("Operation deadline elapsed")]
    Timeout,
    /// The caller cancelled the operation.
    #[error("Operation interrupted by caller")]
    Interrupted,
    /// The metadata service could not be consulted in time.
    #[error("Region routing unavailable: {message}")]
    RoutingUnavailable { message: String },
    /// Unrecoverable RPC failure that retry will not help.
    #[error("Fatal transport error: {0}")]
    TransportFatal(tonic::Status),
    /// A batch exhausted its failover budget. Wraps the terminal cause.
    #[error("Batch dispatch failed: {0}")]
    BatchFailed(Box<Error>),
    /// No region covers the given key on the metadata service.
    #[error("Region is not found for key: {:?}", key)]
    RegionForKeyNotFound { key: Vec<u8> },
    /// The cached region has no known leader peer.
    #[error("Leader of region {} is not found", region.id)]
    LeaderNotFound { region: RegionVerId },
    /// The store is not known to the metadata service.
    #[error("Store {store_id} is not found")]
    StoreNotFound { store_id: u64 },
    /// A routing error we have no dedicated variant for.
    #[error("Routing error: {message}")]
    OtherRoutingError { message: String },
    /// Wraps a `std::io::Error`.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Wraps a connection-establishment error.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    /// Wraps an RPC status that is not a routing signal.
    #[error("rpc error: {0}")]
    Rpc(tonic::Status),
    /// Wraps an invalid URI when dialing a store.
    #[error("url error: {0}")]
    Url(#[from] tonic::codegen::http::uri::InvalidUri),
    #[error("{}", message)]
    InternalError { message: String },
    #[error("{0}")]
    StringError(String),
}

impl Error {
    /// Whether the selector may handle this error by switching replicas.
    pub fn is_recoverable_by_replica_switch(&self) -> bool {
        matches!(self, Error::StoreUnreachable { .. })
    }

    /// Whether the caller must re-group keys before retrying.
    pub fn requires_regroup(&self) -> bool {
        match self {
            Error::EpochNotMatch(_) | Error::RegionNotFound { .. } => true,
            Error::BatchFailed(cause) => cause.requires_regroup(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::BatchFailed(cause) => cause.is_timeout(),
            _ => false,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Interrupted => true,
            Error::BatchFailed(cause) => cause.is_interrupted(),
            _ => false,
        }
    }

    /// Classify an RPC status. Unavailable / timed-out statuses mean the
    /// target store could not be reached and are recoverable by replica
    /// switch; everything else is fatal for this request.
    pub(crate) fn from_status(status: tonic::Status, store_id: u64, address: &str) -> Error {
        match status.code() {
            tonic::Code::Unavailable
            | tonic::Code::DeadlineExceeded
            | tonic::Code::Cancelled => Error::StoreUnreachable {
                store_id,
                address: address.to_owned(),
            },
            _ => Error::TransportFatal(status),
        }
    }
}

/// Convert a routing error attached to a response into the matching variant.
///
/// `region` is the client's view of the region the request was addressed to,
/// used to decide whether an attached `NotLeader` carries the same epoch.
pub(crate) fn routing_error_into_error(
    e: routing::Error,
    region: &crate::region::RegionWithLeader,
) -> Error {
    if let Some(not_leader) = e.not_leader {
        let new_region = not_leader.region.map(|meta| {
            Box::new(crate::region::RegionWithLeader {
                region: meta,
                leader: not_leader.leader,
            })
        });
        return Error::NotLeader {
            region: region.ver_id(),
            leader: not_leader.leader,
            new_region,
        };
    }
    if let Some(epoch_not_match) = e.epoch_not_match {
        return Error::EpochNotMatch(epoch_not_match.current_regions);
    }
    if let Some(region_not_found) = e.region_not_found {
        return Error::RegionNotFound {
            region_id: region_not_found.region_id,
        };
    }
    if let Some(store_not_match) = e.store_not_match {
        return Error::OtherRoutingError {
            message: format!(
                "request for store {} landed on store {}",
                store_not_match.request_store_id, store_not_match.actual_store_id
            ),
        };
    }
    Error::OtherRoutingError { message: e.message }
}

/// A result holding an [`Error`](enum@Error).
pub type Result<T> = result::Result<T, Error>;

#[doc(hidden)]
#[macro_export]
macro_rules! internal_err {
    ($e:expr) => ({
        $crate::Error::InternalError {
            message: format!("[{}:{}]: {}", file!(), line!(),  $e)
        }
    });
    ($f:tt, $($arg:expr),+) => ({
        $crate::internal_err!(format!($f, $($arg),+))
    });
}

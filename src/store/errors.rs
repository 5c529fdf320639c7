// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use crate::proto::kvpb;
use crate::proto::routing;

/// Extract the routing error a store attached to its response, if any.
pub trait HasRegionError {
    fn region_error(&mut self) -> Option<routing::Error>;
}

impl HasRegionError for kvpb::BatchGetResponse {
    fn region_error(&mut self) -> Option<routing::Error> {
        self.region_error.take()
    }
}

impl HasRegionError for kvpb::BatchPutResponse {
    fn region_error(&mut self) -> Option<routing::Error> {
        self.region_error.take()
    }
}

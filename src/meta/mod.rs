// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! The metadata-service client interface.
//!
//! The metadata service is the authority for region-to-store mappings. The
//! routing core consumes it behind [`MetaClient`]; the concrete RPC client
//! lives outside this crate.

mod client;
mod retry;

pub use self::client::MetaClient;
pub use self::retry::RetryMetaClient;

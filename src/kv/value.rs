// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

/// The value part of a key/value pair.
///
/// Values are uninterpreted bytes. Like [`Key`](super::Key), any data
/// representable as bytes may be stored.
pub type Value = Vec<u8>;

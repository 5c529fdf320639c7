// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use crate::region::RegionWithLeader;
use crate::Key;
use crate::Result;
use crate::Value;

/// A dispatch unit: keys (and, on write paths, parallel values) all bound for
/// one region.
///
/// Entry order follows the enclosing sorted per-region group, so
/// concatenating the batches of a group in output order reproduces the
/// group's key list.
#[derive(Clone, Debug)]
pub struct Batch {
    pub region: RegionWithLeader,
    pub keys: Vec<Key>,
    pub values: Option<Vec<Value>>,
}

impl Batch {
    fn new(region: RegionWithLeader, keys: Vec<Key>, values: Option<Vec<Value>>) -> Batch {
        Batch {
            region,
            keys,
            values,
        }
    }
}

fn entry_size(key: &Key, value: Option<&Value>) -> usize {
    key.len() + value.map(Vec::len).unwrap_or(0)
}

/// Extend `out` with batches partitioning `keys` (and parallel `values`) in
/// order.
///
/// Each batch carries at most `max_count` entries and at most `max_bytes`
/// bytes, counting key lengths plus value lengths when present. The first
/// entry that would overflow the byte budget is not squeezed into the current
/// batch; it starts the next one. A single entry that alone exceeds
/// `max_bytes` still forms its own batch, so progress is always made.
///
/// `values`, when present, must pair one to one with `keys`; a length
/// mismatch is an error and `out` is left untouched.
pub fn append_batches(
    out: &mut Vec<Batch>,
    region: &RegionWithLeader,
    keys: Vec<Key>,
    values: Option<Vec<Value>>,
    max_bytes: usize,
    max_count: usize,
) -> Result<()> {
    if let Some(values) = &values {
        if values.len() != keys.len() {
            return Err(crate::internal_err!(
                "keys and values must pair one to one, got {} keys and {} values",
                keys.len(),
                values.len()
            ));
        }
    }
    let with_values = values.is_some();
    let max_count = max_count.max(1);

    let mut current_keys: Vec<Key> = Vec::new();
    let mut current_values: Vec<Value> = Vec::new();
    let mut current_bytes = 0usize;
    let mut values = values.map(Vec::into_iter);

    for key in keys {
        let value = values.as_mut().and_then(Iterator::next);
        let size = entry_size(&key, value.as_ref());

        let over_count = current_keys.len() >= max_count;
        let over_bytes = current_bytes + size > max_bytes;
        if !current_keys.is_empty() && (over_count || over_bytes) {
            out.push(Batch::new(
                region.clone(),
                std::mem::take(&mut current_keys),
                with_values.then(|| std::mem::take(&mut current_values)),
            ));
            current_bytes = 0;
        }

        current_bytes += size;
        current_keys.push(key);
        if let Some(value) = value {
            current_values.push(value);
        }
    }

    if !current_keys.is_empty() {
        out.push(Batch::new(
            region.clone(),
            current_keys,
            with_values.then_some(current_values),
        ));
    }
    Ok(())
}

/// Build the full batch list for grouped keys.
pub fn make_batches(
    groups: Vec<(RegionWithLeader, Vec<Key>)>,
    max_bytes: usize,
    max_count: usize,
) -> Result<Vec<Batch>> {
    let mut batches = Vec::new();
    for (region, keys) in groups {
        append_batches(&mut batches, &region, keys, None, max_bytes, max_count)?;
    }
    Ok(batches)
}

/// Build the full batch list for grouped key/value pairs.
pub fn make_write_batches(
    groups: Vec<(RegionWithLeader, Vec<(Key, Value)>)>,
    max_bytes: usize,
    max_count: usize,
) -> Result<Vec<Batch>> {
    let mut batches = Vec::new();
    for (region, pairs) in groups {
        let (keys, values): (Vec<Key>, Vec<Value>) = pairs.into_iter().unzip();
        append_batches(
            &mut batches,
            &region,
            keys,
            Some(values),
            max_bytes,
            max_count,
        )?;
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn region() -> RegionWithLeader {
        RegionWithLeader::default()
    }

    fn key_of_len(byte: u8, len: usize) -> Key {
        vec![byte; len].into()
    }

    #[test]
    fn splits_by_count() {
        let keys: Vec<Key> = vec![
            b"a".to_vec().into(),
            b"b".to_vec().into(),
            b"c".to_vec().into(),
            b"d".to_vec().into(),
        ];
        let mut out = Vec::new();
        append_batches(&mut out, &region(), keys, None, 1000, 2).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].keys, vec![Key::from(b"a".to_vec()), b"b".to_vec().into()]);
        assert_eq!(out[1].keys, vec![Key::from(b"c".to_vec()), b"d".to_vec().into()]);
    }

    #[test]
    fn byte_budget_trumps_count() {
        let keys = vec![key_of_len(1, 900), key_of_len(2, 200)];
        let mut out = Vec::new();
        append_batches(&mut out, &region(), keys, None, 1000, 10).unwrap();
        // 900 + 200 > 1000: the second entry starts a new batch.
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].keys[0].len(), 900);
        assert_eq!(out[1].keys[0].len(), 200);
    }

    #[test]
    fn oversize_lone_entry_still_ships() {
        let keys = vec![key_of_len(1, 2000)];
        let mut out = Vec::new();
        append_batches(&mut out, &region(), keys, None, 1000, 10).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].keys.len(), 1);
        assert_eq!(out[0].keys[0].len(), 2000);
    }

    #[test]
    fn oversize_entry_does_not_drag_neighbors() {
        let keys = vec![key_of_len(1, 10), key_of_len(2, 2000), key_of_len(3, 10)];
        let mut out = Vec::new();
        append_batches(&mut out, &region(), keys, None, 1000, 10).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].keys[0].len(), 10);
        assert_eq!(out[1].keys[0].len(), 2000);
        assert_eq!(out[2].keys[0].len(), 10);
    }

    #[test]
    fn empty_input_is_a_noop() {
        let mut out = Vec::new();
        append_batches(&mut out, &region(), vec![], None, 1000, 10).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn mismatched_values_are_rejected() {
        let keys: Vec<Key> = vec![vec![1].into(), vec![2].into()];
        let values: Vec<Value> = vec![vec![9]];
        let mut out = Vec::new();
        let err =
            append_batches(&mut out, &region(), keys, Some(values), 1000, 10).unwrap_err();
        assert!(err.to_string().contains("pair one to one"), "{err}");
        assert!(out.is_empty());
    }

    #[test]
    fn values_count_toward_the_byte_budget() {
        let keys: Vec<Key> = vec![vec![1].into(), vec![2].into()];
        let values: Vec<Value> = vec![vec![0; 600], vec![0; 600]];
        let mut out = Vec::new();
        append_batches(&mut out, &region(), keys, Some(values), 1000, 10).unwrap();
        assert_eq!(out.len(), 2);
        let values = out[0].values.as_ref().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].len(), 600);
    }

    #[test]
    fn values_stay_parallel_to_keys() {
        let keys: Vec<Key> = (0u8..5).map(|b| vec![b].into()).collect();
        let values: Vec<Value> = (0u8..5).map(|b| vec![b, b]).collect();
        let mut out = Vec::new();
        append_batches(&mut out, &region(), keys, Some(values), 1000, 2).unwrap();
        assert_eq!(out.len(), 3);
        for batch in &out {
            let values = batch.values.as_ref().unwrap();
            assert_eq!(batch.keys.len(), values.len());
            for (key, value) in batch.keys.iter().zip(values) {
                let key_bytes: &[u8] = key.into();
                assert_eq!(value, &vec![key_bytes[0], key_bytes[0]]);
            }
        }
    }

    proptest! {
        #[test]
        fn concatenation_reproduces_input(
            lens in proptest::collection::vec(0usize..64, 0..40),
            max_bytes in 1usize..128,
            max_count in 1usize..8,
        ) {
            let keys: Vec<Key> = lens
                .iter()
                .enumerate()
                .map(|(i, len)| {
                    let mut bytes = vec![i as u8];
                    bytes.extend(std::iter::repeat(0xAB).take(*len));
                    bytes.into()
                })
                .collect();

            let mut out = Vec::new();
            append_batches(&mut out, &region(), keys.clone(), None, max_bytes, max_count).unwrap();

            let rejoined: Vec<Key> = out.iter().flat_map(|b| b.keys.clone()).collect();
            prop_assert_eq!(rejoined, keys);

            for batch in &out {
                prop_assert!(!batch.keys.is_empty());
                let bytes: usize = batch.keys.iter().map(Key::len).sum();
                prop_assert!(
                    (batch.keys.len() <= max_count && bytes <= max_bytes)
                        || batch.keys.len() == 1
                );
            }
        }
    }
}

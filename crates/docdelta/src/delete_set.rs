//! Compact run-length representation of deleted id ranges.
//!
//! A delete set travels at the tail of every update and is also the unit of
//! deferral: ranges that reference clocks the receiver has not integrated
//! yet are parked on the store and replayed after more structures arrive.

use std::collections::HashMap;

use tracing::debug;

use crate::codec::{UpdateDecoder, UpdateEncoder};
use crate::error::UpdateError;
use crate::store::BlockStore;
use crate::txn::Transaction;

/// One deleted clock range `[clock, clock + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRange {
    pub clock: u64,
    pub len: u64,
}

/// Deleted id ranges grouped by client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteSet {
    pub clients: HashMap<u64, Vec<DeleteRange>>,
}

impl DeleteSet {
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn add(&mut self, client: u64, clock: u64, len: u64) {
        if len == 0 {
            return;
        }
        self.clients
            .entry(client)
            .or_default()
            .push(DeleteRange { clock, len });
    }

    /// Sorts every client's ranges and coalesces adjacent or overlapping
    /// ones, producing the canonical form the codec emits.
    pub fn canonicalize(&mut self) {
        for ranges in self.clients.values_mut() {
            ranges.sort_by_key(|r| r.clock);
            let mut merged: Vec<DeleteRange> = Vec::with_capacity(ranges.len());
            for &r in ranges.iter() {
                match merged.last_mut() {
                    Some(last) if last.clock + last.len >= r.clock => {
                        let end = (r.clock + r.len).max(last.clock + last.len);
                        last.len = end - last.clock;
                    }
                    _ => merged.push(r),
                }
            }
            *ranges = merged;
        }
    }

    /// Derives the delete set of a whole store: every tombstone and every
    /// deleted item, with adjacent runs coalesced.
    pub fn from_store(store: &BlockStore) -> DeleteSet {
        let mut ds = DeleteSet::default();
        for (&client, list) in &store.clients {
            let mut ranges: Vec<DeleteRange> = Vec::new();
            for block in list {
                if !block.is_deleted() {
                    continue;
                }
                let clock = block.id().clock;
                let len = block.len();
                match ranges.last_mut() {
                    Some(last) if last.clock + last.len == clock => last.len += len,
                    _ => ranges.push(DeleteRange { clock, len }),
                }
            }
            if !ranges.is_empty() {
                ds.clients.insert(client, ranges);
            }
        }
        ds
    }

    /// Serializes the delete set. Ranges must be canonical (sorted, merged);
    /// clients are emitted in descending id order for a deterministic wire
    /// form.
    pub fn write<E: UpdateEncoder>(&self, encoder: &mut E) {
        let mut clients: Vec<(&u64, &Vec<DeleteRange>)> = self.clients.iter().collect();
        clients.sort_by(|a, b| b.0.cmp(a.0));
        encoder.rest().var_u64(clients.len() as u64);
        for (&client, ranges) in clients {
            encoder.reset_ds_cur_val();
            encoder.rest().var_u64(client);
            encoder.rest().var_u64(ranges.len() as u64);
            for range in ranges {
                encoder.write_ds_clock(range.clock);
                encoder.write_ds_len(range.len);
            }
        }
    }

    /// Parses a delete set. No store access, no application.
    pub fn read<'a, D: UpdateDecoder<'a>>(decoder: &mut D) -> Result<DeleteSet, UpdateError> {
        let mut ds = DeleteSet::default();
        let num_clients = decoder.rest().var_u64()?;
        for _ in 0..num_clients {
            decoder.reset_ds_cur_val();
            let client = decoder.rest().var_u64()?;
            let num_ranges = decoder.rest().var_u64()?;
            let ranges = ds.clients.entry(client).or_default();
            ranges.reserve(num_ranges.min(1 << 12) as usize);
            for _ in 0..num_ranges {
                let clock = decoder.read_ds_clock()?;
                let len = decoder.read_ds_len()?;
                ranges.push(DeleteRange { clock, len });
            }
        }
        ds.clients.retain(|_, ranges| !ranges.is_empty());
        Ok(ds)
    }

    /// Applies every range that lies below the current state, splitting
    /// blocks at range boundaries. Returns the remainder that referenced
    /// not-yet-integrated structures; the caller parks it for replay.
    pub fn apply(&self, txn: &mut Transaction<'_>) -> DeleteSet {
        let mut unapplied = DeleteSet::default();
        for (&client, ranges) in &self.clients {
            let state = txn.doc.store.state(client);
            for range in ranges {
                let end = range.clock + range.len;
                if range.clock < state {
                    let applied_end = end.min(state);
                    txn.doc
                        .store
                        .mark_deleted(client, range.clock, applied_end - range.clock);
                }
                if end > state {
                    let start = range.clock.max(state);
                    unapplied.add(client, start, end - start);
                }
            }
        }
        if !unapplied.is_empty() {
            debug!(
                clients = unapplied.clients.len(),
                "delete ranges reference structures that have not arrived yet"
            );
            unapplied.canonicalize();
        }
        unapplied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecoderV1, DecoderV2, EncoderV1, EncoderV2};

    fn sample() -> DeleteSet {
        let mut ds = DeleteSet::default();
        ds.add(7, 0, 2);
        ds.add(7, 5, 1);
        ds.add(3, 10, 4);
        ds.canonicalize();
        ds
    }

    #[test]
    fn canonicalize_merges_adjacent_and_overlapping() {
        let mut ds = DeleteSet::default();
        ds.add(1, 5, 2);
        ds.add(1, 0, 3);
        ds.add(1, 3, 2);
        ds.add(1, 20, 1);
        ds.canonicalize();
        assert_eq!(
            ds.clients[&1],
            vec![
                DeleteRange { clock: 0, len: 7 },
                DeleteRange { clock: 20, len: 1 }
            ]
        );
    }

    #[test]
    fn zero_length_ranges_are_dropped() {
        let mut ds = DeleteSet::default();
        ds.add(1, 5, 0);
        assert!(ds.is_empty());
    }

    #[test]
    fn codec_roundtrip_v1() {
        let ds = sample();
        let mut e = EncoderV1::new();
        ds.write(&mut e);
        let data = e.finalize();
        let mut d = DecoderV1::new(&data);
        assert_eq!(DeleteSet::read(&mut d).unwrap(), ds);
    }

    #[test]
    fn codec_roundtrip_v2() {
        let ds = sample();
        let mut e = EncoderV2::new();
        ds.write(&mut e);
        let data = e.finalize();
        let mut d = DecoderV2::new(&data).unwrap();
        assert_eq!(DeleteSet::read(&mut d).unwrap(), ds);
    }

    #[test]
    fn empty_delete_set_is_one_byte_v1() {
        let ds = DeleteSet::default();
        let mut e = EncoderV1::new();
        ds.write(&mut e);
        assert_eq!(e.finalize(), [0x00]);
    }

    #[test]
    fn truncated_delete_set_errors() {
        let ds = sample();
        let mut e = EncoderV1::new();
        ds.write(&mut e);
        let mut data = e.finalize();
        data.truncate(data.len() - 1);
        let mut d = DecoderV1::new(&data);
        assert!(DeleteSet::read(&mut d).is_err());
    }
}

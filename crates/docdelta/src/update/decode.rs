//! The update decoder: bytes to per-replica block lists.
//!
//! Decoding never consults the store and integrates nothing; it only
//! materializes ordered block lists per source replica. Integration is the
//! scheduler's job.

use std::collections::HashMap;

use crate::block::{Block, Gc, Item};
use crate::clock::Id;
use crate::codec::{UpdateDecoder, KIND_MASK};
use crate::error::UpdateError;

pub(crate) fn read_client_blocks<'a, D: UpdateDecoder<'a>>(
    decoder: &mut D,
) -> Result<HashMap<u64, Vec<Block>>, UpdateError> {
    let mut refs: HashMap<u64, Vec<Block>> = HashMap::new();
    let num_replicas = decoder.rest().var_u64()?;
    for _ in 0..num_replicas {
        let num_blocks = decoder.rest().var_u64()? as usize;
        let client = decoder.read_client()?;
        let mut clock = decoder.rest().var_u64()?;
        let list = refs.entry(client).or_default();
        list.reserve(num_blocks.min(1 << 16));
        for _ in 0..num_blocks {
            let info = decoder.read_info()?;
            let block = if info & KIND_MASK == 0 {
                Block::Gc(Gc {
                    id: Id::new(client, clock),
                    len: decoder.read_len()?,
                })
            } else {
                Block::Item(Item::read(decoder, Id::new(client, clock), info)?)
            };
            if block.is_empty() {
                return Err(UpdateError::InvalidPayload);
            }
            clock += block.len();
            list.push(block);
        }
    }
    Ok(refs)
}

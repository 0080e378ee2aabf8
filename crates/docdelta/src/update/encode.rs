//! The update producer: emit what a peer is missing.

use docdelta_buffers::{Reader, Writer};

use crate::clock::StateVector;
use crate::codec::UpdateEncoder;
use crate::error::UpdateError;
use crate::store::{find_index, BlockStore};

/// Writes a state-vector message: count, then `(client, clock)` pairs.
///
/// Pairs are emitted in descending client order for a deterministic wire
/// form; decoders accept any order.
pub(crate) fn write_state_vector(w: &mut Writer, sv: &StateVector) {
    let mut entries: Vec<(u64, u64)> = sv.iter().collect();
    entries.sort_by(|a, b| b.0.cmp(&a.0));
    w.var_u64(entries.len() as u64);
    for (client, clock) in entries {
        w.var_u64(client);
        w.var_u64(clock);
    }
}

pub(crate) fn read_state_vector(r: &mut Reader<'_>) -> Result<StateVector, UpdateError> {
    let count = r.var_u64()?;
    let mut sv = StateVector::new();
    for _ in 0..count {
        let client = r.var_u64()?;
        let clock = r.var_u64()?;
        sv.set_max(client, clock);
    }
    Ok(sv)
}

/// Emits every structure the target state vector is missing.
///
/// Replica blocks are written in descending client order, matching the
/// receiver's drain order (highest pending client first). The first block of
/// each replica is trimmed by a clock offset so the peer never receives
/// clock values it already covers.
pub(crate) fn write_blocks<E: UpdateEncoder>(
    encoder: &mut E,
    store: &BlockStore,
    target: &StateVector,
) {
    let mut clients: Vec<(u64, u64)> = store
        .clients
        .keys()
        .filter_map(|&client| {
            let from = target.get(client);
            (store.state(client) > from).then_some((client, from))
        })
        .collect();
    clients.sort_by(|a, b| b.0.cmp(&a.0));

    encoder.rest().var_u64(clients.len() as u64);
    for (client, from) in clients {
        let blocks = &store.clients[&client];
        let j = find_index(blocks, from)
            .expect("a clock below the local state is covered by some block");
        encoder.rest().var_u64((blocks.len() - j) as u64);
        encoder.write_client(client);
        encoder.rest().var_u64(from);
        blocks[j].write(encoder, from - blocks[j].id().clock);
        for block in &blocks[j + 1..] {
            block.write(encoder, 0);
        }
    }
}

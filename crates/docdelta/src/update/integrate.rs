//! The integration scheduler and the pending store it drains.
//!
//! Freshly parsed blocks are merged into the store's pending area, then the
//! scheduler advances integration until it is blocked on a missing causal
//! predecessor. The work stack lives on the store, so an integration that
//! pauses mid-way resumes exactly where it stopped when the next update
//! arrives. Delete sets that reference not-yet-integrated structures are
//! parked and replayed after every scheduler run.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem;

use tracing::debug;

use crate::block::Block;
use crate::delete_set::DeleteSet;
use crate::store::{BlockStore, PendingRefs};
use crate::txn::Transaction;

/// Runs the full receive path over an already parsed update: merge into the
/// pending area, drain, clean up, then apply and replay delete sets.
pub(crate) fn apply_parsed(
    txn: &mut Transaction<'_>,
    refs: HashMap<u64, Vec<Block>>,
    ds: DeleteSet,
) {
    merge_pending(&mut txn.doc.store, refs);
    integrate_loop(txn);
    cleanup_pending(&mut txn.doc.store);

    // Take the parked delete sets first: the fresh remainder (if any) cannot
    // make progress within this call and must not be replayed immediately.
    let parked = mem::take(&mut txn.doc.store.pending_delete_sets);
    let mut still_pending = Vec::new();
    let remainder = ds.apply(txn);
    if !remainder.is_empty() {
        still_pending.push(remainder);
    }
    for deferred in parked {
        let remainder = deferred.apply(txn);
        if !remainder.is_empty() {
            still_pending.push(remainder);
        }
    }
    txn.doc.store.pending_delete_sets = still_pending;
}

/// Merges parsed per-replica lists into the pending area.
///
/// When an entry already exists, its consumed prefix is discarded before the
/// merge; pending memory stays bounded by what is actually un-integrated.
pub(crate) fn merge_pending(store: &mut BlockStore, refs: HashMap<u64, Vec<Block>>) {
    for (client, mut blocks) in refs {
        if blocks.is_empty() {
            continue;
        }
        blocks.sort_by_key(|b| b.id().clock);
        match store.pending_client_refs.entry(client) {
            Entry::Vacant(e) => {
                e.insert(PendingRefs { refs: blocks, i: 0 });
            }
            Entry::Occupied(mut e) => {
                let pending = e.get_mut();
                pending.refs.drain(..pending.i);
                pending.i = 0;
                pending.refs.extend(blocks);
                pending.refs.sort_by_key(|b| b.id().clock);
            }
        }
    }
}

/// Drops consumed prefixes and removes exhausted entries, restoring the
/// invariant that every pending entry has cursor 0 and non-empty refs.
pub(crate) fn cleanup_pending(store: &mut BlockStore) {
    store.pending_client_refs.retain(|_, pending| {
        if pending.is_consumed() {
            return false;
        }
        pending.refs.drain(..pending.i);
        pending.i = 0;
        true
    });
}

/// Integrates every buffered block whose causal prerequisites are satisfied.
///
/// Work is drained from the highest pending client id first, the counterpart
/// of the producer's descending emission order.
/// The loop pauses (leaving the stack on the store) in two situations only:
/// a gap on the block's own replica with nothing smaller pending, or a
/// cross-replica dependency with no pending candidate. Every push either
/// advances a cursor or crosses to a strictly earlier region of a different
/// replica, so the stack depth stays bounded by the number of pending
/// replicas and the loop cannot cycle.
fn integrate_loop(txn: &mut Transaction<'_>) {
    let mut client_ids: Vec<u64> = txn.doc.store.pending_client_refs.keys().copied().collect();
    client_ids.sort_unstable();

    loop {
        let block = match txn.doc.store.pending_stack.pop() {
            Some(block) => block,
            None => {
                let Some(&client) = client_ids.last() else {
                    break;
                };
                let pending = txn
                    .doc
                    .store
                    .pending_client_refs
                    .get_mut(&client)
                    .expect("drain candidates come from the pending map");
                if pending.is_consumed() {
                    client_ids.pop();
                    continue;
                }
                let block = pending.refs[pending.i].clone();
                pending.i += 1;
                block
            }
        };

        let id = block.id();
        let local = txn.doc.store.state(id.client);

        if id.clock > local {
            // A predecessor on the same replica is missing. If something
            // smaller is still pending for this client, work on that first.
            let has_smaller = txn
                .doc
                .store
                .pending_client_refs
                .get(&id.client)
                .and_then(|p| p.current())
                .is_some_and(|b| b.id().clock < id.clock);
            if has_smaller {
                let pending = txn
                    .doc
                    .store
                    .pending_client_refs
                    .get_mut(&id.client)
                    .expect("checked above");
                let smaller = mem::replace(&mut pending.refs[pending.i], block);
                pending.refs.drain(..pending.i);
                pending.refs.sort_by_key(|b| b.id().clock);
                pending.i = 0;
                txn.doc.store.pending_stack.push(smaller);
                continue;
            }
            debug!(
                client = id.client,
                clock = id.clock,
                state = local,
                "integration paused: gap on the source replica"
            );
            txn.doc.store.pending_stack.push(block);
            return;
        }

        let offset = local - id.clock;
        if let Some(missing_client) = block.missing(&txn.doc.store) {
            let available = txn
                .doc
                .store
                .pending_client_refs
                .get(&missing_client)
                .is_some_and(|p| !p.is_consumed());
            if !available {
                debug!(
                    client = id.client,
                    missing = missing_client,
                    "integration paused: dependency replica has nothing pending"
                );
                txn.doc.store.pending_stack.push(block);
                return;
            }
            let pending = txn
                .doc
                .store
                .pending_client_refs
                .get_mut(&missing_client)
                .expect("checked above");
            let dependency = pending.refs[pending.i].clone();
            pending.i += 1;
            txn.doc.store.pending_stack.push(block);
            txn.doc.store.pending_stack.push(dependency);
            continue;
        }

        if offset < block.len() {
            block.integrate(txn, offset);
        }
        // Fully covered already: skip silently, re-application is a no-op.
    }
}

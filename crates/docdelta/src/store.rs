//! The block store: per-replica structure lists plus the pending area.
//!
//! Integrated blocks of one client form a clock-ordered list covering
//! `[0, state(client))` without gaps. The pending area buffers parsed work
//! whose causal prerequisites have not arrived: per-client struct lists with
//! a consumption cursor, the integration work stack, and deferred delete
//! sets. All of it persists across update applications so a blocked
//! integration resumes where it paused.

use std::collections::HashMap;

use crate::block::{Block, Item};
use crate::clock::{Id, StateVector};
use crate::content::Content;
use crate::delete_set::DeleteSet;
use crate::types::{Branch, Parent};

/// Parsed-but-not-yet-integrated blocks of one source replica.
///
/// `refs[i..]` is strictly ordered by clock; entries below `i` have been
/// consumed by the scheduler and are dropped by the cleanup pass.
#[derive(Debug, Clone, Default)]
pub struct PendingRefs {
    pub refs: Vec<Block>,
    pub i: usize,
}

impl PendingRefs {
    /// First un-consumed entry, if any.
    pub fn current(&self) -> Option<&Block> {
        self.refs.get(self.i)
    }

    pub fn is_consumed(&self) -> bool {
        self.i >= self.refs.len()
    }
}

/// Binary search for the index of the block covering `clock`.
pub fn find_index(blocks: &[Block], clock: u64) -> Option<usize> {
    let idx = blocks.partition_point(|b| b.id().clock + b.len() <= clock);
    if idx < blocks.len() && blocks[idx].id().clock <= clock {
        Some(idx)
    } else {
        None
    }
}

/// Per-replica structure storage plus pending integration state.
#[derive(Debug, Default)]
pub struct BlockStore {
    /// Integrated blocks per client, ordered by clock.
    pub clients: HashMap<u64, Vec<Block>>,
    /// Sequence state per parent, including the document-root table.
    pub branches: HashMap<Parent, Branch>,
    /// Parsed blocks awaiting integration, per source replica.
    pub pending_client_refs: HashMap<u64, PendingRefs>,
    /// The integration work stack, persisted across update applications.
    pub pending_stack: Vec<Block>,
    /// Delete sets whose structure prerequisites have not yet integrated.
    pub pending_delete_sets: Vec<DeleteSet>,
}

impl BlockStore {
    /// Next expected clock for `client`.
    pub fn state(&self, client: u64) -> u64 {
        match self.clients.get(&client).and_then(|list| list.last()) {
            Some(last) => last.id().clock + last.len(),
            None => 0,
        }
    }

    /// Snapshot of the next expected clock for every known client.
    pub fn state_vector(&self) -> StateVector {
        self.clients
            .iter()
            .map(|(&client, list)| {
                let last = list.last().expect("client lists are never empty");
                (client, last.id().clock + last.len())
            })
            .collect()
    }

    /// Inserts an integrated block at its clock position.
    pub fn add_block(&mut self, block: Block) {
        let client = block.id().client;
        let clock = block.id().clock;
        let list = self.clients.entry(client).or_default();
        debug_assert!(find_index(list, clock).is_none(), "blocks never overlap");
        let idx = list.partition_point(|b| b.id().clock < clock);
        list.insert(idx, block);
    }

    /// The block whose clock range contains `target`, if integrated.
    pub fn get_block(&self, target: Id) -> Option<&Block> {
        let list = self.clients.get(&target.client)?;
        let idx = find_index(list, target.clock)?;
        Some(&list[idx])
    }

    /// Block id (first covered clock) of the block containing `target`.
    pub fn block_id_containing(&self, target: Id) -> Option<Id> {
        self.get_block(target).map(|b| b.id())
    }

    /// The item whose block id is exactly `id`.
    pub fn get_item(&self, id: Id) -> Option<&Item> {
        match self.get_block(id) {
            Some(Block::Item(item)) if item.id == id => Some(item),
            _ => None,
        }
    }

    pub fn get_item_mut(&mut self, id: Id) -> Option<&mut Item> {
        let list = self.clients.get_mut(&id.client)?;
        let idx = find_index(list, id.clock)?;
        match &mut list[idx] {
            Block::Item(item) if item.id == id => Some(item),
            _ => None,
        }
    }

    // ── Splits ─────────────────────────────────────────────────────────────

    /// Ensures a block starts exactly at `target`, splitting if the id falls
    /// mid-run. Returns the id of that block, or `None` when the covering
    /// block is a tombstone (the position is lost).
    pub fn split_clean_start(&mut self, target: Id) -> Option<Id> {
        let (idx, start_clock, is_item) = {
            let list = self.clients.get(&target.client)?;
            let idx = find_index(list, target.clock)?;
            let b = &list[idx];
            (idx, b.id().clock, matches!(b, Block::Item(_)))
        };
        if !is_item {
            return None;
        }
        if start_clock == target.clock {
            return Some(target);
        }
        Some(self.split_item_at(target.client, idx, target.clock - start_clock))
    }

    /// Ensures a block ends exactly at `target`, splitting if the id falls
    /// mid-run. Returns the id of that block, or `None` for tombstones.
    pub fn split_clean_end(&mut self, target: Id) -> Option<Id> {
        let (idx, start_clock, len, is_item) = {
            let list = self.clients.get(&target.client)?;
            let idx = find_index(list, target.clock)?;
            let b = &list[idx];
            (idx, b.id().clock, b.len(), matches!(b, Block::Item(_)))
        };
        if !is_item {
            return None;
        }
        let block_id = Id::new(target.client, start_clock);
        if start_clock + len - 1 == target.clock {
            return Some(block_id);
        }
        self.split_item_at(target.client, idx, target.clock - start_clock + 1);
        Some(block_id)
    }

    /// Splits the item at `idx` after `at` clock values. Returns the id of
    /// the right half.
    fn split_item_at(&mut self, client: u64, idx: usize, at: u64) -> Id {
        let (right, old_right, parent, parent_sub) = {
            let list = self.clients.get_mut(&client).expect("client list exists");
            let Block::Item(item) = &mut list[idx] else {
                unreachable!("only items are split");
            };
            debug_assert!(at > 0 && at < item.len);
            let right_content = item.content.split_at(at);
            let right = Item {
                id: Id::new(client, item.id.clock + at),
                len: item.len - at,
                left_origin: Some(Id::new(client, item.id.clock + at - 1)),
                right_origin: item.right_origin,
                parent: item.parent.clone(),
                parent_sub: item.parent_sub.clone(),
                content: right_content,
                deleted: item.deleted,
                left: Some(item.id),
                right: item.right,
            };
            item.len = at;
            let old_right = std::mem::replace(&mut item.right, Some(right.id));
            let parent = item.parent.clone();
            let parent_sub = item.parent_sub.clone();
            (right, old_right, parent, parent_sub)
        };
        let right_id = right.id;
        self.clients
            .get_mut(&client)
            .expect("client list exists")
            .insert(idx + 1, Block::Item(right));
        match old_right {
            Some(orid) => {
                if let Some(neighbor) = self.get_item_mut(orid) {
                    neighbor.left = Some(right_id);
                }
            }
            None => {
                // The rightmost half inherits a map-entry slot.
                if let (Some(parent), Some(sub)) = (parent, parent_sub) {
                    self.branch_mut(parent).map.insert(sub, right_id);
                }
            }
        }
        right_id
    }

    // ── Deletion ───────────────────────────────────────────────────────────

    /// Marks every item in `[clock, clock + len)` of `client` deleted,
    /// splitting blocks at the range boundaries. Tombstones and already
    /// deleted items are skipped.
    pub fn mark_deleted(&mut self, client: u64, clock: u64, len: u64) {
        let end = clock + len;
        let mut idx = {
            let Some(list) = self.clients.get(&client) else {
                return;
            };
            match find_index(list, clock) {
                Some(i) => i,
                None => list.partition_point(|b| b.id().clock < clock),
            }
        };
        loop {
            let Some(list) = self.clients.get(&client) else {
                return;
            };
            let Some(block) = list.get(idx) else {
                return;
            };
            let bid = block.id();
            if bid.clock >= end {
                return;
            }
            let blen = block.len();
            let live_item = matches!(block, Block::Item(item) if !item.deleted);
            if live_item {
                if bid.clock < clock {
                    self.split_item_at(client, idx, clock - bid.clock);
                    idx += 1;
                    continue;
                }
                if bid.clock + blen > end {
                    self.split_item_at(client, idx, end - bid.clock);
                }
                let list = self.clients.get_mut(&client).expect("client list exists");
                if let Block::Item(item) = &mut list[idx] {
                    item.deleted = true;
                }
            }
            idx += 1;
        }
    }

    // ── Branches ───────────────────────────────────────────────────────────

    pub fn branch(&self, parent: &Parent) -> Option<&Branch> {
        self.branches.get(parent)
    }

    /// Branch for `parent`, created on first use (this is how document-root
    /// names come into existence).
    pub fn branch_mut(&mut self, parent: Parent) -> &mut Branch {
        self.branches.entry(parent).or_default()
    }

    /// Leftmost item of the map-entry chain for `sub` under `parent`.
    pub fn map_scan_start(&self, parent: &Parent, sub: &str) -> Option<Id> {
        let mut o = self.branch(parent)?.map.get(sub).copied();
        while let Some(oid) = o {
            match self.get_item(oid).and_then(|i| i.left) {
                Some(l) => o = Some(l),
                None => break,
            }
        }
        o
    }

    // ── Read surface ───────────────────────────────────────────────────────

    /// Ids of the live (non-deleted) blocks of a root sequence, in order.
    pub fn sequence_ids(&self, root: &str) -> Vec<Id> {
        let mut out = Vec::new();
        let mut cur = self
            .branch(&Parent::Name(root.to_owned()))
            .and_then(|b| b.start);
        while let Some(id) = cur {
            let item = self
                .get_item(id)
                .expect("sequence links point at live operations");
            if !item.deleted {
                out.push(id);
            }
            cur = item.right;
        }
        out
    }

    /// Concatenated string content of a root sequence, skipping deletions.
    pub fn text_of(&self, root: &str) -> String {
        let mut out = String::new();
        let mut cur = self
            .branch(&Parent::Name(root.to_owned()))
            .and_then(|b| b.start);
        while let Some(id) = cur {
            let item = self
                .get_item(id)
                .expect("sequence links point at live operations");
            if !item.deleted {
                if let Content::String(s) = &item.content {
                    out.push_str(s);
                }
            }
            cur = item.right;
        }
        out
    }

    /// The winning map entry for `key` under the root `root`.
    pub fn map_entry(&self, root: &str, key: &str) -> Option<&Item> {
        let id = self
            .branch(&Parent::Name(root.to_owned()))?
            .map
            .get(key)
            .copied()?;
        self.get_item(id)
    }

    #[cfg(test)]
    pub(crate) fn push_for_test(&mut self, client: u64, block: Block) {
        self.clients.entry(client).or_default().push(block);
    }
}

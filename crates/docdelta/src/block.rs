//! Structures: operations and tombstones.
//!
//! A [`Block`] occupies a contiguous clock range on its origin replica.
//! Operations ([`Item`]) carry content plus the wiring that positions them in
//! the document: origin references, parent, and an optional parent-sub key.
//! Tombstones ([`Gc`]) reserve clock space whose content has been discarded.
//!
//! Blocks reference each other by [`Id`], never by pointer; the store
//! resolves ids through its per-client lists. The `left`/`right` fields on an
//! item are runtime sequence links rebuilt during integration; they are
//! never serialized.

use std::collections::HashSet;

use crate::clock::Id;
use crate::codec::{
    UpdateDecoder, UpdateEncoder, HAS_LEFT_ORIGIN, HAS_PARENT_SUB, HAS_RIGHT_ORIGIN, KIND_MASK,
};
use crate::content::Content;
use crate::error::UpdateError;
use crate::store::BlockStore;
use crate::txn::Transaction;
use crate::types::Parent;

/// A structure in the store: an operation or a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Item(Item),
    Gc(Gc),
}

impl Block {
    pub fn id(&self) -> Id {
        match self {
            Block::Item(item) => item.id,
            Block::Gc(gc) => gc.id,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Block::Item(item) => item.len,
            Block::Gc(gc) => gc.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the last clock value covered by this block.
    pub fn last_id(&self) -> Id {
        let id = self.id();
        Id::new(id.client, id.clock + self.len() - 1)
    }

    /// Whether the block's content is collapsed (tombstone or deleted item).
    pub fn is_deleted(&self) -> bool {
        match self {
            Block::Item(item) => item.deleted,
            Block::Gc(_) => true,
        }
    }

    /// Serializes the block, skipping the first `offset` clock values.
    pub fn write<E: UpdateEncoder>(&self, encoder: &mut E, offset: u64) {
        match self {
            Block::Item(item) => item.write(encoder, offset),
            Block::Gc(gc) => {
                encoder.write_info(0);
                encoder.write_len(gc.len - offset);
            }
        }
    }

    /// Reports the client of an unsatisfied cross-replica dependency, if any.
    ///
    /// Gaps on the block's own replica are the scheduler's concern and are
    /// never reported here.
    pub fn missing(&self, store: &BlockStore) -> Option<u64> {
        match self {
            Block::Item(item) => item.missing(store),
            Block::Gc(_) => None,
        }
    }

    /// Integrates the block into the store, skipping the first `offset`
    /// clock values (they are already covered by the local state).
    pub(crate) fn integrate(self, txn: &mut Transaction<'_>, offset: u64) {
        match self {
            Block::Item(item) => item.integrate(txn, offset),
            Block::Gc(gc) => gc.integrate(txn, offset),
        }
    }
}

/// A tombstone: a clock range whose content has been discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gc {
    pub id: Id,
    pub len: u64,
}

impl Gc {
    pub(crate) fn integrate(mut self, txn: &mut Transaction<'_>, offset: u64) {
        if offset > 0 {
            self.id.clock += offset;
            self.len -= offset;
        }
        txn.doc.store.add_block(Block::Gc(self));
    }
}

/// An operation: content plus CRDT wiring.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: Id,
    pub len: u64,
    /// Id of the element this operation was inserted after.
    pub left_origin: Option<Id>,
    /// Id of the element this operation was inserted before.
    pub right_origin: Option<Id>,
    /// Set when carried explicitly on the wire or recovered from an origin.
    pub parent: Option<Parent>,
    /// Map key under the parent, for map-style children.
    pub parent_sub: Option<String>,
    pub content: Content,
    pub deleted: bool,
    /// Runtime link to the current left neighbor block.
    pub left: Option<Id>,
    /// Runtime link to the current right neighbor block.
    pub right: Option<Id>,
}

impl Item {
    pub fn new(
        id: Id,
        left_origin: Option<Id>,
        right_origin: Option<Id>,
        parent: Option<Parent>,
        parent_sub: Option<String>,
        content: Content,
    ) -> Self {
        let len = content.len();
        Self {
            id,
            len,
            left_origin,
            right_origin,
            parent,
            parent_sub,
            content,
            deleted: false,
            left: None,
            right: None,
        }
    }

    pub fn last_id(&self) -> Id {
        Id::new(self.id.client, self.id.clock + self.len - 1)
    }

    /// Serializes the operation, skipping the first `offset` clock values.
    ///
    /// When a prefix is trimmed, the left origin is rewritten to the last
    /// trimmed element so the receiver re-attaches the remainder in place.
    pub fn write<E: UpdateEncoder>(&self, encoder: &mut E, offset: u64) {
        let origin = if offset > 0 {
            Some(Id::new(self.id.client, self.id.clock + offset - 1))
        } else {
            self.left_origin
        };
        let info = self.content.tag()
            | origin.map_or(0, |_| HAS_LEFT_ORIGIN)
            | self.right_origin.map_or(0, |_| HAS_RIGHT_ORIGIN)
            | self.parent_sub.as_ref().map_or(0, |_| HAS_PARENT_SUB);
        encoder.write_info(info);
        if let Some(o) = origin {
            encoder.write_left_id(o);
        }
        if let Some(o) = self.right_origin {
            encoder.write_right_id(o);
        }
        if origin.is_none() && self.right_origin.is_none() {
            match self
                .parent
                .as_ref()
                .expect("an operation without origins always carries its parent")
            {
                Parent::Name(name) => {
                    encoder.write_parent_info(true);
                    encoder.write_string(name);
                }
                Parent::Id(parent_id) => {
                    encoder.write_parent_info(false);
                    encoder.write_left_id(*parent_id);
                }
            }
            if let Some(sub) = &self.parent_sub {
                encoder.write_string(sub);
            }
        }
        self.content.write(encoder, offset);
    }

    /// Reads one operation body; `info` has already been consumed.
    pub fn read<'a, D: UpdateDecoder<'a>>(
        decoder: &mut D,
        id: Id,
        info: u8,
    ) -> Result<Item, UpdateError> {
        let left_origin = if info & HAS_LEFT_ORIGIN != 0 {
            Some(decoder.read_left_id()?)
        } else {
            None
        };
        let right_origin = if info & HAS_RIGHT_ORIGIN != 0 {
            Some(decoder.read_right_id()?)
        } else {
            None
        };
        let parent_carried = left_origin.is_none() && right_origin.is_none();
        let parent = if parent_carried {
            Some(if decoder.read_parent_info()? {
                Parent::Name(decoder.read_string()?)
            } else {
                Parent::Id(decoder.read_left_id()?)
            })
        } else {
            None
        };
        let parent_sub = if parent_carried && info & HAS_PARENT_SUB != 0 {
            Some(decoder.read_string()?)
        } else {
            None
        };
        let content = Content::read(decoder, info & KIND_MASK)?;
        Ok(Item::new(id, left_origin, right_origin, parent, parent_sub, content))
    }

    pub fn missing(&self, store: &BlockStore) -> Option<u64> {
        if let Some(o) = self.left_origin {
            if o.client != self.id.client && o.clock >= store.state(o.client) {
                return Some(o.client);
            }
        }
        if let Some(o) = self.right_origin {
            if o.client != self.id.client && o.clock >= store.state(o.client) {
                return Some(o.client);
            }
        }
        if let Some(Parent::Id(p)) = &self.parent {
            if p.client != self.id.client && p.clock >= store.state(p.client) {
                return Some(p.client);
            }
        }
        None
    }

    /// Inserts the operation into its parent's sequence, resolving origin
    /// references against the integrated state.
    ///
    /// Concurrent siblings with the same origins are ordered by client id;
    /// the scan below mirrors the insertion-point search of a replicated
    /// growable array, generalized to interleaved origin chains.
    pub(crate) fn integrate(mut self, txn: &mut Transaction<'_>, offset: u64) {
        if offset > 0 {
            self.id.clock += offset;
            self.left_origin = Some(Id::new(self.id.client, self.id.clock - 1));
            self.content = self.content.split_at(offset);
            self.len -= offset;
        }

        let mut left = self
            .left_origin
            .and_then(|o| txn.doc.store.split_clean_end(o));
        let right_bound = self
            .right_origin
            .and_then(|o| txn.doc.store.split_clean_start(o));

        if self.parent.is_none() {
            if let Some(l) = left {
                if let Some(item) = txn.doc.store.get_item(l) {
                    self.parent = item.parent.clone();
                    self.parent_sub = item.parent_sub.clone();
                }
            }
            if let Some(r) = right_bound {
                if let Some(item) = txn.doc.store.get_item(r) {
                    self.parent = item.parent.clone();
                    self.parent_sub = item.parent_sub.clone();
                }
            }
        }
        let parent = match self.parent.clone() {
            Some(parent) => parent,
            None => {
                // Both origins resolved into collapsed regions: the position
                // is unrecoverable, but the clock range must stay reserved.
                Gc {
                    id: self.id,
                    len: self.len,
                }
                .integrate(txn, 0);
                return;
            }
        };

        let scan_needed = match (left, right_bound) {
            (None, None) => true,
            (None, Some(r)) => txn
                .doc
                .store
                .get_item(r)
                .map_or(false, |ri| ri.left.is_some()),
            (Some(l), rb) => txn.doc.store.get_item(l).and_then(|li| li.right) != rb,
        };

        if scan_needed {
            let mut o = match left {
                Some(l) => txn.doc.store.get_item(l).and_then(|li| li.right),
                None => match &self.parent_sub {
                    Some(sub) => txn.doc.store.map_scan_start(&parent, sub),
                    None => txn.doc.store.branch(&parent).and_then(|b| b.start),
                },
            };
            let mut conflicting: HashSet<Id> = HashSet::new();
            let mut items_before_origin: HashSet<Id> = HashSet::new();
            while let Some(oid) = o {
                if Some(oid) == right_bound {
                    break;
                }
                items_before_origin.insert(oid);
                conflicting.insert(oid);
                let (o_left_origin, o_right_origin, o_right) = {
                    let oi = txn
                        .doc
                        .store
                        .get_item(oid)
                        .expect("sequence links point at live operations");
                    (oi.left_origin, oi.right_origin, oi.right)
                };
                if o_left_origin == self.left_origin {
                    // Concurrent insert at the same spot: client id breaks the tie.
                    if oid.client < self.id.client {
                        left = Some(oid);
                        conflicting.clear();
                    } else if o_right_origin == self.right_origin {
                        break;
                    }
                } else if let Some(oo) = o_left_origin {
                    match txn.doc.store.block_id_containing(oo) {
                        Some(ob) if items_before_origin.contains(&ob) => {
                            if !conflicting.contains(&ob) {
                                left = Some(oid);
                                conflicting.clear();
                            }
                        }
                        _ => break,
                    }
                } else {
                    break;
                }
                o = o_right;
            }
        }

        self.left = left;
        match left {
            Some(l) => {
                let li = txn
                    .doc
                    .store
                    .get_item_mut(l)
                    .expect("left neighbor is a live operation");
                self.right = li.right;
                li.right = Some(self.id);
            }
            None => {
                self.right = match &self.parent_sub {
                    Some(sub) => txn.doc.store.map_scan_start(&parent, sub),
                    None => {
                        let branch = txn.doc.store.branch_mut(parent.clone());
                        let r = branch.start;
                        branch.start = Some(self.id);
                        r
                    }
                };
            }
        }
        match self.right {
            Some(r) => {
                txn.doc
                    .store
                    .get_item_mut(r)
                    .expect("right neighbor is a live operation")
                    .left = Some(self.id);
            }
            None => {
                if let Some(sub) = self.parent_sub.clone() {
                    txn.doc
                        .store
                        .branch_mut(parent.clone())
                        .map
                        .insert(sub, self.id);
                    if let Some(l) = self.left {
                        // The previous entry for this key loses and collapses.
                        let loser = txn
                            .doc
                            .store
                            .get_item(l)
                            .filter(|li| !li.deleted)
                            .map(|li| (li.id, li.len));
                        if let Some((lid, llen)) = loser {
                            txn.doc.store.mark_deleted(lid.client, lid.clock, llen);
                            txn.delete_set.add(lid.client, lid.clock, llen);
                        }
                    }
                }
            }
        }

        if self.content.starts_deleted() {
            self.deleted = true;
        }
        if let Content::Type(_) = self.content {
            txn.doc.store.branch_mut(Parent::Id(self.id));
        }
        txn.doc.store.add_block(Block::Item(self));
    }
}

//! Transactions: the mutation scope for local edits and update application.

use crate::block::{Block, Item};
use crate::clock::{Id, StateVector};
use crate::content::Content;
use crate::delete_set::DeleteSet;
use crate::doc::Doc;
use crate::types::Parent;

/// A mutation scope over one document.
///
/// All store changes, local edits as well as integration of remote
/// structures, happen inside a transaction. The exclusive borrow of the
/// document guarantees a single document is never driven by two transactions
/// at once.
pub struct Transaction<'doc> {
    pub(crate) doc: &'doc mut Doc,
    /// State vector snapshot taken when the transaction opened.
    pub before_state: StateVector,
    /// Deletions produced by this transaction's local operations.
    pub delete_set: DeleteSet,
    /// Caller-supplied origin marker.
    pub origin: Option<String>,
    /// `false` when the transaction applies remote updates.
    pub local: bool,
}

impl<'doc> Transaction<'doc> {
    pub(crate) fn new(doc: &'doc mut Doc, origin: Option<String>, local: bool) -> Self {
        let before_state = doc.store.state_vector();
        Self {
            doc,
            before_state,
            delete_set: DeleteSet::default(),
            origin,
            local,
        }
    }

    pub fn doc(&self) -> &Doc {
        self.doc
    }

    pub(crate) fn commit(&mut self) {
        self.delete_set.canonicalize();
    }

    fn next_id(&self) -> Id {
        Id::new(self.doc.client_id, self.doc.store.state(self.doc.client_id))
    }

    /// Appends `content` at the end of the root sequence `root`.
    pub fn push(&mut self, root: &str, content: Content) -> Id {
        let mut cur = self
            .doc
            .store
            .branch(&Parent::Name(root.to_owned()))
            .and_then(|b| b.start);
        let mut last = None;
        while let Some(id) = cur {
            let item = self
                .doc
                .store
                .get_item(id)
                .expect("sequence links point at live operations");
            last = Some(item.last_id());
            cur = item.right;
        }
        self.insert_after(root, last, content)
    }

    /// Inserts `content` after the element `left` (`None` prepends) in the
    /// root sequence `root`. Returns the id of the new operation.
    pub fn insert_after(&mut self, root: &str, left: Option<Id>, content: Content) -> Id {
        let parent = Parent::Name(root.to_owned());
        let right_origin = match left {
            Some(l) => match self.doc.store.get_block(l) {
                Some(Block::Item(item)) => {
                    if item.last_id() == l {
                        item.right
                    } else {
                        Some(Id::new(l.client, l.clock + 1))
                    }
                }
                _ => None,
            },
            None => self.doc.store.branch(&parent).and_then(|b| b.start),
        };
        let id = self.next_id();
        let item = Item::new(id, left, right_origin, Some(parent), None, content);
        Block::Item(item).integrate(self, 0);
        id
    }

    /// Sets the map entry `key` under the root `root`. The new entry wins
    /// over the current one, which is deleted.
    pub fn set_map(&mut self, root: &str, key: &str, content: Content) -> Id {
        let parent = Parent::Name(root.to_owned());
        let left_origin = self
            .doc
            .store
            .branch(&parent)
            .and_then(|b| b.map.get(key).copied())
            .and_then(|l| self.doc.store.get_item(l).map(|i| i.last_id()));
        let id = self.next_id();
        let item = Item::new(
            id,
            left_origin,
            None,
            Some(parent),
            Some(key.to_owned()),
            content,
        );
        Block::Item(item).integrate(self, 0);
        id
    }

    /// Deletes the clock range `[target.clock, target.clock + len)` of
    /// `target.client`.
    pub fn delete(&mut self, target: Id, len: u64) {
        self.doc.store.mark_deleted(target.client, target.clock, len);
        self.delete_set.add(target.client, target.clock, len);
    }
}

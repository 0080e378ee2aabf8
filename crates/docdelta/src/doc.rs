//! The document: a block store, a client identity, and a codec choice.

use crate::clock::StateVector;
use crate::codec::Format;
use crate::generate_client_id;
use crate::store::BlockStore;
use crate::txn::Transaction;

/// Construction options for a [`Doc`].
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Replica identity. Drawn at random when absent.
    pub client_id: Option<u64>,
    /// Wire format used by the codec-agnostic entry points.
    pub format: Format,
}

/// A synchronized document replica.
#[derive(Debug)]
pub struct Doc {
    pub client_id: u64,
    pub format: Format,
    pub store: BlockStore,
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl Doc {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            client_id: options.client_id.unwrap_or_else(generate_client_id),
            format: options.format,
            store: BlockStore::default(),
        }
    }

    /// A doc with a fixed replica id and the default wire format.
    pub fn with_client_id(client_id: u64) -> Self {
        Self::with_options(Options {
            client_id: Some(client_id),
            ..Options::default()
        })
    }

    pub fn state_vector(&self) -> StateVector {
        self.store.state_vector()
    }

    /// Runs `f` inside a transaction.
    pub fn transact<R>(&mut self, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        self.transact_with(None, true, f)
    }

    /// Runs `f` inside a transaction tagged with an origin marker.
    pub fn transact_with_origin<R>(
        &mut self,
        origin: &str,
        f: impl FnOnce(&mut Transaction<'_>) -> R,
    ) -> R {
        self.transact_with(Some(origin.to_owned()), true, f)
    }

    pub(crate) fn transact_with<R>(
        &mut self,
        origin: Option<String>,
        local: bool,
        f: impl FnOnce(&mut Transaction<'_>) -> R,
    ) -> R {
        let mut txn = Transaction::new(self, origin, local);
        let result = f(&mut txn);
        txn.commit();
        result
    }
}

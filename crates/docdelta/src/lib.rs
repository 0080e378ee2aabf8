//! docdelta: a CRDT document synchronization engine.
//!
//! Replicas edit independently and exchange compact binary updates. An
//! update carries the structures a peer is missing (selected by its state
//! vector) followed by a delete set; the receiver buffers anything whose
//! causal prerequisites have not arrived and integrates it the moment they
//! do. Two wire format versions share one logical codec surface.
//!
//! ```
//! use docdelta::{apply_update, encode_state_as_update, Content, Doc, StateVector};
//!
//! let mut a = Doc::new();
//! a.transact(|txn| {
//!     txn.push("text", Content::String("hello".into()));
//! });
//!
//! let mut b = Doc::new();
//! apply_update(&mut b, &encode_state_as_update(&a, &StateVector::new())).unwrap();
//! assert_eq!(b.store.text_of("text"), "hello");
//! ```

pub mod block;
pub mod clock;
pub mod codec;
pub mod content;
pub mod delete_set;
pub mod doc;
pub mod error;
pub mod store;
pub mod txn;
pub mod types;
pub mod update;

pub use block::{Block, Gc, Item};
pub use clock::{Id, StateVector};
pub use codec::Format;
pub use content::Content;
pub use delete_set::DeleteSet;
pub use doc::{Doc, Options};
pub use error::UpdateError;
pub use txn::Transaction;
pub use types::{Parent, TypeKind};
pub use update::{
    apply_update, apply_update_v1, apply_update_v2, decode_state_vector, encode_state_as_update,
    encode_state_as_update_v1, encode_state_as_update_v2, encode_state_vector,
};

use rand::Rng;

/// Generates a random replica id.
///
/// Zero is avoided so an uninitialized id is never mistaken for a real one.
pub fn generate_client_id() -> u64 {
    let mut rng = rand::thread_rng();
    rng.gen_range(1..=i64::MAX as u64)
}

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_nonzero() {
        for _ in 0..64 {
            assert_ne!(generate_client_id(), 0);
        }
    }
}

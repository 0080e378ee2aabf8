//! Update exchange entry points.
//!
//! The wire layout of an update is:
//!
//! ```text
//! update         := struct_section delete_set
//! struct_section := varuint(numReplicas) replica_block^numReplicas
//! replica_block  := varuint(numStructs) client clock struct^numStructs
//! struct         := info ( tombstone-len | origins/parent + content )
//! ```
//!
//! Replica blocks appear in descending client order; the first struct of a
//! block may carry a clock offset trimming the prefix the receiver already
//! knows. The state-vector message is a plain varint stream shared by both
//! codec versions.
//!
//! The codec-agnostic functions use the document's configured [`Format`];
//! the `_v1`/`_v2` variants name a codec explicitly and interoperate only
//! with that wire version.

pub(crate) mod decode;
pub(crate) mod encode;
pub(crate) mod integrate;

use docdelta_buffers::{Reader, Writer};
use tracing::trace;

use crate::clock::StateVector;
use crate::codec::{DecoderV1, DecoderV2, EncoderV1, EncoderV2, Format, UpdateDecoder, UpdateEncoder};
use crate::delete_set::DeleteSet;
use crate::doc::Doc;
use crate::error::UpdateError;

/// Encodes the document's state vector.
pub fn encode_state_vector(doc: &Doc) -> Vec<u8> {
    let mut w = Writer::new();
    encode::write_state_vector(&mut w, &doc.state_vector());
    w.flush()
}

/// Decodes a state-vector message. Entry order on the wire is not
/// significant.
pub fn decode_state_vector(data: &[u8]) -> Result<StateVector, UpdateError> {
    let mut r = Reader::new(data);
    encode::read_state_vector(&mut r)
}

/// Encodes everything `target` is missing, using the document's configured
/// format. An empty target state vector encodes the whole document.
pub fn encode_state_as_update(doc: &Doc, target: &StateVector) -> Vec<u8> {
    match doc.format {
        Format::V1 => encode_state_as_update_v1(doc, target),
        Format::V2 => encode_state_as_update_v2(doc, target),
    }
}

pub fn encode_state_as_update_v1(doc: &Doc, target: &StateVector) -> Vec<u8> {
    let mut encoder = EncoderV1::new();
    encode_into(&mut encoder, doc, target);
    encoder.finalize()
}

pub fn encode_state_as_update_v2(doc: &Doc, target: &StateVector) -> Vec<u8> {
    let mut encoder = EncoderV2::new();
    encode_into(&mut encoder, doc, target);
    encoder.finalize()
}

fn encode_into<E: UpdateEncoder>(encoder: &mut E, doc: &Doc, target: &StateVector) {
    encode::write_blocks(encoder, &doc.store, target);
    DeleteSet::from_store(&doc.store).write(encoder);
}

/// Applies an update using the document's configured format.
///
/// Structures whose causal prerequisites are missing are buffered and
/// integrated once a later update supplies them; a malformed update leaves
/// the document untouched.
pub fn apply_update(doc: &mut Doc, update: &[u8]) -> Result<(), UpdateError> {
    match doc.format {
        Format::V1 => apply_update_v1(doc, update),
        Format::V2 => apply_update_v2(doc, update),
    }
}

pub fn apply_update_v1(doc: &mut Doc, update: &[u8]) -> Result<(), UpdateError> {
    apply_with(doc, DecoderV1::new(update))
}

pub fn apply_update_v2(doc: &mut Doc, update: &[u8]) -> Result<(), UpdateError> {
    apply_with(doc, DecoderV2::new(update)?)
}

fn apply_with<'a, D: UpdateDecoder<'a>>(doc: &mut Doc, mut decoder: D) -> Result<(), UpdateError> {
    // Both sections are parsed in full before any store mutation, so a
    // malformed update aborts with the store untouched.
    let refs = decode::read_client_blocks(&mut decoder)?;
    let ds = DeleteSet::read(&mut decoder)?;
    trace!(clients = refs.len(), "parsed update");
    doc.transact_with(None, false, |txn| {
        integrate::apply_parsed(txn, refs, ds);
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::StateVector;

    #[test]
    fn state_vector_roundtrip() {
        let sv: StateVector = [(7u64, 3u64), (1, 12), (900, 1)].into_iter().collect();
        let mut w = Writer::new();
        encode::write_state_vector(&mut w, &sv);
        let data = w.flush();
        assert_eq!(decode_state_vector(&data).unwrap(), sv);
    }

    #[test]
    fn empty_state_vector_is_one_byte() {
        let mut w = Writer::new();
        encode::write_state_vector(&mut w, &StateVector::new());
        assert_eq!(w.flush(), [0x00]);
    }

    #[test]
    fn state_vector_accepts_any_order() {
        let mut w = Writer::new();
        for v in [2u64, 1, 5, 9, 2, 3, 7] {
            w.var_u64(v);
        }
        // count=2, pairs (1,5) and (9,2) then (3,7) is past the count and ignored.
        let sv = decode_state_vector(&w.flush()).unwrap();
        assert_eq!(sv.get(1), 5);
        assert_eq!(sv.get(9), 2);
        assert_eq!(sv.get(3), 0);
    }

    #[test]
    fn truncated_state_vector_errors() {
        assert!(decode_state_vector(&[0x02, 0x01]).is_err());
    }
}

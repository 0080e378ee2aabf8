//! Update wire codecs.
//!
//! Two codec versions implement the same logical surface, expressed by the
//! [`UpdateEncoder`] / [`UpdateDecoder`] traits:
//!
//! - **V1** ([`v1`]): every field as a varint or length-prefixed byte run on a
//!   single stream.
//! - **V2** ([`v2`]): repetitive fields routed through run-length-compressed
//!   column streams, framed ahead of the primary stream.
//!
//! The two versions are not interchangeable on a per-message basis; which one
//! a peer speaks is negotiated out of band and selected explicitly via
//! [`Format`].
//!
//! # Info byte layout
//!
//! ```text
//! | 7          | 6           | 5          | 4..0                        |
//! | leftOrigin | rightOrigin | parent-sub | kind (0 = tombstone,        |
//! |            |             |            |       1–7 = content tag)    |
//! ```
//!
//! Parent information is carried explicitly only when both origin bits are
//! clear; otherwise the parent is recovered from an origin at integration
//! time.

pub mod rle;
pub mod v1;
pub mod v2;

pub use v1::{DecoderV1, EncoderV1};
pub use v2::{DecoderV2, EncoderV2};

use docdelta_buffers::{Reader, Writer};

use crate::clock::Id;
use crate::error::UpdateError;

/// Mask selecting the structure kind from an info byte.
pub const KIND_MASK: u8 = 0b0001_1111;
/// Info bit: the operation carries a left origin.
pub const HAS_LEFT_ORIGIN: u8 = 0b1000_0000;
/// Info bit: the operation carries a right origin.
pub const HAS_RIGHT_ORIGIN: u8 = 0b0100_0000;
/// Info bit: the operation carries a parent-sub key.
pub const HAS_PARENT_SUB: u8 = 0b0010_0000;

/// Wire format version selector.
///
/// An explicit configuration value threaded through the encode/apply entry
/// points; there is no process-wide default to switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    V1,
    V2,
}

/// Logical write surface shared by both codec versions.
pub trait UpdateEncoder {
    /// The primary byte sink, where counts and length-prefixed sections live.
    fn rest(&mut self) -> &mut Writer;
    fn write_client(&mut self, client: u64);
    fn write_left_id(&mut self, id: Id);
    fn write_right_id(&mut self, id: Id);
    fn write_info(&mut self, info: u8);
    /// `true` selects a root-name parent, `false` a parent id.
    fn write_parent_info(&mut self, is_root_name: bool);
    fn write_string(&mut self, s: &str);
    fn write_len(&mut self, len: u64);
    fn write_buf(&mut self, buf: &[u8]);
    fn write_json(&mut self, value: &serde_json::Value);
    fn write_type_ref(&mut self, type_ref: u8);
    /// Resets the delete-set clock cursor ahead of one client's ranges.
    fn reset_ds_cur_val(&mut self);
    fn write_ds_clock(&mut self, clock: u64);
    fn write_ds_len(&mut self, len: u64);
    /// Emits the final byte array.
    fn finalize(self) -> Vec<u8>;
}

/// Logical read surface shared by both codec versions.
pub trait UpdateDecoder<'a> {
    /// The primary byte source, mirroring [`UpdateEncoder::rest`].
    fn rest(&mut self) -> &mut Reader<'a>;
    fn read_client(&mut self) -> Result<u64, UpdateError>;
    fn read_left_id(&mut self) -> Result<Id, UpdateError>;
    fn read_right_id(&mut self) -> Result<Id, UpdateError>;
    fn read_info(&mut self) -> Result<u8, UpdateError>;
    fn read_parent_info(&mut self) -> Result<bool, UpdateError>;
    fn read_string(&mut self) -> Result<String, UpdateError>;
    fn read_len(&mut self) -> Result<u64, UpdateError>;
    fn read_buf(&mut self) -> Result<Vec<u8>, UpdateError>;
    fn read_json(&mut self) -> Result<serde_json::Value, UpdateError>;
    fn read_type_ref(&mut self) -> Result<u8, UpdateError>;
    fn reset_ds_cur_val(&mut self);
    fn read_ds_clock(&mut self) -> Result<u64, UpdateError>;
    fn read_ds_len(&mut self) -> Result<u64, UpdateError>;
}

/// Encodes a JSON value to its CBOR wire form.
pub(crate) fn encode_cbor(value: &serde_json::Value) -> Vec<u8> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .expect("CBOR serialization of a JSON value into a Vec cannot fail");
    out
}

/// Decodes a JSON value from its CBOR wire form.
pub(crate) fn decode_cbor(bytes: &[u8]) -> Result<serde_json::Value, UpdateError> {
    ciborium::de::from_reader(bytes).map_err(|_| UpdateError::InvalidPayload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cbor_roundtrip() {
        for value in [
            json!(null),
            json!(true),
            json!(42),
            json!(-7),
            json!(1.5),
            json!("text"),
            json!([1, "two", {"three": 3}]),
            json!({"a": [null, false]}),
        ] {
            let bytes = encode_cbor(&value);
            assert_eq!(decode_cbor(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn cbor_rejects_garbage() {
        assert!(decode_cbor(&[0xff, 0x00, 0x13]).is_err());
    }

    #[test]
    fn format_defaults_to_v1() {
        assert_eq!(Format::default(), Format::V1);
    }
}

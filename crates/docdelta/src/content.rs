//! Typed operation payloads.
//!
//! The low 5 bits of a structure's info byte select the payload variant.
//! Tag 0 is reserved for tombstones (no payload); tags 1–7 are the content
//! kinds below. `Deleted`, `Json` and `String` span multiple clock values and
//! can be split at a clock offset; every other kind occupies exactly one.

use serde_json::Value;

use crate::codec::{UpdateDecoder, UpdateEncoder};
use crate::error::UpdateError;
use crate::types::TypeKind;

/// Content payload of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// A run of elements that was deleted before this replica ever saw its
    /// content. Occupies clock space, renders nothing.
    Deleted(u64),
    /// A run of JSON values, one clock per value.
    Json(Vec<Value>),
    /// An opaque byte blob.
    Binary(Vec<u8>),
    /// A run of text, one clock per `char`.
    String(String),
    /// A single embedded JSON value (e.g. a mention or image descriptor).
    Embed(Value),
    /// A formatting boundary marker for rich text.
    Format { key: String, value: Value },
    /// Creation of a nested shared type.
    Type(TypeKind),
}

impl Content {
    /// The wire tag carried in the low 5 bits of the info byte.
    pub fn tag(&self) -> u8 {
        match self {
            Content::Deleted(_) => 1,
            Content::Json(_) => 2,
            Content::Binary(_) => 3,
            Content::String(_) => 4,
            Content::Embed(_) => 5,
            Content::Format { .. } => 6,
            Content::Type(_) => 7,
        }
    }

    /// Number of clock values this payload occupies.
    pub fn len(&self) -> u64 {
        match self {
            Content::Deleted(len) => *len,
            Content::Json(values) => values.len() as u64,
            Content::String(s) => s.chars().count() as u64,
            Content::Binary(_) | Content::Embed(_) | Content::Format { .. } | Content::Type(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this payload starts its item in the deleted state.
    pub fn starts_deleted(&self) -> bool {
        matches!(self, Content::Deleted(_))
    }

    /// Splits the payload at clock offset `at`, keeping `[0, at)` in `self`
    /// and returning `[at, len)`.
    ///
    /// Only called for offsets strictly inside the payload, which rules out
    /// the single-clock variants.
    pub fn split_at(&mut self, at: u64) -> Content {
        match self {
            Content::Deleted(len) => {
                let right = *len - at;
                *len = at;
                Content::Deleted(right)
            }
            Content::Json(values) => Content::Json(values.split_off(at as usize)),
            Content::String(s) => {
                let byte_pos = s
                    .char_indices()
                    .nth(at as usize)
                    .map(|(i, _)| i)
                    .unwrap_or(s.len());
                Content::String(s.split_off(byte_pos))
            }
            _ => unreachable!("single-clock content is never split"),
        }
    }

    /// Writes the payload, skipping the first `offset` clock values.
    pub fn write<E: UpdateEncoder>(&self, encoder: &mut E, offset: u64) {
        match self {
            Content::Deleted(len) => encoder.write_len(len - offset),
            Content::Json(values) => {
                let rest = &values[offset as usize..];
                encoder.write_len(rest.len() as u64);
                for value in rest {
                    encoder.write_json(value);
                }
            }
            Content::Binary(bytes) => encoder.write_buf(bytes),
            Content::String(s) => {
                if offset == 0 {
                    encoder.write_string(s);
                } else {
                    let byte_pos = s
                        .char_indices()
                        .nth(offset as usize)
                        .map(|(i, _)| i)
                        .unwrap_or(s.len());
                    encoder.write_string(&s[byte_pos..]);
                }
            }
            Content::Embed(value) => encoder.write_json(value),
            Content::Format { key, value } => {
                encoder.write_string(key);
                encoder.write_json(value);
            }
            Content::Type(kind) => encoder.write_type_ref(kind.as_u8()),
        }
    }

    /// Reads the payload selected by `tag` (the low 5 bits of the info byte).
    pub fn read<'a, D: UpdateDecoder<'a>>(decoder: &mut D, tag: u8) -> Result<Content, UpdateError> {
        match tag {
            1 => Ok(Content::Deleted(decoder.read_len()?)),
            2 => {
                let count = decoder.read_len()? as usize;
                let mut values = Vec::with_capacity(count.min(1 << 12));
                for _ in 0..count {
                    values.push(decoder.read_json()?);
                }
                Ok(Content::Json(values))
            }
            3 => Ok(Content::Binary(decoder.read_buf()?)),
            4 => Ok(Content::String(decoder.read_string()?)),
            5 => Ok(Content::Embed(decoder.read_json()?)),
            6 => {
                let key = decoder.read_string()?;
                let value = decoder.read_json()?;
                Ok(Content::Format { key, value })
            }
            7 => {
                let raw = decoder.read_type_ref()?;
                let kind = TypeKind::from_u8(raw).ok_or(UpdateError::UnknownTypeRef(raw))?;
                Ok(Content::Type(kind))
            }
            other => Err(UpdateError::UnknownContentTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecoderV1, EncoderV1};
    use serde_json::json;

    fn roundtrip(content: &Content, offset: u64) -> Content {
        let mut e = EncoderV1::new();
        content.write(&mut e, offset);
        let data = e.finalize();
        let mut d = DecoderV1::new(&data);
        Content::read(&mut d, content.tag()).unwrap()
    }

    #[test]
    fn string_len_counts_chars() {
        let content = Content::String("héllo".into());
        assert_eq!(content.len(), 5);
    }

    #[test]
    fn split_string_at_char_boundary() {
        let mut content = Content::String("héllo".into());
        let right = content.split_at(2);
        assert_eq!(content, Content::String("hé".into()));
        assert_eq!(right, Content::String("llo".into()));
    }

    #[test]
    fn split_deleted() {
        let mut content = Content::Deleted(10);
        let right = content.split_at(4);
        assert_eq!(content, Content::Deleted(4));
        assert_eq!(right, Content::Deleted(6));
    }

    #[test]
    fn split_json_run() {
        let mut content = Content::Json(vec![json!(1), json!(2), json!(3)]);
        let right = content.split_at(1);
        assert_eq!(content.len(), 1);
        assert_eq!(right.len(), 2);
    }

    #[test]
    fn wire_roundtrip_all_kinds() {
        let cases = [
            Content::Deleted(3),
            Content::Json(vec![json!({"a": 1}), json!(null)]),
            Content::Binary(vec![0xde, 0xad]),
            Content::String("hello".into()),
            Content::Embed(json!({"image": "x.png"})),
            Content::Format {
                key: "bold".into(),
                value: json!(true),
            },
            Content::Type(TypeKind::Text),
        ];
        for content in &cases {
            assert_eq!(&roundtrip(content, 0), content);
        }
    }

    #[test]
    fn write_with_offset_trims_prefix() {
        let content = Content::String("abcdef".into());
        let decoded = roundtrip(&content, 2);
        assert_eq!(decoded, Content::String("cdef".into()));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut e = EncoderV1::new();
        e.write_len(1);
        let data = e.finalize();
        let mut d = DecoderV1::new(&data);
        assert!(matches!(
            Content::read(&mut d, 23),
            Err(UpdateError::UnknownContentTag(23))
        ));
    }
}

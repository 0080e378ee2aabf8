//! V2 update codec: column streams with run-length compression.
//!
//! Repetitive fields are routed into per-field columns so runs of identical
//! values compress away; payload bytes and counts stay on the primary stream.
//!
//! Frame layout emitted by [`EncoderV2::finalize`]:
//!
//! ```text
//! [0xD2] len(info) info  len(parentInfo) parentInfo  len(client) client
//!        len(len) len    len(leftClock) leftClock    len(rightClock) rightClock
//!        len(string) string  len(typeRef) typeRef    rest...
//! ```
//!
//! Every `len(...)` is a varint byte count. V1 carries no version marker of
//! its own, so feeding a V1 stream to this decoder fails on the frame check,
//! while the reverse direction surfaces as a malformed update during parsing.

use docdelta_buffers::{Reader, Writer};

use crate::clock::Id;
use crate::codec::rle::{ByteRleDecoder, ByteRleEncoder, UintRleDecoder, UintRleEncoder};
use crate::codec::{decode_cbor, encode_cbor, UpdateDecoder, UpdateEncoder};
use crate::error::UpdateError;

const V2_FRAME: u8 = 0xd2;

/// V2 update encoder.
pub struct EncoderV2 {
    rest: Writer,
    info: ByteRleEncoder,
    parent_info: ByteRleEncoder,
    client: UintRleEncoder,
    len: UintRleEncoder,
    left_clock: UintRleEncoder,
    right_clock: UintRleEncoder,
    string: Writer,
    type_ref: ByteRleEncoder,
    ds_cur_val: u64,
}

impl Default for EncoderV2 {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderV2 {
    pub fn new() -> Self {
        Self {
            rest: Writer::new(),
            info: ByteRleEncoder::new(),
            parent_info: ByteRleEncoder::new(),
            client: UintRleEncoder::new(),
            len: UintRleEncoder::new(),
            left_clock: UintRleEncoder::new(),
            right_clock: UintRleEncoder::new(),
            string: Writer::with_alloc_size(256),
            type_ref: ByteRleEncoder::new(),
            ds_cur_val: 0,
        }
    }
}

impl UpdateEncoder for EncoderV2 {
    fn rest(&mut self) -> &mut Writer {
        &mut self.rest
    }

    fn write_client(&mut self, client: u64) {
        self.client.write(client);
    }

    fn write_left_id(&mut self, id: Id) {
        self.client.write(id.client);
        self.left_clock.write(id.clock);
    }

    fn write_right_id(&mut self, id: Id) {
        self.client.write(id.client);
        self.right_clock.write(id.clock);
    }

    fn write_info(&mut self, info: u8) {
        self.info.write(info);
    }

    fn write_parent_info(&mut self, is_root_name: bool) {
        self.parent_info.write(is_root_name as u8);
    }

    fn write_string(&mut self, s: &str) {
        self.string.var_string(s);
    }

    fn write_len(&mut self, len: u64) {
        self.len.write(len);
    }

    fn write_buf(&mut self, buf: &[u8]) {
        self.rest.var_buf(buf);
    }

    fn write_json(&mut self, value: &serde_json::Value) {
        let bytes = encode_cbor(value);
        self.rest.var_buf(&bytes);
    }

    fn write_type_ref(&mut self, type_ref: u8) {
        self.type_ref.write(type_ref);
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_cur_val = 0;
    }

    fn write_ds_clock(&mut self, clock: u64) {
        let diff = clock - self.ds_cur_val;
        self.ds_cur_val = clock;
        self.rest.var_u64(diff);
    }

    fn write_ds_len(&mut self, len: u64) {
        debug_assert!(len > 0, "delete ranges are never empty");
        self.rest.var_u64(len - 1);
        self.ds_cur_val += len;
    }

    fn finalize(mut self) -> Vec<u8> {
        let mut out = Writer::new();
        out.u8(V2_FRAME);
        out.var_buf(&self.info.finalize());
        out.var_buf(&self.parent_info.finalize());
        out.var_buf(&self.client.finalize());
        out.var_buf(&self.len.finalize());
        out.var_buf(&self.left_clock.finalize());
        out.var_buf(&self.right_clock.finalize());
        out.var_buf(&self.string.flush());
        out.var_buf(&self.type_ref.finalize());
        out.buf(&self.rest.flush());
        out.flush()
    }
}

/// V2 update decoder.
pub struct DecoderV2<'a> {
    rest: Reader<'a>,
    info: ByteRleDecoder<'a>,
    parent_info: ByteRleDecoder<'a>,
    client: UintRleDecoder<'a>,
    len: UintRleDecoder<'a>,
    left_clock: UintRleDecoder<'a>,
    right_clock: UintRleDecoder<'a>,
    string: Reader<'a>,
    type_ref: ByteRleDecoder<'a>,
    ds_cur_val: u64,
}

impl<'a> DecoderV2<'a> {
    /// Opens a V2 frame. Fails with [`UpdateError::UnknownFormat`] when the
    /// input does not start with the V2 frame marker.
    pub fn new(data: &'a [u8]) -> Result<Self, UpdateError> {
        let mut r = Reader::new(data);
        if r.u8().map_err(|_| UpdateError::UnknownFormat)? != V2_FRAME {
            return Err(UpdateError::UnknownFormat);
        }
        let info = r.var_buf()?;
        let parent_info = r.var_buf()?;
        let client = r.var_buf()?;
        let len = r.var_buf()?;
        let left_clock = r.var_buf()?;
        let right_clock = r.var_buf()?;
        let string = r.var_buf()?;
        let type_ref = r.var_buf()?;
        let rest = &data[r.x..];
        Ok(Self {
            rest: Reader::new(rest),
            info: ByteRleDecoder::new(info),
            parent_info: ByteRleDecoder::new(parent_info),
            client: UintRleDecoder::new(client),
            len: UintRleDecoder::new(len),
            left_clock: UintRleDecoder::new(left_clock),
            right_clock: UintRleDecoder::new(right_clock),
            string: Reader::new(string),
            type_ref: ByteRleDecoder::new(type_ref),
            ds_cur_val: 0,
        })
    }
}

impl<'a> UpdateDecoder<'a> for DecoderV2<'a> {
    fn rest(&mut self) -> &mut Reader<'a> {
        &mut self.rest
    }

    fn read_client(&mut self) -> Result<u64, UpdateError> {
        Ok(self.client.read()?)
    }

    fn read_left_id(&mut self) -> Result<Id, UpdateError> {
        let client = self.client.read()?;
        let clock = self.left_clock.read()?;
        Ok(Id::new(client, clock))
    }

    fn read_right_id(&mut self) -> Result<Id, UpdateError> {
        let client = self.client.read()?;
        let clock = self.right_clock.read()?;
        Ok(Id::new(client, clock))
    }

    fn read_info(&mut self) -> Result<u8, UpdateError> {
        Ok(self.info.read()?)
    }

    fn read_parent_info(&mut self) -> Result<bool, UpdateError> {
        Ok(self.parent_info.read()? == 1)
    }

    fn read_string(&mut self) -> Result<String, UpdateError> {
        Ok(self.string.var_string()?)
    }

    fn read_len(&mut self) -> Result<u64, UpdateError> {
        Ok(self.len.read()?)
    }

    fn read_buf(&mut self) -> Result<Vec<u8>, UpdateError> {
        Ok(self.rest.var_buf()?.to_vec())
    }

    fn read_json(&mut self) -> Result<serde_json::Value, UpdateError> {
        let bytes = self.rest.var_buf()?;
        decode_cbor(bytes)
    }

    fn read_type_ref(&mut self) -> Result<u8, UpdateError> {
        Ok(self.type_ref.read()?)
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_cur_val = 0;
    }

    fn read_ds_clock(&mut self) -> Result<u64, UpdateError> {
        self.ds_cur_val += self.rest.var_u64()?;
        Ok(self.ds_cur_val)
    }

    fn read_ds_len(&mut self) -> Result<u64, UpdateError> {
        let len = self.rest.var_u64()? + 1;
        self.ds_cur_val += len;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::id;
    use serde_json::json;

    #[test]
    fn field_roundtrip() {
        let mut e = EncoderV2::new();
        for _ in 0..3 {
            e.write_info(0x84);
        }
        e.write_client(9);
        e.write_left_id(id(9, 10));
        e.write_right_id(id(2, 0));
        e.write_parent_info(false);
        e.write_string("key");
        e.write_len(5);
        e.write_len(5);
        e.write_json(&json!([1, 2, 3]));
        e.write_type_ref(1);
        let data = e.finalize();

        let mut d = DecoderV2::new(&data).unwrap();
        for _ in 0..3 {
            assert_eq!(d.read_info().unwrap(), 0x84);
        }
        assert_eq!(d.read_client().unwrap(), 9);
        assert_eq!(d.read_left_id().unwrap(), id(9, 10));
        assert_eq!(d.read_right_id().unwrap(), id(2, 0));
        assert!(!d.read_parent_info().unwrap());
        assert_eq!(d.read_string().unwrap(), "key");
        assert_eq!(d.read_len().unwrap(), 5);
        assert_eq!(d.read_len().unwrap(), 5);
        assert_eq!(d.read_json().unwrap(), json!([1, 2, 3]));
        assert_eq!(d.read_type_ref().unwrap(), 1);
    }

    #[test]
    fn ds_clock_delta_roundtrip() {
        let mut e = EncoderV2::new();
        e.reset_ds_cur_val();
        e.write_ds_clock(5);
        e.write_ds_len(3);
        e.write_ds_clock(20);
        e.write_ds_len(1);
        let data = e.finalize();

        let mut d = DecoderV2::new(&data).unwrap();
        d.reset_ds_cur_val();
        assert_eq!(d.read_ds_clock().unwrap(), 5);
        assert_eq!(d.read_ds_len().unwrap(), 3);
        assert_eq!(d.read_ds_clock().unwrap(), 20);
        assert_eq!(d.read_ds_len().unwrap(), 1);
    }

    #[test]
    fn rejects_unframed_input() {
        assert!(matches!(
            DecoderV2::new(&[0x00, 0x00]),
            Err(UpdateError::UnknownFormat)
        ));
        assert!(matches!(
            DecoderV2::new(&[]),
            Err(UpdateError::UnknownFormat)
        ));
    }
}

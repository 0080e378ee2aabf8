//! V1 update codec: a single plain varint stream.

use docdelta_buffers::{Reader, Writer};

use crate::clock::Id;
use crate::codec::{decode_cbor, encode_cbor, UpdateDecoder, UpdateEncoder};
use crate::error::UpdateError;

/// V1 update encoder. Every field lands on the primary stream.
pub struct EncoderV1 {
    rest: Writer,
}

impl Default for EncoderV1 {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderV1 {
    pub fn new() -> Self {
        Self {
            rest: Writer::new(),
        }
    }

    fn write_id(&mut self, id: Id) {
        self.rest.var_u64(id.client);
        self.rest.var_u64(id.clock);
    }
}

impl UpdateEncoder for EncoderV1 {
    fn rest(&mut self) -> &mut Writer {
        &mut self.rest
    }

    fn write_client(&mut self, client: u64) {
        self.rest.var_u64(client);
    }

    fn write_left_id(&mut self, id: Id) {
        self.write_id(id);
    }

    fn write_right_id(&mut self, id: Id) {
        self.write_id(id);
    }

    fn write_info(&mut self, info: u8) {
        self.rest.u8(info);
    }

    fn write_parent_info(&mut self, is_root_name: bool) {
        self.rest.var_u64(is_root_name as u64);
    }

    fn write_string(&mut self, s: &str) {
        self.rest.var_string(s);
    }

    fn write_len(&mut self, len: u64) {
        self.rest.var_u64(len);
    }

    fn write_buf(&mut self, buf: &[u8]) {
        self.rest.var_buf(buf);
    }

    fn write_json(&mut self, value: &serde_json::Value) {
        let bytes = encode_cbor(value);
        self.rest.var_buf(&bytes);
    }

    fn write_type_ref(&mut self, type_ref: u8) {
        self.rest.u8(type_ref);
    }

    fn reset_ds_cur_val(&mut self) {
        // V1 delete-set clocks are absolute.
    }

    fn write_ds_clock(&mut self, clock: u64) {
        self.rest.var_u64(clock);
    }

    fn write_ds_len(&mut self, len: u64) {
        self.rest.var_u64(len);
    }

    fn finalize(mut self) -> Vec<u8> {
        self.rest.flush()
    }
}

/// V1 update decoder.
pub struct DecoderV1<'a> {
    rest: Reader<'a>,
}

impl<'a> DecoderV1<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            rest: Reader::new(data),
        }
    }

    fn read_id(&mut self) -> Result<Id, UpdateError> {
        let client = self.rest.var_u64()?;
        let clock = self.rest.var_u64()?;
        Ok(Id::new(client, clock))
    }
}

impl<'a> UpdateDecoder<'a> for DecoderV1<'a> {
    fn rest(&mut self) -> &mut Reader<'a> {
        &mut self.rest
    }

    fn read_client(&mut self) -> Result<u64, UpdateError> {
        Ok(self.rest.var_u64()?)
    }

    fn read_left_id(&mut self) -> Result<Id, UpdateError> {
        self.read_id()
    }

    fn read_right_id(&mut self) -> Result<Id, UpdateError> {
        self.read_id()
    }

    fn read_info(&mut self) -> Result<u8, UpdateError> {
        Ok(self.rest.u8()?)
    }

    fn read_parent_info(&mut self) -> Result<bool, UpdateError> {
        Ok(self.rest.var_u64()? == 1)
    }

    fn read_string(&mut self) -> Result<String, UpdateError> {
        Ok(self.rest.var_string()?)
    }

    fn read_len(&mut self) -> Result<u64, UpdateError> {
        Ok(self.rest.var_u64()?)
    }

    fn read_buf(&mut self) -> Result<Vec<u8>, UpdateError> {
        Ok(self.rest.var_buf()?.to_vec())
    }

    fn read_json(&mut self) -> Result<serde_json::Value, UpdateError> {
        let bytes = self.rest.var_buf()?;
        decode_cbor(bytes)
    }

    fn read_type_ref(&mut self) -> Result<u8, UpdateError> {
        Ok(self.rest.u8()?)
    }

    fn reset_ds_cur_val(&mut self) {}

    fn read_ds_clock(&mut self) -> Result<u64, UpdateError> {
        Ok(self.rest.var_u64()?)
    }

    fn read_ds_len(&mut self) -> Result<u64, UpdateError> {
        Ok(self.rest.var_u64()?)
    }
}

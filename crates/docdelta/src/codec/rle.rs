//! Run-length column primitives for the V2 codec.
//!
//! Column streams hold one field of every structure in an update, so long
//! runs of identical values (info bytes, client ids, lengths) are the common
//! case. Both encoders emit `(value, run-length)` pairs; runs of one are
//! stored as a pair with count 1, which keeps the decoders state-free beyond
//! the current run.

use docdelta_buffers::{BufferError, Reader, Writer};

/// Run-length encoder for byte-sized symbols.
pub struct ByteRleEncoder {
    w: Writer,
    last: u8,
    count: u64,
}

impl Default for ByteRleEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteRleEncoder {
    pub fn new() -> Self {
        Self {
            w: Writer::with_alloc_size(256),
            last: 0,
            count: 0,
        }
    }

    pub fn write(&mut self, symbol: u8) {
        if self.count > 0 && self.last == symbol {
            self.count += 1;
            return;
        }
        self.flush_run();
        self.last = symbol;
        self.count = 1;
    }

    fn flush_run(&mut self) {
        if self.count > 0 {
            self.w.u8(self.last);
            self.w.var_u64(self.count);
        }
    }

    pub fn finalize(mut self) -> Vec<u8> {
        self.flush_run();
        self.w.flush()
    }
}

/// Decoder counterpart of [`ByteRleEncoder`].
pub struct ByteRleDecoder<'a> {
    r: Reader<'a>,
    last: u8,
    remaining: u64,
}

impl<'a> ByteRleDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            r: Reader::new(data),
            last: 0,
            remaining: 0,
        }
    }

    pub fn read(&mut self) -> Result<u8, BufferError> {
        if self.remaining == 0 {
            self.last = self.r.u8()?;
            self.remaining = self.r.var_u64()?;
            if self.remaining == 0 {
                return Err(BufferError::EndOfBuffer);
            }
        }
        self.remaining -= 1;
        Ok(self.last)
    }
}

/// Run-length encoder for unsigned integers.
pub struct UintRleEncoder {
    w: Writer,
    last: u64,
    count: u64,
}

impl Default for UintRleEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl UintRleEncoder {
    pub fn new() -> Self {
        Self {
            w: Writer::with_alloc_size(256),
            last: 0,
            count: 0,
        }
    }

    pub fn write(&mut self, value: u64) {
        if self.count > 0 && self.last == value {
            self.count += 1;
            return;
        }
        self.flush_run();
        self.last = value;
        self.count = 1;
    }

    fn flush_run(&mut self) {
        if self.count > 0 {
            self.w.var_u64(self.last);
            self.w.var_u64(self.count);
        }
    }

    pub fn finalize(mut self) -> Vec<u8> {
        self.flush_run();
        self.w.flush()
    }
}

/// Decoder counterpart of [`UintRleEncoder`].
pub struct UintRleDecoder<'a> {
    r: Reader<'a>,
    last: u64,
    remaining: u64,
}

impl<'a> UintRleDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            r: Reader::new(data),
            last: 0,
            remaining: 0,
        }
    }

    pub fn read(&mut self) -> Result<u64, BufferError> {
        if self.remaining == 0 {
            self.last = self.r.var_u64()?;
            self.remaining = self.r.var_u64()?;
            if self.remaining == 0 {
                return Err(BufferError::EndOfBuffer);
            }
        }
        self.remaining -= 1;
        Ok(self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_rle_roundtrip() {
        let symbols = [4u8, 4, 4, 0, 7, 7, 4];
        let mut enc = ByteRleEncoder::new();
        for &s in &symbols {
            enc.write(s);
        }
        let data = enc.finalize();
        let mut dec = ByteRleDecoder::new(&data);
        for &s in &symbols {
            assert_eq!(dec.read().unwrap(), s);
        }
        assert!(dec.read().is_err());
    }

    #[test]
    fn byte_rle_compresses_runs() {
        let mut enc = ByteRleEncoder::new();
        for _ in 0..1000 {
            enc.write(0x11);
        }
        let data = enc.finalize();
        assert!(data.len() <= 3);
    }

    #[test]
    fn uint_rle_roundtrip() {
        let values = [7u64, 7, 7, 300, 0, 0, u64::MAX];
        let mut enc = UintRleEncoder::new();
        for &v in &values {
            enc.write(v);
        }
        let data = enc.finalize();
        let mut dec = UintRleDecoder::new(&data);
        for &v in &values {
            assert_eq!(dec.read().unwrap(), v);
        }
    }

    #[test]
    fn empty_column_reads_nothing() {
        let mut dec = UintRleDecoder::new(&[]);
        assert!(dec.read().is_err());
    }
}

//! Package envelope decoding
//!
//! Packages travel as protobuf-encoded envelopes. Only the envelope is decoded
//! here; the data payload is handed out as raw bytes.
//!
//! ```text
//! DriftPackage {
//!   1: id                 varint
//!   2: source_timestamp   { 1: seconds, 2: nanos }
//!   3: publish_timestamp  { 1: seconds, 2: nanos }
//!   4: status             varint (0 = good)
//!   5: data               repeated Any { 1: type_url, 2: value }
//! }
//! DataPayload { 1: data bytes }
//! ```

use crate::error::{DriftError, DriftResult};

/// Status code of a good package
pub const STATUS_GOOD: i32 = 0;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// A decoded package
#[derive(Debug, Clone, PartialEq)]
pub struct DriftPackage {
    blob: Vec<u8>,
    package_id: u64,
    source_timestamp_ms: i64,
    publish_timestamp_ms: i64,
    status_code: i32,
    data: Vec<AnyPayload>,
}

#[derive(Debug, Clone, PartialEq)]
struct AnyPayload {
    type_url: String,
    value: Vec<u8>,
}

impl DriftPackage {
    /// Decode a serialized package
    pub fn decode(blob: Vec<u8>) -> DriftResult<Self> {
        let mut package = DriftPackage {
            blob: Vec::new(),
            package_id: 0,
            source_timestamp_ms: 0,
            publish_timestamp_ms: 0,
            status_code: STATUS_GOOD,
            data: Vec::new(),
        };

        let mut reader = WireReader::new(&blob);
        while let Some((field, wire_type)) = reader.next_key()? {
            match (field, wire_type) {
                (1, WIRE_VARINT) => package.package_id = reader.varint()?,
                (2, WIRE_LEN) => package.source_timestamp_ms = decode_timestamp(reader.bytes()?)?,
                (3, WIRE_LEN) => package.publish_timestamp_ms = decode_timestamp(reader.bytes()?)?,
                (4, WIRE_VARINT) => package.status_code = reader.varint()? as i32,
                (5, WIRE_LEN) => package.data.push(decode_any(reader.bytes()?)?),
                _ => reader.skip(wire_type)?,
            }
        }

        package.blob = blob;
        Ok(package)
    }

    /// Serialized package as received
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Package ID (all acquired data is synced by it)
    pub fn package_id(&self) -> u64 {
        self.package_id
    }

    /// Time the producing service received its input, in seconds
    pub fn source_timestamp(&self) -> f64 {
        self.source_timestamp_ms as f64 / 1000.0
    }

    /// Time the producing service published this package, in seconds
    pub fn publish_timestamp(&self) -> f64 {
        self.publish_timestamp_ms as f64 / 1000.0
    }

    pub fn status_code(&self) -> i32 {
        self.status_code
    }

    pub fn is_good(&self) -> bool {
        self.status_code == STATUS_GOOD
    }

    /// Raw data payload, `None` if the package carries none
    pub fn as_raw(&self) -> DriftResult<Option<Vec<u8>>> {
        if !self.is_good() {
            return Err(DriftError::MalformedPayload(format!(
                "package {} has bad status {}",
                self.package_id, self.status_code
            )));
        }

        let mut data = None;
        for any in &self.data {
            if any.type_url.ends_with("DataPayload") {
                data = Some(decode_data_payload(&any.value)?);
            }
        }
        Ok(data)
    }
}

fn decode_timestamp(buf: &[u8]) -> DriftResult<i64> {
    let mut seconds = 0i64;
    let mut nanos = 0i64;

    let mut reader = WireReader::new(buf);
    while let Some((field, wire_type)) = reader.next_key()? {
        match (field, wire_type) {
            (1, WIRE_VARINT) => seconds = reader.varint()? as i64,
            (2, WIRE_VARINT) => nanos = reader.varint()? as i32 as i64,
            _ => reader.skip(wire_type)?,
        }
    }

    seconds
        .checked_mul(1000)
        .and_then(|ms| ms.checked_add(nanos / 1_000_000))
        .ok_or_else(|| malformed("timestamp out of range"))
}

fn decode_any(buf: &[u8]) -> DriftResult<AnyPayload> {
    let mut any = AnyPayload {
        type_url: String::new(),
        value: Vec::new(),
    };

    let mut reader = WireReader::new(buf);
    while let Some((field, wire_type)) = reader.next_key()? {
        match (field, wire_type) {
            (1, WIRE_LEN) => {
                any.type_url = String::from_utf8(reader.bytes()?.to_vec())
                    .map_err(|_| malformed("type url is not UTF-8"))?;
            }
            (2, WIRE_LEN) => any.value = reader.bytes()?.to_vec(),
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(any)
}

fn decode_data_payload(buf: &[u8]) -> DriftResult<Vec<u8>> {
    let mut data = Vec::new();

    let mut reader = WireReader::new(buf);
    while let Some((field, wire_type)) = reader.next_key()? {
        match (field, wire_type) {
            (1, WIRE_LEN) => data = reader.bytes()?.to_vec(),
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(data)
}

fn malformed(reason: &str) -> DriftError {
    DriftError::MalformedPayload(reason.to_string())
}

/// Minimal protobuf wire reader
struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn next_key(&mut self) -> DriftResult<Option<(u64, u8)>> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let key = self.varint()?;
        let field = key >> 3;
        if field == 0 {
            return Err(malformed("field number 0"));
        }
        Ok(Some((field, (key & 0x7) as u8)))
    }

    fn varint(&mut self) -> DriftResult<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| malformed("truncated varint"))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(malformed("varint too long"))
    }

    fn bytes(&mut self) -> DriftResult<&'a [u8]> {
        let len = self.varint()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| malformed("truncated length-delimited field"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn advance(&mut self, n: usize) -> DriftResult<()> {
        if self.buf.len() - self.pos < n {
            return Err(malformed("truncated fixed-width field"));
        }
        self.pos += n;
        Ok(())
    }

    fn skip(&mut self, wire_type: u8) -> DriftResult<()> {
        match wire_type {
            WIRE_VARINT => self.varint().map(|_| ()),
            WIRE_FIXED64 => self.advance(8),
            WIRE_LEN => self.bytes().map(|_| ()),
            WIRE_FIXED32 => self.advance(4),
            other => Err(DriftError::MalformedPayload(format!(
                "unsupported wire type {other}"
            ))),
        }
    }
}

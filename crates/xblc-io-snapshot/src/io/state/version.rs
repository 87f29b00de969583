use std::collections::BTreeMap;

use thiserror::Error;

/// Magic bytes at the start of every device snapshot blob.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"XSNP";

/// Version of the container format itself (header + TLV framing).
pub const SNAPSHOT_FORMAT_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotVersion {
    pub major: u16,
    pub minor: u16,
}

impl SnapshotVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("unexpected end of snapshot data")]
    UnexpectedEof,
    #[error("invalid snapshot magic")]
    InvalidMagic,
    #[error("unsupported snapshot format version {0}.{1}")]
    UnsupportedFormatVersion(u16, u16),
    #[error("snapshot device id mismatch: expected {expected:?}, found {found:?}")]
    DeviceIdMismatch { expected: [u8; 4], found: [u8; 4] },
    #[error("unsupported device major version {found} (expected {expected})")]
    UnsupportedDeviceMajorVersion { expected: u16, found: u16 },
    #[error("duplicate snapshot field tag {0}")]
    DuplicateFieldTag(u16),
    #[error("invalid field encoding: {0}")]
    InvalidFieldEncoding(&'static str),
    #[error("trailing bytes after snapshot field")]
    TrailingBytes,
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Fixed-size header preceding the TLV fields.
///
/// Layout (little-endian):
/// `magic[4] | format_major u16 | format_minor u16 | device_id[4] | device_major u16 | device_minor u16`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub format_version: SnapshotVersion,
    pub device_id: [u8; 4],
    pub device_version: SnapshotVersion,
}

impl SnapshotHeader {
    pub const LEN: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&SNAPSHOT_MAGIC);
        out.extend_from_slice(&self.format_version.major.to_le_bytes());
        out.extend_from_slice(&self.format_version.minor.to_le_bytes());
        out.extend_from_slice(&self.device_id);
        out.extend_from_slice(&self.device_version.major.to_le_bytes());
        out.extend_from_slice(&self.device_version.minor.to_le_bytes());
    }

    fn decode(d: &mut codec::Decoder<'_>) -> SnapshotResult<Self> {
        let magic = d.array::<4>()?;
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }
        let format_version = SnapshotVersion::new(d.u16()?, d.u16()?);
        if format_version.major != SNAPSHOT_FORMAT_VERSION.major {
            return Err(SnapshotError::UnsupportedFormatVersion(
                format_version.major,
                format_version.minor,
            ));
        }
        let device_id = d.array::<4>()?;
        let device_version = SnapshotVersion::new(d.u16()?, d.u16()?);
        Ok(Self {
            format_version,
            device_id,
            device_version,
        })
    }
}

/// Builds a snapshot blob. Fields are emitted in ascending tag order regardless of the order
/// they were written in, so equal device state always produces identical bytes.
#[derive(Debug)]
pub struct SnapshotWriter {
    header: SnapshotHeader,
    fields: BTreeMap<u16, Vec<u8>>,
}

impl SnapshotWriter {
    pub fn new(device_id: [u8; 4], device_version: SnapshotVersion) -> Self {
        Self {
            header: SnapshotHeader {
                format_version: SNAPSHOT_FORMAT_VERSION,
                device_id,
                device_version,
            },
            fields: BTreeMap::new(),
        }
    }

    pub fn field_u8(&mut self, tag: u16, v: u8) {
        self.fields.insert(tag, vec![v]);
    }

    pub fn field_u16(&mut self, tag: u16, v: u16) {
        self.fields.insert(tag, v.to_le_bytes().to_vec());
    }

    pub fn field_u32(&mut self, tag: u16, v: u32) {
        self.fields.insert(tag, v.to_le_bytes().to_vec());
    }

    pub fn field_bytes(&mut self, tag: u16, v: Vec<u8>) {
        self.fields.insert(tag, v);
    }

    pub fn finish(self) -> Vec<u8> {
        let body_len: usize = self.fields.values().map(|v| 6 + v.len()).sum();
        let mut out = Vec::with_capacity(SnapshotHeader::LEN + body_len);
        self.header.encode(&mut out);
        for (tag, value) in &self.fields {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(value);
        }
        out
    }
}

/// Parsed view over a snapshot blob. Unknown tags are retained but never interpreted.
#[derive(Debug)]
pub struct SnapshotReader<'a> {
    header: SnapshotHeader,
    fields: BTreeMap<u16, &'a [u8]>,
}

impl<'a> SnapshotReader<'a> {
    pub fn parse(bytes: &'a [u8], expected_device_id: [u8; 4]) -> SnapshotResult<Self> {
        let mut d = codec::Decoder::new(bytes);
        let header = SnapshotHeader::decode(&mut d)?;
        if header.device_id != expected_device_id {
            return Err(SnapshotError::DeviceIdMismatch {
                expected: expected_device_id,
                found: header.device_id,
            });
        }

        let mut fields = BTreeMap::new();
        while !d.is_empty() {
            let tag = d.u16()?;
            let len = d.u32()? as usize;
            let value = d.bytes(len)?;
            if fields.insert(tag, value).is_some() {
                return Err(SnapshotError::DuplicateFieldTag(tag));
            }
        }

        Ok(Self { header, fields })
    }

    pub fn device_version(&self) -> SnapshotVersion {
        self.header.device_version
    }

    pub fn ensure_device_major(&self, major: u16) -> SnapshotResult<()> {
        let found = self.header.device_version.major;
        if found != major {
            return Err(SnapshotError::UnsupportedDeviceMajorVersion {
                expected: major,
                found,
            });
        }
        Ok(())
    }

    pub fn bytes(&self, tag: u16) -> Option<&'a [u8]> {
        self.fields.get(&tag).copied()
    }

    pub fn u8(&self, tag: u16) -> SnapshotResult<Option<u8>> {
        self.fixed::<1>(tag, "u8 field length")
            .map(|v| v.map(|[b]| b))
    }

    pub fn u16(&self, tag: u16) -> SnapshotResult<Option<u16>> {
        self.fixed::<2>(tag, "u16 field length")
            .map(|v| v.map(u16::from_le_bytes))
    }

    pub fn u32(&self, tag: u16) -> SnapshotResult<Option<u32>> {
        self.fixed::<4>(tag, "u32 field length")
            .map(|v| v.map(u32::from_le_bytes))
    }

    fn fixed<const N: usize>(
        &self,
        tag: u16,
        what: &'static str,
    ) -> SnapshotResult<Option<[u8; N]>> {
        let Some(buf) = self.bytes(tag) else {
            return Ok(None);
        };
        let arr: [u8; N] = buf
            .try_into()
            .map_err(|_| SnapshotError::InvalidFieldEncoding(what))?;
        Ok(Some(arr))
    }
}

/// Builders for the contents of composite (`field_bytes`) fields.
pub mod codec {
    use super::{SnapshotError, SnapshotResult};

    #[derive(Debug, Default)]
    pub struct Encoder {
        buf: Vec<u8>,
    }

    impl Encoder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn u8(mut self, v: u8) -> Self {
            self.buf.push(v);
            self
        }

        pub fn u16(mut self, v: u16) -> Self {
            self.buf.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn u32(mut self, v: u32) -> Self {
            self.buf.extend_from_slice(&v.to_le_bytes());
            self
        }

        /// Length-prefixed (`u32`) byte vector.
        pub fn vec_u8(mut self, v: &[u8]) -> Self {
            self.buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
            self.buf.extend_from_slice(v);
            self
        }

        pub fn finish(self) -> Vec<u8> {
            self.buf
        }
    }

    #[derive(Debug)]
    pub struct Decoder<'a> {
        buf: &'a [u8],
        pos: usize,
    }

    impl<'a> Decoder<'a> {
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, pos: 0 }
        }

        pub fn is_empty(&self) -> bool {
            self.pos >= self.buf.len()
        }

        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.pos)
        }

        pub fn bytes(&mut self, len: usize) -> SnapshotResult<&'a [u8]> {
            if len > self.remaining() {
                return Err(SnapshotError::UnexpectedEof);
            }
            let out = &self.buf[self.pos..self.pos + len];
            self.pos += len;
            Ok(out)
        }

        pub fn array<const N: usize>(&mut self) -> SnapshotResult<[u8; N]> {
            let mut out = [0u8; N];
            out.copy_from_slice(self.bytes(N)?);
            Ok(out)
        }

        pub fn u8(&mut self) -> SnapshotResult<u8> {
            Ok(self.array::<1>()?[0])
        }

        pub fn u16(&mut self) -> SnapshotResult<u16> {
            self.array::<2>().map(u16::from_le_bytes)
        }

        pub fn u32(&mut self) -> SnapshotResult<u32> {
            self.array::<4>().map(u32::from_le_bytes)
        }

        /// Reads a vector written by [`Encoder::vec_u8`], rejecting lengths above `max_len`.
        pub fn vec_u8(&mut self, max_len: usize) -> SnapshotResult<Vec<u8>> {
            let len = self.u32()? as usize;
            if len > max_len {
                return Err(SnapshotError::InvalidFieldEncoding("byte vector too large"));
            }
            Ok(self.bytes(len)?.to_vec())
        }

        pub fn finish(self) -> SnapshotResult<()> {
            if self.is_empty() {
                Ok(())
            } else {
                Err(SnapshotError::TrailingBytes)
            }
        }
    }
}

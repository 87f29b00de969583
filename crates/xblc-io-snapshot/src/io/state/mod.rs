//! Deterministic snapshot encoding for USB device models.
//!
//! The snapshot format uses a small tag-length-value (TLV) encoding to provide:
//! - deterministic byte output (canonical tag ordering)
//! - forward compatibility (unknown tags are skipped)
//! - explicit versioning (major/minor) at both format and device level
//!
//! A device snapshot may embed another device's snapshot as an opaque byte field; the nested
//! blob carries its own header and is decoded with its own [`IoSnapshot`] implementation.

mod version;

pub use version::{
    codec, SnapshotError, SnapshotHeader, SnapshotReader, SnapshotResult, SnapshotVersion,
    SnapshotWriter, SNAPSHOT_FORMAT_VERSION, SNAPSHOT_MAGIC,
};

/// Snapshotting contract for emulated devices.
///
/// Implementations must keep `DEVICE_ID` stable forever and only perform forward-compatible
/// additions within the same major version by adding new TLV fields. Loaders must accept
/// snapshots written by an older minor version and fill in defaults for missing fields.
pub trait IoSnapshot {
    const DEVICE_ID: [u8; 4];
    const DEVICE_VERSION: SnapshotVersion;

    fn save_state(&self) -> Vec<u8>;
    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()>;
}

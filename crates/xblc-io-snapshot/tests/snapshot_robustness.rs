use proptest::prelude::*;
use xblc_io_snapshot::io::state::codec::Encoder;
use xblc_io_snapshot::io::state::{
    SnapshotError, SnapshotReader, SnapshotVersion, SnapshotWriter, SNAPSHOT_MAGIC,
};

const ID: [u8; 4] = *b"TEST";

#[test]
fn snapshot_round_trips_scalar_and_nested_fields() {
    let nested = Encoder::new().u8(3).u16(16_000).vec_u8(b"abc").finish();

    let mut w = SnapshotWriter::new(ID, SnapshotVersion::new(2, 5));
    w.field_u8(1, 0xAB);
    w.field_u16(2, 24_000);
    w.field_u32(3, 0xDEAD_BEEF);
    w.field_bytes(6, nested.clone());
    let bytes = w.finish();

    assert_eq!(&bytes[..4], &SNAPSHOT_MAGIC);

    let r = SnapshotReader::parse(&bytes, ID).unwrap();
    assert_eq!(r.device_version(), SnapshotVersion::new(2, 5));
    r.ensure_device_major(2).unwrap();
    assert_eq!(r.u8(1).unwrap(), Some(0xAB));
    assert_eq!(r.u16(2).unwrap(), Some(24_000));
    assert_eq!(r.u32(3).unwrap(), Some(0xDEAD_BEEF));
    assert_eq!(r.bytes(6), Some(nested.as_slice()));
    assert_eq!(r.bytes(7), None);
}

#[test]
fn snapshot_rejects_foreign_device_id() {
    let bytes = SnapshotWriter::new(*b"OTHR", SnapshotVersion::new(1, 0)).finish();
    let err = SnapshotReader::parse(&bytes, ID).unwrap_err();
    assert_eq!(
        err,
        SnapshotError::DeviceIdMismatch {
            expected: ID,
            found: *b"OTHR"
        }
    );
}

#[test]
fn snapshot_rejects_newer_device_major() {
    let bytes = SnapshotWriter::new(ID, SnapshotVersion::new(3, 0)).finish();
    let r = SnapshotReader::parse(&bytes, ID).unwrap();
    assert_eq!(
        r.ensure_device_major(2).unwrap_err(),
        SnapshotError::UnsupportedDeviceMajorVersion {
            expected: 2,
            found: 3
        }
    );
}

#[test]
fn snapshot_rejects_bad_magic() {
    let mut bytes = SnapshotWriter::new(ID, SnapshotVersion::new(1, 0)).finish();
    bytes[0] ^= 0xFF;
    assert_eq!(
        SnapshotReader::parse(&bytes, ID).unwrap_err(),
        SnapshotError::InvalidMagic
    );
}

#[test]
fn snapshot_rejects_duplicate_tags() {
    let mut bytes = SnapshotWriter::new(ID, SnapshotVersion::new(1, 0)).finish();
    for _ in 0..2 {
        bytes.extend_from_slice(&9u16.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(0);
    }
    assert_eq!(
        SnapshotReader::parse(&bytes, ID).unwrap_err(),
        SnapshotError::DuplicateFieldTag(9)
    );
}

#[test]
fn snapshot_rejects_narrowed_scalar() {
    let mut w = SnapshotWriter::new(ID, SnapshotVersion::new(1, 0));
    w.field_u16(1, 8_000);
    let bytes = w.finish();
    let r = SnapshotReader::parse(&bytes, ID).unwrap();
    assert_eq!(
        r.u32(1).unwrap_err(),
        SnapshotError::InvalidFieldEncoding("u32 field length")
    );
    assert_eq!(r.u16(1).unwrap(), Some(8_000));
}

proptest! {
    #[test]
    fn prop_parse_never_panics_on_arbitrary_input(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = SnapshotReader::parse(&bytes, ID);
    }

    #[test]
    fn prop_truncated_snapshots_are_rejected(value in any::<u32>(), cut in 1usize..10) {
        let mut w = SnapshotWriter::new(ID, SnapshotVersion::new(1, 0));
        w.field_u32(1, value);
        let mut bytes = w.finish();
        bytes.truncate(bytes.len() - cut);
        prop_assert!(SnapshotReader::parse(&bytes, ID).is_err());
    }
}

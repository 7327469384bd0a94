//! Bytecode table consistency tests
//!
//! The decode table and the encoder must agree on every byte value, and the
//! documented ranges must partition 0x00..=0xff.

use otter_snapshot_format::bytecode::{
    ALIGNMENT_PREFIX, FIXED_RAW_DATA, FIXED_REPEAT, HOT_OBJECT, ROOT_ARRAY_CONSTANTS,
};
use otter_snapshot_format::encoding::{
    decode_fixed_raw_data_size, decode_fixed_repeat_count, decode_variable_repeat_count,
    encode_fixed_raw_data_size, encode_fixed_repeat, encode_variable_repeat_count,
    is_fixed_raw_data_size,
};
use otter_snapshot_format::{Alignment, Bytecode, FormatError, SnapshotSink, SnapshotSource, Space};
use proptest::prelude::*;

#[test]
fn test_every_defined_byte_reencodes_to_itself() {
    for byte in 0..=u8::MAX {
        if let Some(bytecode) = Bytecode::from_byte(byte) {
            assert_eq!(bytecode.encode(), Ok(byte), "{} at 0x{byte:02x}", bytecode.name());
        }
    }
}

#[test]
fn test_ranges_partition_the_byte_space() {
    let reserved: Vec<u8> = (0..=u8::MAX).filter(|b| Bytecode::is_reserved(*b)).collect();

    let mut expected = vec![0x06, 0x07, 0x0e, 0x0f];
    expected.extend(0x2b..=0x3f);
    expected.extend(0x98..=0xff);
    assert_eq!(reserved, expected);

    let defined = 256 - reserved.len();
    // 12 region-merged + 27 single purpose + 32 roots + 32 raw + 16 repeat + 8 hot
    assert_eq!(defined, 12 + 27 + 32 + 32 + 16 + 8);
}

#[test]
fn test_reserved_bytes_fail_to_decode() {
    let stream = [0x98u8];
    let mut source = SnapshotSource::new(&stream);
    assert_eq!(
        source.get_bytecode(),
        Err(FormatError::UnknownOpcode { opcode: 0x98, offset: 0 })
    );
}

#[test]
fn test_parameter_offsets() {
    assert_eq!(Bytecode::from_byte(ROOT_ARRAY_CONSTANTS + 31), Some(Bytecode::RootArrayConstant(31)));
    assert_eq!(Bytecode::from_byte(HOT_OBJECT + 7), Some(Bytecode::HotObject(7)));
    assert_eq!(Bytecode::from_byte(FIXED_RAW_DATA), Some(Bytecode::FixedRawData(1)));
    assert_eq!(Bytecode::from_byte(FIXED_REPEAT + 15), Some(Bytecode::FixedRepeat(17)));
    assert_eq!(
        Bytecode::from_byte(ALIGNMENT_PREFIX),
        Some(Bytecode::AlignmentPrefix(Alignment::DoubleAligned))
    );
    for space in Space::ALL {
        let byte = Bytecode::NewObject(space).encode().unwrap();
        assert_eq!(byte, space.id());
    }
}

#[test]
fn test_raw_length_boundary() {
    assert!(is_fixed_raw_data_size(1));
    assert!(is_fixed_raw_data_size(32));
    assert!(!is_fixed_raw_data_size(33));
    assert_eq!(decode_fixed_raw_data_size(encode_fixed_raw_data_size(1)), 1);
    assert_eq!(decode_fixed_raw_data_size(encode_fixed_raw_data_size(32)), 32);
}

#[test]
fn test_repeat_boundary() {
    assert_eq!(decode_fixed_repeat_count(encode_fixed_repeat(2)), 2);
    assert_eq!(decode_fixed_repeat_count(encode_fixed_repeat(17)), 17);
    assert_eq!(encode_variable_repeat_count(18), 0);
    assert_eq!(decode_variable_repeat_count(encode_variable_repeat_count(18)), 18);
}

proptest! {
    #[test]
    fn prop_int_roundtrip(values in proptest::collection::vec(any::<u32>(), 0..64)) {
        let mut sink = SnapshotSink::new();
        for value in &values {
            sink.put_int(*value);
        }
        let mut source = SnapshotSource::new(sink.data());
        for value in &values {
            prop_assert_eq!(source.get_int(), Ok(*value));
        }
        prop_assert!(!source.has_more());
    }

    #[test]
    fn prop_variable_repeat_counts(count in 18u32..1_000_000u32) {
        prop_assert_eq!(decode_variable_repeat_count(encode_variable_repeat_count(count)), count);
    }
}

//! Raw-data and repeat-count density helpers
//!
//! Small bounded integers are folded into a bytecode range with the offset
//! technique: a value `v` in `[lo, hi]` becomes `base + (v - lo)`. Values past
//! the fixed range fall back to the variable form with an out-of-band count.
//!
//! The encoders assert their range. The serializer controls every value it
//! emits, so an out-of-range request is an encoder bug, not bad input.

use crate::bytecode::{FIXED_RAW_DATA, FIXED_RAW_DATA_COUNT, FIXED_REPEAT, FIXED_REPEAT_COUNT};

/// Smallest raw run (in words) with a fixed bytecode
pub const FIRST_ENCODABLE_FIXED_RAW_DATA_SIZE: u32 = 1;
/// Largest raw run (in words) with a fixed bytecode
pub const LAST_ENCODABLE_FIXED_RAW_DATA_SIZE: u32 =
    FIRST_ENCODABLE_FIXED_RAW_DATA_SIZE + FIXED_RAW_DATA_COUNT as u32 - 1;

/// Smallest repeat count that is worth encoding
pub const FIRST_ENCODABLE_REPEAT_COUNT: u32 = 2;
/// Largest repeat count with a fixed bytecode
pub const LAST_ENCODABLE_FIXED_REPEAT_COUNT: u32 =
    FIRST_ENCODABLE_REPEAT_COUNT + FIXED_REPEAT_COUNT as u32 - 1;
/// Smallest repeat count that needs the variable form
pub const FIRST_ENCODABLE_VARIABLE_REPEAT_COUNT: u32 = LAST_ENCODABLE_FIXED_REPEAT_COUNT + 1;

/// Whether a raw run of `size` words has a fixed bytecode
#[inline]
pub const fn is_fixed_raw_data_size(size: u32) -> bool {
    size >= FIRST_ENCODABLE_FIXED_RAW_DATA_SIZE && size <= LAST_ENCODABLE_FIXED_RAW_DATA_SIZE
}

/// Encode a raw run length into a fixed raw data bytecode
pub const fn encode_fixed_raw_data_size(size: u32) -> u8 {
    assert!(is_fixed_raw_data_size(size), "raw data size outside fixed range");
    FIXED_RAW_DATA + (size - FIRST_ENCODABLE_FIXED_RAW_DATA_SIZE) as u8
}

/// Decode the raw run length from a fixed raw data bytecode
pub const fn decode_fixed_raw_data_size(bytecode: u8) -> u32 {
    assert!(
        bytecode >= FIXED_RAW_DATA && bytecode < FIXED_RAW_DATA + FIXED_RAW_DATA_COUNT,
        "not a fixed raw data bytecode"
    );
    (bytecode - FIXED_RAW_DATA) as u32 + FIRST_ENCODABLE_FIXED_RAW_DATA_SIZE
}

/// Whether `count` has a fixed repeat bytecode
#[inline]
pub const fn is_fixed_repeat_count(count: u32) -> bool {
    count >= FIRST_ENCODABLE_REPEAT_COUNT && count <= LAST_ENCODABLE_FIXED_REPEAT_COUNT
}

/// Encode a repeat count into a fixed repeat bytecode
pub const fn encode_fixed_repeat(count: u32) -> u8 {
    assert!(is_fixed_repeat_count(count), "repeat count outside fixed range");
    FIXED_REPEAT + (count - FIRST_ENCODABLE_REPEAT_COUNT) as u8
}

/// Decode the repeat count from a fixed repeat bytecode
pub const fn decode_fixed_repeat_count(bytecode: u8) -> u32 {
    assert!(
        bytecode >= FIXED_REPEAT && bytecode < FIXED_REPEAT + FIXED_REPEAT_COUNT,
        "not a fixed repeat bytecode"
    );
    (bytecode - FIXED_REPEAT) as u32 + FIRST_ENCODABLE_REPEAT_COUNT
}

/// Encode a repeat count into the out-of-band value of a variable repeat
pub const fn encode_variable_repeat_count(count: u32) -> u32 {
    assert!(
        count >= FIRST_ENCODABLE_VARIABLE_REPEAT_COUNT,
        "repeat count fits the fixed range"
    );
    count - FIRST_ENCODABLE_VARIABLE_REPEAT_COUNT
}

/// Decode a repeat count from the out-of-band value of a variable repeat
///
/// Saturates instead of wrapping; a count that large overflows any object.
#[inline]
pub const fn decode_variable_repeat_count(value: u32) -> u32 {
    value.saturating_add(FIRST_ENCODABLE_VARIABLE_REPEAT_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_data_boundaries() {
        assert_eq!(encode_fixed_raw_data_size(1), 0x60);
        assert_eq!(encode_fixed_raw_data_size(32), 0x7f);
        assert!(!is_fixed_raw_data_size(0));
        assert!(!is_fixed_raw_data_size(33));
        assert_eq!(decode_fixed_raw_data_size(0x60), 1);
        assert_eq!(decode_fixed_raw_data_size(0x7f), 32);
    }

    #[test]
    fn test_repeat_boundaries() {
        assert_eq!(encode_fixed_repeat(2), 0x80);
        assert_eq!(encode_fixed_repeat(17), 0x8f);
        assert!(!is_fixed_repeat_count(18));
        assert_eq!(encode_variable_repeat_count(18), 0);
        assert_eq!(decode_variable_repeat_count(0), 18);
        assert_eq!(decode_fixed_repeat_count(0x8f), 17);
    }

    #[test]
    #[should_panic(expected = "raw data size outside fixed range")]
    fn test_raw_data_33_is_not_fixed() {
        encode_fixed_raw_data_size(33);
    }

    #[test]
    #[should_panic(expected = "repeat count outside fixed range")]
    fn test_repeat_one_is_rejected() {
        encode_fixed_repeat(1);
    }

    #[test]
    #[should_panic(expected = "repeat count fits the fixed range")]
    fn test_variable_repeat_below_range() {
        encode_variable_repeat_count(17);
    }
}

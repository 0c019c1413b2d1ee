// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! 32-bit command arguments over pairs of 16-bit cells
//!
//! A 32-bit value occupies two adjacent cells, low word first:
//!
//! | Cell | Content |
//! |------|---------|
//! | n    | `value & 0xFFFF` |
//! | n+1  | `value >> 16` |
//!
//! so that `value = (high << 16) | low`. Signed values use the two's
//! complement of that unsigned value and `f32` values use their IEEE-754 bit
//! pattern with the same split. No byte swapping happens inside a word.

/// Split `value` into `[low, high]`.
pub fn encode_u32(value: u32) -> [u16; 2] {
    [(value & 0xFFFF) as u16, (value >> 16) as u16]
}

/// Join `low` and `high` into one value.
pub fn decode_u32(low: u16, high: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

pub fn encode_i32(value: i32) -> [u16; 2] {
    encode_u32(value as u32)
}

pub fn decode_i32(low: u16, high: u16) -> i32 {
    decode_u32(low, high) as i32
}

/// Split the IEEE-754 bit pattern of `value` into `[low, high]`.
pub fn encode_f32(value: f32) -> [u16; 2] {
    encode_u32(value.to_bits())
}

pub fn decode_f32(low: u16, high: u16) -> f32 {
    f32::from_bits(decode_u32(low, high))
}

/// Decode the pair starting at `index` in `words`, if both cells exist.
pub fn u32_at(words: &[u16], index: usize) -> Option<u32> {
    match (words.get(index), words.get(index + 1)) {
        (Some(low), Some(high)) => Some(decode_u32(*low, *high)),
        _ => None,
    }
}

/// Store `value` at `index`/`index+1` in `words`. Returns `false` when the
/// pair does not fit.
pub fn put_u32(words: &mut [u16], index: usize, value: u32) -> bool {
    if index + 1 >= words.len() {
        return false;
    }
    let [low, high] = encode_u32(value);
    words[index] = low;
    words[index + 1] = high;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_round_trip_boundaries() {
        for value in [0u32, 1, 0xFFFF, 0x1_0000, 0x7FFF_FFFF, 0x8000_0000, 0xFFFF_FFFF] {
            let [low, high] = encode_u32(value);
            assert_eq!(decode_u32(low, high), value, "round trip of {value:#x}");
        }
    }

    #[test]
    fn test_word_order_is_low_then_high() {
        assert_eq!(encode_u32(0x1_0000), [0, 1]);
        assert_eq!(encode_u32(0xFFFF), [0xFFFF, 0]);
        assert_eq!(encode_u32(1234), [1234, 0]);
        assert_eq!(decode_u32(0x5678, 0x1234), 0x1234_5678);
    }

    #[test]
    fn test_signed_values_use_twos_complement() {
        assert_eq!(encode_i32(-1), [0xFFFF, 0xFFFF]);
        assert_eq!(encode_i32(i32::MIN), [0, 0x8000]);
        assert_eq!(decode_i32(0xFFFF, 0xFFFF), -1);
        assert_eq!(decode_i32(0, 0x8000), i32::MIN);
        assert_eq!(decode_i32(0xFFFF, 0x7FFF), i32::MAX);
    }

    #[test]
    fn test_f32_round_trip_is_bitwise() {
        for value in [0.0f32, -0.0, f32::INFINITY, f32::NEG_INFINITY, 1.5, -273.15] {
            let [low, high] = encode_f32(value);
            assert_eq!(decode_f32(low, high).to_bits(), value.to_bits());
        }
    }

    #[test]
    fn test_f32_nan_keeps_quiet_pattern() {
        let nan = f32::from_bits(0x7FC0_0000);
        let [low, high] = encode_f32(nan);
        assert_eq!([low, high], [0x0000, 0x7FC0]);
        let decoded = decode_f32(low, high);
        assert!(decoded.is_nan());
        assert_eq!(decoded.to_bits(), 0x7FC0_0000);
    }

    #[test]
    fn test_negative_zero_is_distinct_from_zero() {
        assert_eq!(encode_f32(-0.0), [0, 0x8000]);
        assert_eq!(encode_f32(0.0), [0, 0]);
    }

    #[test]
    fn test_pair_helpers() {
        let mut words = [0u16; 4];
        assert!(put_u32(&mut words, 1, 0xDEAD_BEEF));
        assert_eq!(words, [0, 0xBEEF, 0xDEAD, 0]);
        assert_eq!(u32_at(&words, 1), Some(0xDEAD_BEEF));
        assert!(!put_u32(&mut words, 3, 1));
        assert_eq!(u32_at(&words, 3), None);
    }
}

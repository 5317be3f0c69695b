//! Order-preserving encoding of index values.
//!
//! The encoded form of a value is used as a key segment, so byte-wise order
//! of encodings must equal the natural order of the values:
//!
//! - strings: `"` followed by the string bytes
//! - booleans: `false` / `true`
//! - integers: 19 zero-padded decimal digits; negative values are shifted by
//!   2^63 and prefixed with `!`, which sorts before every digit
//!
//! Termination and escaping of the segment are left to the key layer.

use dwn_types::IndexValue;

/// Marker placed before shifted negative integers.
pub const NEGATIVE_PREFIX: &str = "!";
/// Decimal width of `i64::MAX`.
pub const MAX_INT_STRING_LEN: usize = 19;
/// Shift applied to negative integers; maps `i64::MIN` to zero.
pub const NEGATIVE_OFFSET: i128 = 1 << 63;

pub fn encode_number(value: i64) -> String {
    if value < 0 {
        let shifted = i128::from(value) + NEGATIVE_OFFSET;
        format!("{NEGATIVE_PREFIX}{shifted:0width$}", width = MAX_INT_STRING_LEN)
    } else {
        format!("{value:0width$}", width = MAX_INT_STRING_LEN)
    }
}

pub fn encode_value(value: &IndexValue) -> String {
    match value {
        IndexValue::String(s) => format!("\"{s}"),
        IndexValue::Bool(b) => b.to_string(),
        IndexValue::Number(n) => encode_number(*n),
    }
}

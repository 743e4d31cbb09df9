//! The value-type lattice
//!
//! Every IR input carries a [`ValueType`]: a 14-bit set over the atomic
//! kinds a Scratch value can be at runtime. A node's static type is the
//! union of its runtime possibilities, and the whole optimizer rests on
//! one invariant: a node's declared type is always a superset of every
//! value it can actually produce.
//!
//! The number kinds split finer than IEEE classes because Scratch
//! semantics care about the distinctions: sign, zero vs negative zero,
//! integer vs fractional, and the three specials (±∞, NaN) all behave
//! differently somewhere in the block set.

use sb3_core::cast;
use sb3_core::Value;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// A set of possible runtime value kinds, as a 14-bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueType(pub u16);

impl ValueType {
    pub const NONE: ValueType = ValueType(0);

    // Atomic flags, bit indices 0..=13
    pub const NUMBER_POS_INF: ValueType = ValueType(1 << 0);
    pub const NUMBER_POS_INT: ValueType = ValueType(1 << 1);
    pub const NUMBER_POS_FRACT: ValueType = ValueType(1 << 2);
    pub const NUMBER_ZERO: ValueType = ValueType(1 << 3);
    pub const NUMBER_NEG_ZERO: ValueType = ValueType(1 << 4);
    pub const NUMBER_NEG_INT: ValueType = ValueType(1 << 5);
    pub const NUMBER_NEG_FRACT: ValueType = ValueType(1 << 6);
    pub const NUMBER_NEG_INF: ValueType = ValueType(1 << 7);
    pub const NUMBER_NAN: ValueType = ValueType(1 << 8);
    /// A string that parses to a number
    pub const STRING_NUM: ValueType = ValueType(1 << 9);
    /// A string that parses to NaN
    pub const STRING_NAN: ValueType = ValueType(1 << 10);
    /// The strings "true" / "false"
    pub const STRING_BOOLEAN: ValueType = ValueType(1 << 11);
    pub const BOOLEAN: ValueType = ValueType(1 << 12);
    pub const COLOR: ValueType = ValueType(1 << 13);

    // Composites
    /// All numbers, finite or infinite, but not NaN
    pub const NUMBER: ValueType = ValueType(0x00FF);
    pub const NUMBER_OR_NAN: ValueType = ValueType(0x01FF);
    pub const NUMBER_POS: ValueType =
        ValueType(Self::NUMBER_POS_INF.0 | Self::NUMBER_POS_INT.0 | Self::NUMBER_POS_FRACT.0);
    pub const NUMBER_NEG: ValueType =
        ValueType(Self::NUMBER_NEG_INF.0 | Self::NUMBER_NEG_INT.0 | Self::NUMBER_NEG_FRACT.0);
    pub const NUMBER_INT: ValueType = ValueType(
        Self::NUMBER_POS_INT.0
            | Self::NUMBER_ZERO.0
            | Self::NUMBER_NEG_ZERO.0
            | Self::NUMBER_NEG_INT.0,
    );
    pub const NUMBER_ANY_ZERO: ValueType =
        ValueType(Self::NUMBER_ZERO.0 | Self::NUMBER_NEG_ZERO.0);
    pub const NUMBER_FRACT: ValueType =
        ValueType(Self::NUMBER_POS_FRACT.0 | Self::NUMBER_NEG_FRACT.0);
    pub const NUMBER_INF: ValueType =
        ValueType(Self::NUMBER_POS_INF.0 | Self::NUMBER_NEG_INF.0);
    pub const STRING: ValueType =
        ValueType(Self::STRING_NUM.0 | Self::STRING_NAN.0 | Self::STRING_BOOLEAN.0);
    /// Everything except COLOR
    pub const ANY: ValueType = ValueType(0x1FFF);

    /// True iff this type is non-empty and entirely inside `mask`.
    pub fn is_always(self, mask: ValueType) -> bool {
        (self.0 & !mask.0) == 0 && self.0 != 0
    }

    /// True iff this type overlaps `mask`.
    pub fn is_sometimes(self, mask: ValueType) -> bool {
        (self.0 & mask.0) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: ValueType) -> ValueType {
        ValueType(self.0 | other.0)
    }
}

impl BitOr for ValueType {
    type Output = ValueType;
    fn bitor(self, rhs: ValueType) -> ValueType {
        ValueType(self.0 | rhs.0)
    }
}

impl BitOrAssign for ValueType {
    fn bitor_assign(&mut self, rhs: ValueType) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ValueType {
    type Output = ValueType;
    fn bitand(self, rhs: ValueType) -> ValueType {
        ValueType(self.0 & rhs.0)
    }
}

impl Not for ValueType {
    type Output = ValueType;
    fn not(self) -> ValueType {
        // Stay within the 14-bit universe
        ValueType(!self.0 & 0x3FFF)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(&str, u16); 14] = [
            ("+inf", 1 << 0),
            ("+int", 1 << 1),
            ("+fract", 1 << 2),
            ("0", 1 << 3),
            ("-0", 1 << 4),
            ("-int", 1 << 5),
            ("-fract", 1 << 6),
            ("-inf", 1 << 7),
            ("nan", 1 << 8),
            ("str-num", 1 << 9),
            ("str-nan", 1 << 10),
            ("str-bool", 1 << 11),
            ("bool", 1 << 12),
            ("color", 1 << 13),
        ];
        let mut first = true;
        write!(f, "{{")?;
        for (name, bit) in NAMES {
            if self.0 & bit != 0 {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        write!(f, "}}")
    }
}

/// Map a concrete number to its single atomic flag.
pub fn classify_number(x: f64) -> ValueType {
    if x.is_nan() {
        ValueType::NUMBER_NAN
    } else if x == f64::INFINITY {
        ValueType::NUMBER_POS_INF
    } else if x == f64::NEG_INFINITY {
        ValueType::NUMBER_NEG_INF
    } else if x == 0.0 {
        if x.is_sign_negative() {
            ValueType::NUMBER_NEG_ZERO
        } else {
            ValueType::NUMBER_ZERO
        }
    } else if x.floor() == x {
        if x > 0.0 {
            ValueType::NUMBER_POS_INT
        } else {
            ValueType::NUMBER_NEG_INT
        }
    } else if x > 0.0 {
        ValueType::NUMBER_POS_FRACT
    } else {
        ValueType::NUMBER_NEG_FRACT
    }
}

/// Map a constant value to its single atomic flag.
pub fn classify_value(v: &Value) -> ValueType {
    match v {
        Value::Number(n) => classify_number(*n),
        Value::Bool(_) => ValueType::BOOLEAN,
        Value::Str(s) => {
            if s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false") {
                ValueType::STRING_BOOLEAN
            } else if cast::to_number_or_nan(v).is_nan() {
                ValueType::STRING_NAN
            } else {
                ValueType::STRING_NUM
            }
        }
    }
}

/// Swap positive and negative classes, and positive and negative zero.
/// NaN and non-number bits are unchanged. Used to derive the subtract
/// table from the add table.
pub fn negate_sign(t: ValueType) -> ValueType {
    let mut out = t.0 & !(ValueType::NUMBER.0);
    let swaps = [
        (ValueType::NUMBER_POS_INF.0, ValueType::NUMBER_NEG_INF.0),
        (ValueType::NUMBER_POS_INT.0, ValueType::NUMBER_NEG_INT.0),
        (ValueType::NUMBER_POS_FRACT.0, ValueType::NUMBER_NEG_FRACT.0),
        (ValueType::NUMBER_ZERO.0, ValueType::NUMBER_NEG_ZERO.0),
    ];
    for (a, b) in swaps {
        if t.0 & a != 0 {
            out |= b;
        }
        if t.0 & b != 0 {
            out |= a;
        }
    }
    ValueType(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composites_cover_expected_bits() {
        assert_eq!(ValueType::NUMBER.0, 0b1111_1111);
        assert_eq!(ValueType::NUMBER_OR_NAN.0, 0b1_1111_1111);
        assert_eq!(ValueType::ANY.0, 0x1FFF);
        assert!(!ValueType::ANY.is_sometimes(ValueType::COLOR));
    }

    #[test]
    fn test_is_always() {
        assert!(ValueType::NUMBER_POS_INT.is_always(ValueType::NUMBER));
        assert!(!ValueType::NUMBER_NAN.is_always(ValueType::NUMBER));
        assert!(!ValueType::NONE.is_always(ValueType::NUMBER));
        let t = ValueType::NUMBER_POS_INT | ValueType::STRING_NUM;
        assert!(!t.is_always(ValueType::NUMBER));
        assert!(t.is_sometimes(ValueType::NUMBER));
    }

    #[test]
    fn test_classify_number() {
        assert_eq!(classify_number(5.0), ValueType::NUMBER_POS_INT);
        assert_eq!(classify_number(-5.5), ValueType::NUMBER_NEG_FRACT);
        assert_eq!(classify_number(0.5), ValueType::NUMBER_POS_FRACT);
        assert_eq!(classify_number(0.0), ValueType::NUMBER_ZERO);
        assert_eq!(classify_number(-0.0), ValueType::NUMBER_NEG_ZERO);
        assert_eq!(classify_number(f64::INFINITY), ValueType::NUMBER_POS_INF);
        assert_eq!(classify_number(f64::NEG_INFINITY), ValueType::NUMBER_NEG_INF);
        assert_eq!(classify_number(f64::NAN), ValueType::NUMBER_NAN);
        assert_eq!(classify_number(-3.0), ValueType::NUMBER_NEG_INT);
    }

    #[test]
    fn test_classify_value_strings() {
        assert_eq!(classify_value(&Value::from("3.5")), ValueType::STRING_NUM);
        assert_eq!(classify_value(&Value::from("apple")), ValueType::STRING_NAN);
        assert_eq!(
            classify_value(&Value::from("TRUE")),
            ValueType::STRING_BOOLEAN
        );
        assert_eq!(classify_value(&Value::Bool(true)), ValueType::BOOLEAN);
    }

    #[test]
    fn test_negate_sign() {
        let t = ValueType::NUMBER_POS_INT | ValueType::NUMBER_ZERO;
        assert_eq!(
            negate_sign(t),
            ValueType::NUMBER_NEG_INT | ValueType::NUMBER_NEG_ZERO
        );
        // NaN unaffected
        assert_eq!(negate_sign(ValueType::NUMBER_NAN), ValueType::NUMBER_NAN);
        // involution
        assert_eq!(negate_sign(negate_sign(t)), t);
    }

    #[test]
    fn test_display() {
        let t = ValueType::NUMBER_POS_INT | ValueType::NUMBER_NAN;
        assert_eq!(t.to_string(), "{+int|nan}");
    }
}

//! Scratch coercion semantics
//!
//! Every function here is a contract, not a convenience: block semantics
//! depend on these exact rules and the compiler is allowed to assume
//! them when it folds constants or removes casts.
//!
//! The important subtleties, in one place:
//!
//! - string→number parsing strips leading/trailing whitespace, maps the
//!   empty/whitespace string to 0 and accepts exactly `Infinity` /
//!   `-Infinity` (case-sensitive); any other non-numeric string is 0
//!   ([`to_number`]) or NaN ([`to_number_or_nan`]);
//! - comparison tries numbers first and falls back to case-insensitive
//!   string ordering when either side orders as NaN ([`compare`]);
//! - `mod` is floored (the result takes the divisor's sign) and a zero
//!   divisor produces NaN, never an error;
//! - list indices admit the `"last"` / `"random"` / `"any"` / `"all"`
//!   forms and are floored and bounds-checked ([`to_list_index`]).

use crate::value::Value;
use rand::Rng;
use std::cmp::Ordering;

/// Hard cap on list length. Inserts that would exceed it drop the last
/// element; appends beyond it are ignored.
pub const LIST_ITEM_LIMIT: usize = 200_000;

/// Parse a string the way Scratch number inputs do.
///
/// Returns `Some(0.0)` for empty/whitespace, `Some(±∞)` for the exact
/// spellings `Infinity` / `-Infinity`, `Some(n)` for decimal numerals
/// (including `.5`, `+3`, `1e6`), and `None` for everything else.
fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return Some(0.0);
    }
    match t {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    // Reject alphabetic content (Rust's f64 parser would accept "inf",
    // "NaN", "infinity" in any case, which Scratch does not). 'e'/'E'
    // stay legal as the exponent marker.
    if t.bytes()
        .any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E')
    {
        return None;
    }
    t.parse::<f64>().ok().filter(|n| !n.is_nan())
}

/// Coerce to a number. Non-numeric strings and NaN become 0.
pub fn to_number(v: &Value) -> f64 {
    match v {
        Value::Number(n) => {
            if n.is_nan() {
                0.0
            } else {
                *n
            }
        }
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Str(s) => match parse_number(s) {
            Some(n) => n,
            None => 0.0,
        },
    }
}

/// Coerce to a number, letting NaN through. Used wherever NaN must
/// propagate (comparisons, `0/0` arithmetic chains).
pub fn to_number_or_nan(v: &Value) -> f64 {
    match v {
        Value::Number(n) => *n,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Str(s) => match parse_number(s) {
            Some(n) => n,
            None => f64::NAN,
        },
    }
}

/// Coerce to a boolean. The empty string, `"0"`, any casing of
/// `"false"`, the number 0 and NaN are false; everything else is true.
pub fn to_boolean(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => !(*n == 0.0 || n.is_nan()),
        Value::Str(s) => !(s.is_empty() || s.as_ref() == "0" || s.eq_ignore_ascii_case("false")),
    }
}

/// Render a number the way Scratch displays it: trimmed decimal form
/// with no trailing zeros, and the exact spellings `Infinity`,
/// `-Infinity` and `NaN`. Negative zero renders as `0`.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    format!("{}", n)
}

/// Coerce to a string.
pub fn to_string(v: &Value) -> String {
    match v {
        Value::Str(s) => s.to_string(),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Number(n) => number_to_string(*n),
    }
}

/// The number a value orders as in [`compare`]. Strings that convert to
/// zero but contain any character other than `'0'` or a tab order as
/// NaN, which routes the comparison to the string fallback.
fn ordering_number(v: &Value) -> f64 {
    let n = to_number_or_nan(v);
    if n == 0.0 {
        if let Value::Str(s) = v {
            if s.chars().any(|c| c != '0' && c != '\t') {
                return f64::NAN;
            }
        }
    }
    n
}

/// Three-way comparison with Scratch semantics.
///
/// Numeric when both sides order as numbers (equal infinities compare
/// equal); otherwise both sides are lower-cased and compared as strings.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let n1 = ordering_number(a);
    let n2 = ordering_number(b);
    if n1.is_nan() || n2.is_nan() {
        let s1 = to_string(a).to_lowercase();
        let s2 = to_string(b).to_lowercase();
        return s1.cmp(&s2);
    }
    // NaN is excluded above, so partial_cmp only fails for nothing.
    n1.partial_cmp(&n2).unwrap_or(Ordering::Equal)
}

/// Floored modulo (the result carries the divisor's sign). A zero
/// divisor yields NaN.
pub fn modulo(n: f64, m: f64) -> f64 {
    if m == 0.0 {
        return f64::NAN;
    }
    let mut r = n % m;
    if r != 0.0 && (r < 0.0) != (m < 0.0) {
        r += m;
    }
    r
}

/// Pick a random number in `[from, to]` (either order).
///
/// When both endpoints are integer shaped (integer numbers, strings
/// without a decimal point, booleans) the result is a uniform integer;
/// otherwise it is a uniform real.
pub fn random<R: Rng>(rng: &mut R, from: &Value, to: &Value) -> f64 {
    let n_from = to_number(from);
    let n_to = to_number(to);
    let (low, high) = if n_from <= n_to {
        (n_from, n_to)
    } else {
        (n_to, n_from)
    };
    if low == high {
        return low;
    }
    if from.is_int_like() && to.is_int_like() {
        return low + (rng.gen_range(0.0..1.0) * (high + 1.0 - low)).floor();
    }
    low + rng.gen_range(0.0..1.0) * (high - low)
}

/// Resolved list index. `Index` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListIndex {
    /// Out of bounds or unusable; the operation is a no-op / empty read.
    Invalid,
    /// The `"all"` form (only where the operation accepts it).
    All,
    /// A concrete 1-based index, already bounds-checked.
    Index(usize),
}

/// Resolve a list index value against a list of length `len`.
///
/// Accepts `"all"` (iff `accept_all`), `"last"`, `"random"` / `"any"`;
/// numeric values are floored and bounds-checked against `1..=len`.
pub fn to_list_index<R: Rng>(
    rng: &mut R,
    index: &Value,
    len: usize,
    accept_all: bool,
) -> ListIndex {
    if let Value::Str(s) = index {
        match s.as_ref() {
            "all" => {
                return if accept_all {
                    ListIndex::All
                } else {
                    ListIndex::Invalid
                };
            }
            "last" => {
                return if len > 0 {
                    ListIndex::Index(len)
                } else {
                    ListIndex::Invalid
                };
            }
            "random" | "any" => {
                return if len > 0 {
                    ListIndex::Index(rng.gen_range(1..=len))
                } else {
                    ListIndex::Invalid
                };
            }
            _ => {}
        }
    }
    let n = to_number(index).floor();
    if n < 1.0 || n > len as f64 {
        return ListIndex::Invalid;
    }
    ListIndex::Index(n as usize)
}

/// 1-based letter extraction; out of bounds yields the empty string.
/// Indexing is by Unicode scalar, not byte.
pub fn letter_of(index: &Value, s: &str) -> String {
    let i = to_number(index).floor();
    if i < 1.0 {
        return String::new();
    }
    s.chars()
        .nth(i as usize - 1)
        .map(|c| c.to_string())
        .unwrap_or_default()
}

/// Case-insensitive substring test.
pub fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Join list items for display: single spaces between items, except when
/// every item renders as a single character, in which case no separator
/// is used (matches Scratch's list reporter).
pub fn list_contents(items: &[Value]) -> String {
    let rendered: Vec<String> = items.iter().map(to_string).collect();
    let all_single = rendered.iter().all(|s| s.chars().count() == 1);
    let sep = if all_single { "" } else { " " };
    rendered.join(sep)
}

/// Snap a coordinate to the nearest integer when it is within 1e-9 of
/// one; otherwise return it unchanged.
pub fn to_scratch_coordinate(x: f64) -> f64 {
    if (x - x.round()).abs() < 1e-9 {
        x.round()
    } else {
        x
    }
}

/// Coerce to a packed RGB color. `#rrggbb` strings parse as hex; other
/// values go through [`to_number`]. Only pen inputs consume this.
pub fn to_color(v: &Value) -> u32 {
    if let Value::Str(s) = v {
        if let Some(hex) = s.strip_prefix('#') {
            return u32::from_str_radix(hex, 16).unwrap_or(0) & 0x00FF_FFFF;
        }
    }
    to_number(v) as i64 as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    fn s(v: &str) -> Value {
        Value::from(v)
    }

    #[test]
    fn test_to_number_strings() {
        assert_eq!(to_number(&s("3.5")), 3.5);
        assert_eq!(to_number(&s("  42  ")), 42.0);
        assert_eq!(to_number(&s("")), 0.0);
        assert_eq!(to_number(&s("   ")), 0.0);
        assert_eq!(to_number(&s("apple")), 0.0);
        assert_eq!(to_number(&s("Infinity")), f64::INFINITY);
        assert_eq!(to_number(&s("-Infinity")), f64::NEG_INFINITY);
        // case-sensitive: these are not the magic spellings
        assert_eq!(to_number(&s("infinity")), 0.0);
        assert_eq!(to_number(&s("INFINITY")), 0.0);
        assert_eq!(to_number(&s("NaN")), 0.0);
        assert_eq!(to_number(&s("1e3")), 1000.0);
        assert_eq!(to_number(&s(".5")), 0.5);
        assert_eq!(to_number(&s("0x10")), 0.0);
    }

    #[test]
    fn test_to_number_specials() {
        assert_eq!(to_number(&num(f64::NAN)), 0.0);
        assert_eq!(to_number(&Value::Bool(true)), 1.0);
        assert_eq!(to_number(&Value::Bool(false)), 0.0);
    }

    #[test]
    fn test_to_number_or_nan() {
        assert!(to_number_or_nan(&s("apple")).is_nan());
        assert!(to_number_or_nan(&num(f64::NAN)).is_nan());
        assert_eq!(to_number_or_nan(&s("")), 0.0);
        assert_eq!(to_number_or_nan(&s("7")), 7.0);
    }

    #[test]
    fn test_to_boolean() {
        assert!(!to_boolean(&s("")));
        assert!(!to_boolean(&s("0")));
        assert!(!to_boolean(&s("false")));
        assert!(!to_boolean(&s("FaLsE")));
        assert!(to_boolean(&s("true")));
        assert!(to_boolean(&s("anything")));
        assert!(!to_boolean(&num(0.0)));
        assert!(!to_boolean(&num(f64::NAN)));
        assert!(to_boolean(&num(-1.0)));
    }

    #[test]
    fn test_to_string_numbers() {
        assert_eq!(to_string(&num(16.0)), "16");
        assert_eq!(to_string(&num(0.5)), "0.5");
        assert_eq!(to_string(&num(-0.0)), "0");
        assert_eq!(to_string(&num(f64::INFINITY)), "Infinity");
        assert_eq!(to_string(&num(f64::NEG_INFINITY)), "-Infinity");
        assert_eq!(to_string(&num(f64::NAN)), "NaN");
        assert_eq!(to_string(&Value::Bool(false)), "false");
    }

    #[test]
    fn test_compare_numeric() {
        assert_eq!(compare(&num(3.0), &num(5.0)), Ordering::Less);
        assert_eq!(compare(&num(5.0), &s("5")), Ordering::Equal);
        assert_eq!(compare(&s("10"), &s("9")), Ordering::Greater);
        // equal infinities compare equal
        assert_eq!(
            compare(&num(f64::INFINITY), &s("Infinity")),
            Ordering::Equal
        );
    }

    #[test]
    fn test_compare_string_fallback() {
        // either side NaN → case-insensitive string comparison
        assert_eq!(compare(&s("apple"), &s("BANANA")), Ordering::Less);
        assert_eq!(compare(&s("Hello"), &s("hello")), Ordering::Equal);
        // a zero-parsing string with non-'0' characters orders as a string
        assert_ne!(compare(&s("0.0"), &s("x")), Ordering::Equal);
    }

    #[test]
    fn test_compare_antisymmetric() {
        let pairs = [
            (num(1.0), num(2.0)),
            (s("abc"), s("abd")),
            (num(0.0), s("")),
            (s("10"), s("apple")),
        ];
        for (a, b) in &pairs {
            assert_eq!(compare(a, b), compare(b, a).reverse());
            assert_eq!(compare(a, a), Ordering::Equal);
        }
    }

    #[test]
    fn test_modulo_floored() {
        assert_eq!(modulo(7.0, 3.0), 1.0);
        assert_eq!(modulo(-7.0, 3.0), 2.0);
        assert_eq!(modulo(7.0, -3.0), -2.0);
        assert_eq!(modulo(-7.0, -3.0), -1.0);
        assert!(modulo(5.0, 0.0).is_nan());
        assert_eq!(modulo(5.5, 1.0), 0.5);
    }

    #[test]
    fn test_random_integer_endpoints() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let r = random(&mut rng, &num(1.0), &num(10.0));
            assert_eq!(r, r.floor());
            assert!((1.0..=10.0).contains(&r));
        }
    }

    #[test]
    fn test_random_real_endpoints() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut saw_fraction = false;
        for _ in 0..200 {
            let r = random(&mut rng, &s("0.5"), &num(2.0));
            assert!((0.5..=2.0).contains(&r));
            if r != r.floor() {
                saw_fraction = true;
            }
        }
        assert!(saw_fraction);
    }

    #[test]
    fn test_random_reversed_and_equal() {
        let mut rng = StdRng::seed_from_u64(7);
        let r = random(&mut rng, &num(10.0), &num(1.0));
        assert!((1.0..=10.0).contains(&r));
        assert_eq!(random(&mut rng, &num(4.0), &num(4.0)), 4.0);
    }

    #[test]
    fn test_to_list_index() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            to_list_index(&mut rng, &s("last"), 3, false),
            ListIndex::Index(3)
        );
        assert_eq!(
            to_list_index(&mut rng, &s("last"), 0, false),
            ListIndex::Invalid
        );
        assert_eq!(to_list_index(&mut rng, &s("all"), 3, true), ListIndex::All);
        assert_eq!(
            to_list_index(&mut rng, &s("all"), 3, false),
            ListIndex::Invalid
        );
        assert_eq!(
            to_list_index(&mut rng, &num(0.0), 3, false),
            ListIndex::Invalid
        );
        assert_eq!(
            to_list_index(&mut rng, &num(2.9), 3, false),
            ListIndex::Index(2)
        );
        assert_eq!(
            to_list_index(&mut rng, &num(4.0), 3, false),
            ListIndex::Invalid
        );
        match to_list_index(&mut rng, &s("any"), 5, false) {
            ListIndex::Index(i) => assert!((1..=5).contains(&i)),
            other => panic!("expected index, got {:?}", other),
        }
    }

    #[test]
    fn test_letter_of() {
        assert_eq!(letter_of(&num(1.0), "apple"), "a");
        assert_eq!(letter_of(&num(5.0), "apple"), "e");
        assert_eq!(letter_of(&num(0.0), "apple"), "");
        assert_eq!(letter_of(&num(6.0), "apple"), "");
        assert_eq!(letter_of(&num(2.0), "héllo"), "é");
    }

    #[test]
    fn test_contains_case_insensitive() {
        assert!(contains("Hello World", "WORLD"));
        assert!(!contains("Hello", "world"));
    }

    #[test]
    fn test_list_contents_separator() {
        let chars = vec![Value::from("a"), Value::from("b"), Value::Number(1.0)];
        assert_eq!(list_contents(&chars), "ab1");
        let words = vec![Value::from("ab"), Value::from("c")];
        assert_eq!(list_contents(&words), "ab c");
        assert_eq!(list_contents(&[]), "");
    }

    #[test]
    fn test_scratch_coordinate() {
        assert_eq!(to_scratch_coordinate(3.0000000001), 3.0);
        assert_eq!(to_scratch_coordinate(3.5), 3.5);
        assert_eq!(to_scratch_coordinate(-0.9999999999), -1.0);
    }

    #[test]
    fn test_to_color() {
        assert_eq!(to_color(&s("#ff0080")), 0xFF0080);
        assert_eq!(to_color(&num(255.0)), 255);
        assert_eq!(to_color(&s("#zz")), 0);
    }

    #[test]
    fn test_number_string_round_trip_stable() {
        // to_string(to_number(s)) is a fixed point of the pipeline
        for input in ["3.5", "apple", "", "  7 ", "Infinity", "-0"] {
            let v = s(input);
            let once = to_string(&num(to_number(&v)));
            let twice = to_string(&num(to_number(&Value::from(once.clone()))));
            assert_eq!(once, twice, "input {:?}", input);
        }
    }
}

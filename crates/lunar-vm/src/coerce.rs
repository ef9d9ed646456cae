//! Conversions the VM applies implicitly: numbers to strings for `..`,
//! and the numeric-for loop limits.

use lunar_core::number::{float_to_integer, fmt_float};
use lunar_core::string::LuaStr;
use lunar_core::value::TValue;

/// A string or number, which `..` accepts without a metamethod.
#[inline]
pub fn is_concatable(v: &TValue) -> bool {
    matches!(v, TValue::String(_) | TValue::Integer(_) | TValue::Float(_))
}

/// Convert a value to string for concatenation.
pub fn to_string_for_concat(v: &TValue) -> Option<LuaStr> {
    match v {
        TValue::String(s) => Some(s.clone()),
        TValue::Integer(i) => Some(LuaStr::from(i.to_string())),
        TValue::Float(f) => Some(LuaStr::from(fmt_float(*f))),
        _ => None,
    }
}

/// Convert a for-loop limit to an integer, rounding toward the loop's
/// direction. Returns `(limit, skip)`, where `skip` means the loop must not
/// run at all, or None when the limit is not a number.
pub fn for_limit(limit: &TValue, step: i64) -> Option<(i64, bool)> {
    let rounded = match limit.to_integer() {
        Some(i) => Some(i),
        None => {
            let f = limit.to_float()?;
            let r = if step < 0 { f.ceil() } else { f.floor() };
            float_to_integer(r)
        }
    };
    if let Some(l) = rounded {
        return Some((l, false));
    }
    // A float limit out of integer range (or NaN) clips the loop
    let f = limit.to_float()?;
    if f > 0.0 {
        Some((i64::MAX, step < 0))
    } else {
        Some((i64::MIN, step > 0))
    }
}

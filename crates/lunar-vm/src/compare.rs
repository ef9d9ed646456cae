//! Comparison operations with Lua 5.3 semantics.

use lunar_core::value::TValue;

/// Result of comparison that may need metamethod.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareResult {
    Ok(bool),
    NeedMetamethod,
}

// 2^63, the first float past i64::MAX
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

#[inline]
fn fits_i64(f: f64) -> bool {
    (-TWO_POW_63..TWO_POW_63).contains(&f)
}

/// i < f, exact for every integer.
fn lt_int_float(i: i64, f: f64) -> bool {
    if f.is_nan() {
        false
    } else if fits_i64(f.ceil()) {
        i < f.ceil() as i64
    } else {
        f > 0.0
    }
}

/// i <= f
fn le_int_float(i: i64, f: f64) -> bool {
    if f.is_nan() {
        false
    } else if fits_i64(f.floor()) {
        i <= f.floor() as i64
    } else {
        f > 0.0
    }
}

/// f < i
fn lt_float_int(f: f64, i: i64) -> bool {
    if f.is_nan() {
        false
    } else if fits_i64(f.floor()) {
        (f.floor() as i64) < i
    } else {
        f < 0.0
    }
}

/// f <= i
fn le_float_int(f: f64, i: i64) -> bool {
    if f.is_nan() {
        false
    } else if fits_i64(f.ceil()) {
        (f.ceil() as i64) <= i
    } else {
        f < 0.0
    }
}

/// Lua less-than for numbers and strings; anything else needs `__lt`.
pub fn lua_lt(a: &TValue, b: &TValue) -> CompareResult {
    CompareResult::Ok(match (a, b) {
        (TValue::Integer(x), TValue::Integer(y)) => x < y,
        (TValue::Float(x), TValue::Float(y)) => x < y,
        (TValue::Integer(x), TValue::Float(y)) => lt_int_float(*x, *y),
        (TValue::Float(x), TValue::Integer(y)) => lt_float_int(*x, *y),
        (TValue::String(x), TValue::String(y)) => x.as_bytes() < y.as_bytes(),
        _ => return CompareResult::NeedMetamethod,
    })
}

/// Lua less-or-equal for numbers and strings; anything else needs `__le`.
pub fn lua_le(a: &TValue, b: &TValue) -> CompareResult {
    CompareResult::Ok(match (a, b) {
        (TValue::Integer(x), TValue::Integer(y)) => x <= y,
        (TValue::Float(x), TValue::Float(y)) => x <= y,
        (TValue::Integer(x), TValue::Float(y)) => le_int_float(*x, *y),
        (TValue::Float(x), TValue::Integer(y)) => le_float_int(*x, *y),
        (TValue::String(x), TValue::String(y)) => x.as_bytes() <= y.as_bytes(),
        _ => return CompareResult::NeedMetamethod,
    })
}

/// True when a failed raw comparison of `a` and `b` may still be decided
/// by `__eq`: both tables or both host values.
pub fn eq_needs_metamethod(a: &TValue, b: &TValue) -> bool {
    matches!(
        (a, b),
        (TValue::Table(_), TValue::Table(_)) | (TValue::Host(_), TValue::Host(_))
    )
}

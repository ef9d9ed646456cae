//! Numeric conversions shared by the value model: string-to-number parsing
//! and Lua's number-to-string formatting.

/// A parsed numeric literal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

/// Lua's whitespace set (C `isspace` in the "C" locale).
fn is_lua_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| !is_lua_space(b))
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|&b| !is_lua_space(b))
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

/// Convert a string to a number following the Lua lexer's rules.
///
/// Integers that overflow in decimal fall back to floats; hexadecimal
/// integers wrap around. Leading and trailing whitespace is allowed.
pub fn str_to_number(bytes: &[u8]) -> Option<Num> {
    let s = trim(bytes);
    if s.is_empty() {
        return None;
    }
    if let Some(i) = str_to_int(s) {
        return Some(Num::Int(i));
    }
    str_to_float(s).map(Num::Float)
}

fn split_sign(s: &[u8]) -> (bool, &[u8]) {
    match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    }
}

fn strip_hex_prefix(s: &[u8]) -> Option<&[u8]> {
    if s.len() >= 2 && s[0] == b'0' && (s[1] == b'x' || s[1] == b'X') {
        Some(&s[2..])
    } else {
        None
    }
}

fn str_to_int(s: &[u8]) -> Option<i64> {
    let (neg, digits) = split_sign(s);
    let mut a: u64 = 0;
    if let Some(hex) = strip_hex_prefix(digits) {
        if hex.is_empty() {
            return None;
        }
        for &b in hex {
            let d = (b as char).to_digit(16)?;
            a = a.wrapping_mul(16).wrapping_add(d as u64);
        }
    } else {
        if digits.is_empty() {
            return None;
        }
        let limit = if neg { i64::MIN.unsigned_abs() } else { i64::MAX as u64 };
        for &b in digits {
            if !b.is_ascii_digit() {
                return None;
            }
            a = a.checked_mul(10)?.checked_add((b - b'0') as u64)?;
            if a > limit {
                return None;
            }
        }
    }
    let v = a as i64;
    Some(if neg { v.wrapping_neg() } else { v })
}

fn str_to_float(s: &[u8]) -> Option<f64> {
    // 'inf' and 'nan' are not numerals
    if s.iter().any(|&b| b == b'n' || b == b'N') {
        return None;
    }
    let (neg, body) = split_sign(s);
    let v = match strip_hex_prefix(body) {
        Some(hex) => hex_to_float(hex)?,
        None => {
            if !is_decimal_numeral(body) {
                return None;
            }
            std::str::from_utf8(body).ok()?.parse::<f64>().ok()?
        }
    };
    Some(if neg { -v } else { v })
}

/// digits [. digits] [(e|E) [sign] digits], with at least one mantissa digit.
fn is_decimal_numeral(s: &[u8]) -> bool {
    let mut i = 0;
    let mut mantissa_digits = 0;
    while i < s.len() && s[i].is_ascii_digit() {
        i += 1;
        mantissa_digits += 1;
    }
    if i < s.len() && s[i] == b'.' {
        i += 1;
        while i < s.len() && s[i].is_ascii_digit() {
            i += 1;
            mantissa_digits += 1;
        }
    }
    if mantissa_digits == 0 {
        return false;
    }
    if i < s.len() && (s[i] == b'e' || s[i] == b'E') {
        i += 1;
        if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < s.len() && s[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }
    i == s.len()
}

/// Hexadecimal float body (after "0x"): hexdigits [. hexdigits] [(p|P) [sign] digits].
fn hex_to_float(s: &[u8]) -> Option<f64> {
    let mut mantissa = 0.0f64;
    let mut exp: i64 = 0;
    let mut any_digit = false;
    let mut i = 0;
    let mut seen_dot = false;
    while i < s.len() {
        let b = s[i];
        if b == b'.' {
            if seen_dot {
                return None;
            }
            seen_dot = true;
        } else if let Some(d) = (b as char).to_digit(16) {
            mantissa = mantissa * 16.0 + d as f64;
            if seen_dot {
                exp -= 4;
            }
            any_digit = true;
        } else {
            break;
        }
        i += 1;
    }
    if !any_digit {
        return None;
    }
    if i < s.len() && (s[i] == b'p' || s[i] == b'P') {
        i += 1;
        let (neg, rest) = split_sign(&s[i..]);
        if rest.is_empty() || !rest.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let mut e: i64 = 0;
        for &b in rest {
            e = e.saturating_mul(10).saturating_add((b - b'0') as i64);
        }
        exp += if neg { -e } else { e };
        i = s.len();
    }
    if i != s.len() {
        return None;
    }
    let exp = exp.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    Some(mantissa * 2f64.powi(exp))
}

/// Convert a float to an integer if it has an exact integer value in range.
pub fn float_to_integer(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; i64 covers [-2^63, 2^63)
    const TWO_63: f64 = 9_223_372_036_854_775_808.0;
    if f.fract() == 0.0 && (-TWO_63..TWO_63).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

/// Format a float the way Lua's `tostring` does (`%.14g`, plus ".0" when
/// the result would otherwise read as an integer).
pub fn fmt_float(f: f64) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    let mut s = fmt_g(f, 14);
    if s.bytes().all(|b| b == b'-' || b.is_ascii_digit()) {
        s.push_str(".0");
    }
    s
}

/// C `%.{prec}g` for finite values.
fn fmt_g(f: f64, prec: usize) -> String {
    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let sci = format!("{:.*e}", prec - 1, f);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if exp < -4 || exp >= prec as i32 {
        let m = trim_fraction(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{m}e{sign}{:02}", exp.unsigned_abs())
    } else {
        let decimals = (prec as i32 - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{f:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

//! Arithmetic operations with Lua 5.3 semantics.

use lunar_core::error::LuaError;
use lunar_core::value::TValue;

/// Result of an arithmetic operation that may need a metamethod fallback.
#[derive(Debug)]
pub enum ArithResult {
    /// Operation succeeded with this value.
    Ok(TValue),
    /// An operand has the wrong type; the caller should try a metamethod.
    NeedMetamethod,
    /// Actual error (integer division by zero).
    Error(LuaError),
}

/// Arithmetic and bitwise operators, in `__add` .. `__bnot` order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
}

impl ArithOp {
    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }

    pub fn is_unary(self) -> bool {
        matches!(self, ArithOp::Unm | ArithOp::BNot)
    }
}

/// Apply `op` to two operands without consulting metatables. Unary
/// operators ignore `b`.
pub fn arith_op(op: ArithOp, a: &TValue, b: &TValue) -> ArithResult {
    if op.is_bitwise() {
        return match (a.to_integer(), b.to_integer()) {
            (Some(x), Some(y)) => int_arith(op, x, y),
            _ => ArithResult::NeedMetamethod,
        };
    }

    // Both integers: integer arithmetic except for / and ^
    if let (TValue::Integer(x), TValue::Integer(y)) = (a, b) {
        if !matches!(op, ArithOp::Div | ArithOp::Pow) {
            return int_arith(op, *x, *y);
        }
    }

    // Everything else, numeric strings included, goes through floats
    match (a.to_float(), b.to_float()) {
        (Some(x), Some(y)) => ArithResult::Ok(TValue::from_float(float_arith(op, x, y))),
        _ => ArithResult::NeedMetamethod,
    }
}

/// Integer arithmetic, returning integer result.
fn int_arith(op: ArithOp, a: i64, b: i64) -> ArithResult {
    let result = match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::IDiv => {
            if b == 0 {
                return ArithResult::Error(LuaError::runtime("attempt to perform 'n//0'"));
            }
            lua_idiv(a, b)
        }
        ArithOp::Mod => {
            if b == 0 {
                return ArithResult::Error(LuaError::runtime("attempt to perform 'n%0'"));
            }
            lua_imod(a, b)
        }
        ArithOp::BAnd => a & b,
        ArithOp::BOr => a | b,
        ArithOp::BXor => a ^ b,
        ArithOp::Shl => lua_shl(a, b),
        ArithOp::Shr => lua_shr(a, b),
        ArithOp::Unm => a.wrapping_neg(),
        ArithOp::BNot => !a,
        ArithOp::Div | ArithOp::Pow => {
            return ArithResult::Ok(TValue::from_float(float_arith(op, a as f64, b as f64)))
        }
    };
    ArithResult::Ok(TValue::from_integer(result))
}

/// Float arithmetic. Bitwise operators never reach here.
fn float_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Pow => a.powf(b),
        // Division by zero follows IEEE 754 (inf, -inf or NaN)
        ArithOp::IDiv => (a / b).floor(),
        ArithOp::Mod => lua_fmod(a, b),
        ArithOp::Unm => -a,
        ArithOp::BAnd
        | ArithOp::BOr
        | ArithOp::BXor
        | ArithOp::Shl
        | ArithOp::Shr
        | ArithOp::BNot => f64::NAN,
    }
}

/// Lua integer division (floor division).
pub fn lua_idiv(a: i64, b: i64) -> i64 {
    // wrapping_div: i64::MIN // -1 is i64::MIN
    let d = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && (r ^ b) < 0 {
        d - 1
    } else {
        d
    }
}

/// Lua integer modulo; the result takes the divisor's sign.
pub fn lua_imod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r ^ b) < 0 {
        r.wrapping_add(b)
    } else {
        r
    }
}

/// Lua float modulo: a - floor(a/b)*b.
/// Compares signs instead of testing r*b < 0, which underflows for tiny values.
pub fn lua_fmod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r > 0.0) != (b > 0.0)) {
        r + b
    } else {
        r
    }
}

/// Logical left shift; negative amounts shift right.
pub fn lua_shl(a: i64, b: i64) -> i64 {
    if b >= 64 || b <= -64 {
        0
    } else if b < 0 {
        lua_shr(a, -b)
    } else {
        (a as u64).wrapping_shl(b as u32) as i64
    }
}

/// Logical right shift; negative amounts shift left.
pub fn lua_shr(a: i64, b: i64) -> i64 {
    if b >= 64 || b <= -64 {
        0
    } else if b < 0 {
        lua_shl(a, -b)
    } else {
        (a as u64).wrapping_shr(b as u32) as i64
    }
}

#![no_main]

use libfuzzer_sys::fuzz_target;
use lunar_core::number::{fmt_float, str_to_number, Num};
use lunar_core::value::TValue;
use lunar_vm::arith::{arith_op, ArithOp};

const OPS: [ArithOp; 14] = [
    ArithOp::Add,
    ArithOp::Sub,
    ArithOp::Mul,
    ArithOp::Mod,
    ArithOp::Pow,
    ArithOp::Div,
    ArithOp::IDiv,
    ArithOp::BAnd,
    ArithOp::BOr,
    ArithOp::BXor,
    ArithOp::Shl,
    ArithOp::Shr,
    ArithOp::Unm,
    ArithOp::BNot,
];

fuzz_target!(|data: &[u8]| {
    // Parsing and arithmetic must never panic; errors are fine.
    let Some(n) = str_to_number(data) else {
        return;
    };
    if let Num::Float(f) = n {
        // Formatted floats read back as floats
        if f.is_finite() {
            let text = fmt_float(f);
            let back = str_to_number(text.as_bytes());
            assert!(matches!(back, Some(Num::Float(_))), "{text} parsed back as {back:?}");
        }
    }
    let v = TValue::from_num(n);
    let rhs = TValue::from_string(data);
    for op in OPS {
        let _ = arith_op(op, &v, &v);
        let _ = arith_op(op, &v, &rhs);
    }
});

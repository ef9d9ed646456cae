/// Bytecode disassembler (luac -l style output).
use crate::opcode::{index_k, is_k, Instruction, InstructionFormat, OpCode};
use crate::proto::{Constant, Proto};
use std::fmt::Write;

/// Disassemble a complete Proto (and its nested functions) into a string.
pub fn disassemble(proto: &Proto) -> String {
    let mut out = String::new();
    disassemble_proto(&mut out, proto, 0);
    out
}

fn disassemble_proto(out: &mut String, proto: &Proto, level: usize) {
    let indent = "  ".repeat(level);

    // Header
    let vararg = if proto.is_vararg { "+" } else { "" };
    let _ = writeln!(
        out,
        "{indent}function <{}:{}> ({}{vararg} params, {} slots, {} upvalues, {} constants, {} functions)",
        crate::proto::chunk_id(&proto.source),
        proto.line_defined,
        proto.num_params,
        proto.max_stack_size,
        proto.upvalues.len(),
        proto.constants.len(),
        proto.protos.len(),
    );

    // Instructions
    for (pc, inst) in proto.code.iter().enumerate() {
        let line_str = match proto.get_line(pc) {
            Some(line) => format!("[{line}]"),
            None => "[-]".to_string(),
        };
        let _ = write!(out, "{indent}\t{}\t{:>5}\t", pc + 1, line_str);
        disasm_instruction(out, pc, inst, proto);
        out.push('\n');
    }

    // Constants
    if !proto.constants.is_empty() {
        let _ = writeln!(out, "{indent}constants ({}):", proto.constants.len());
        for (i, k) in proto.constants.iter().enumerate() {
            let _ = write!(out, "{indent}\t{i}\t");
            format_constant(out, k);
            out.push('\n');
        }
    }

    // Locals
    if !proto.local_vars.is_empty() {
        let _ = writeln!(out, "{indent}locals ({}):", proto.local_vars.len());
        for (i, var) in proto.local_vars.iter().enumerate() {
            let _ = writeln!(
                out,
                "{indent}\t{i}\t{}\t{}\t{}",
                var.name,
                var.start_pc + 1,
                var.end_pc + 1
            );
        }
    }

    // Upvalues
    if !proto.upvalues.is_empty() {
        let _ = writeln!(out, "{indent}upvalues ({}):", proto.upvalues.len());
        for (i, up) in proto.upvalues.iter().enumerate() {
            let _ = writeln!(
                out,
                "{indent}\t{i}\t{}\t{}\t{}",
                up.name.as_deref().unwrap_or("-"),
                u8::from(up.in_stack),
                up.index
            );
        }
    }

    // Nested protos
    for (i, p) in proto.protos.iter().enumerate() {
        let _ = writeln!(out, "{indent}function [{i}]:");
        disassemble_proto(out, p, level + 1);
    }
}

/// Disassemble a single instruction at `pc` into the output string.
pub fn disasm_instruction(out: &mut String, pc: usize, inst: &Instruction, proto: &Proto) {
    let Some(op) = inst.opcode() else {
        let _ = write!(out, "<invalid {:#010x}>", inst.0);
        return;
    };
    let _ = write!(out, "{:<10}", op.name());

    match op.format() {
        InstructionFormat::IABC => {
            let _ = write!(out, "{} {} {}", inst.a(), rk_operand(inst.b()), rk_operand(inst.c()));
            let mut sep = "\t; ";
            for x in [inst.b(), inst.c()] {
                if is_rk_op(op) && is_k(x) {
                    out.push_str(sep);
                    match proto.constants.get(index_k(x)) {
                        Some(k) => format_constant(out, k),
                        None => out.push('?'),
                    }
                    sep = " ";
                }
            }
            if matches!(op, OpCode::GetUpval | OpCode::SetUpval | OpCode::GetTabUp) {
                let _ = write!(out, "\t; {}", proto.upvalue_name(inst.b() as usize));
            } else if matches!(op, OpCode::SetTabUp) {
                let _ = write!(out, "\t; {}", proto.upvalue_name(inst.a() as usize));
            }
        }
        InstructionFormat::IABx => {
            let _ = write!(out, "{} {}", inst.a(), inst.bx());
            if op == OpCode::LoadK {
                if let Some(k) = proto.constants.get(inst.bx() as usize) {
                    out.push_str("\t; ");
                    format_constant(out, k);
                }
            } else if op == OpCode::Closure {
                let _ = write!(out, "\t; function [{}]", inst.bx());
            }
        }
        InstructionFormat::IAsBx => {
            let _ = write!(out, "{} {}", inst.a(), inst.sbx());
            let target = pc as i64 + 2 + inst.sbx() as i64;
            let _ = write!(out, "\t; to {target}");
        }
        InstructionFormat::IAx => {
            let _ = write!(out, "{}", inst.ax_field());
        }
    }
}

/// Whether B and C of this opcode are RK operands.
fn is_rk_op(op: OpCode) -> bool {
    use OpCode::*;
    matches!(
        op,
        GetTabUp | GetTable | SetTabUp | SetTable | Self_ | Add | Sub | Mul | Mod | Pow | Div
            | IDiv | BAnd | BOr | BXor | Shl | Shr | Eq | Lt | Le
    )
}

/// Render an operand luac-style: constants as negative numbers.
fn rk_operand(x: u32) -> i64 {
    if is_k(x) {
        -1 - index_k(x) as i64
    } else {
        x as i64
    }
}

fn format_constant(out: &mut String, k: &Constant) {
    match k {
        Constant::Nil => out.push_str("nil"),
        Constant::Boolean(b) => {
            let _ = write!(out, "{b}");
        }
        Constant::Integer(i) => {
            let _ = write!(out, "{i}");
        }
        Constant::Float(f) => {
            let _ = write!(out, "{f:?}");
        }
        Constant::String(bytes) => {
            let _ = write!(out, "\"{}\"", String::from_utf8_lossy(bytes));
        }
    }
}

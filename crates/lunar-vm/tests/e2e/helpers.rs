#![allow(dead_code)]

use lunar_bytecode::opcode::{rk_ask, Instruction, OpCode};
use lunar_bytecode::proto::{Constant, Proto};
use lunar_vm::{NativeContext, TValue, Vm};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Hand assembler for test prototypes. Instructions are tagged with the
/// current line, set through `at`.
pub struct Asm {
    p: Proto,
    line: u32,
}

impl Asm {
    /// A main chunk named "=test": vararg, with `_ENV` as upvalue 0.
    pub fn main() -> Self {
        let mut p = Proto::new("=test");
        p.is_vararg = true;
        p.max_stack_size = 16;
        p.add_upvalue("_ENV", true, 0);
        Asm { p, line: 1 }
    }

    /// A nested function defined at `line` taking `params` fixed parameters.
    pub fn function(params: u8, line: u32) -> Self {
        let mut p = Proto::new("=test");
        p.num_params = params;
        p.line_defined = line;
        p.last_line_defined = line;
        p.max_stack_size = 16;
        Asm { p, line }
    }

    pub fn vararg(mut self) -> Self {
        self.p.is_vararg = true;
        self
    }

    pub fn regs(mut self, n: u8) -> Self {
        self.p.max_stack_size = n;
        self
    }

    pub fn at(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    pub fn upvalue(&mut self, name: &str, in_stack: bool, index: u8) -> u32 {
        self.p.add_upvalue(name, in_stack, index)
    }

    pub fn local(&mut self, name: &str, start_pc: u32, end_pc: u32) {
        self.p.add_local(name, start_pc, end_pc);
    }

    pub fn kint(&mut self, i: i64) -> u32 {
        self.p.add_constant(Constant::Integer(i))
    }

    pub fn kflt(&mut self, f: f64) -> u32 {
        self.p.add_constant(Constant::Float(f))
    }

    pub fn kstr(&mut self, s: &str) -> u32 {
        self.p.add_constant(Constant::string(s))
    }

    /// RK operand naming a string constant.
    pub fn rks(&mut self, s: &str) -> u32 {
        rk_ask(self.kstr(s))
    }

    /// RK operand naming an integer constant.
    pub fn rki(&mut self, i: i64) -> u32 {
        rk_ask(self.kint(i))
    }

    pub fn abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        self.p.emit(Instruction::abc(op, a, b, c), self.line)
    }

    pub fn abx(&mut self, op: OpCode, a: u32, bx: u32) -> usize {
        self.p.emit(Instruction::abx(op, a, bx), self.line)
    }

    pub fn asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        self.p.emit(Instruction::asbx(op, a, sbx), self.line)
    }

    pub fn ax(&mut self, op: OpCode, ax: u32) -> usize {
        self.p.emit(Instruction::ax(op, ax), self.line)
    }

    /// `R(a) := _ENV[name]`.
    pub fn get_global(&mut self, a: u32, name: &str) -> usize {
        let k = self.rks(name);
        self.abc(OpCode::GetTabUp, a, 0, k)
    }

    /// `_ENV[name] := R(a)`.
    pub fn set_global(&mut self, name: &str, a: u32) -> usize {
        let k = self.rks(name);
        self.abc(OpCode::SetTabUp, 0, k, a)
    }

    pub fn load_int(&mut self, a: u32, i: i64) -> usize {
        let k = self.kint(i);
        self.abx(OpCode::LoadK, a, k)
    }

    pub fn load_str(&mut self, a: u32, s: &str) -> usize {
        let k = self.kstr(s);
        self.abx(OpCode::LoadK, a, k)
    }

    /// Add `f` as a nested prototype and emit `CLOSURE a`.
    pub fn closure(&mut self, a: u32, f: Asm) -> usize {
        let idx = self.p.add_proto(f.finish());
        self.abx(OpCode::Closure, a, idx)
    }

    /// pc of the next instruction.
    pub fn here(&self) -> usize {
        self.p.code.len()
    }

    /// Point the jump at `pc` to the next instruction emitted.
    pub fn patch_to_here(&mut self, pc: usize) {
        let offset = self.here() as i32 - pc as i32 - 1;
        self.p.get_mut(pc).set_sbx(offset);
    }

    pub fn finish(self) -> Proto {
        self.p
    }
}

/// A fresh VM with test logging and a `select` global.
pub fn new_vm() -> Vm {
    init_logging();
    let mut vm = Vm::new();
    vm.register("select", select);
    vm
}

/// Enough of `select` for vararg tests: `select('#', ...)` and
/// `select(n, ...)`.
fn select(ctx: &mut NativeContext<'_>) -> Result<Vec<TValue>, lunar_vm::LuaError> {
    let n = ctx.arg_count().saturating_sub(1);
    if ctx.arg(1) == TValue::from("#") {
        return Ok(vec![TValue::from_integer(n as i64)]);
    }
    let i = ctx.check_integer(1)?;
    if i < 1 {
        return Err(ctx.arg_error(1, "index out of range"));
    }
    Ok(ctx.args.iter().skip(i as usize).cloned().collect())
}

/// Run a main chunk, panicking on error.
pub fn run(p: Proto) -> Vec<TValue> {
    let mut vm = new_vm();
    run_on(&mut vm, p)
}

pub fn run_on(vm: &mut Vm, p: Proto) -> Vec<TValue> {
    vm.run(p)
        .unwrap_or_else(|e| panic!("runtime error: {e}\n{}", vm.traceback(&e)))
}

/// Run a main chunk that must fail, returning the error message.
pub fn run_err(p: Proto) -> String {
    let mut vm = new_vm();
    run_err_on(&mut vm, p)
}

pub fn run_err_on(vm: &mut Vm, p: Proto) -> String {
    match vm.run(p) {
        Err(e) => e.to_string(),
        Ok(vals) => panic!("expected error, got {} results: {:?}", vals.len(), vals),
    }
}

/// Check that results[idx] is an integer with the expected value.
pub fn assert_int(results: &[TValue], idx: usize, expected: i64) {
    let val = &results[idx];
    let got = val
        .as_integer()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected integer {expected}"));
    assert_eq!(got, expected, "result[{idx}] = {got}, expected {expected}");
}

/// Check that results[idx] is a float with the expected value.
pub fn assert_float(results: &[TValue], idx: usize, expected: f64) {
    let val = &results[idx];
    let got = val
        .as_float()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected float {expected}"));
    assert!(
        (got - expected).abs() < 1e-10,
        "result[{idx}] = {got}, expected {expected}"
    );
}

pub fn assert_bool(results: &[TValue], idx: usize, expected: bool) {
    let val = &results[idx];
    let got = val
        .as_bool()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected bool {expected}"));
    assert_eq!(got, expected, "result[{idx}] = {got}, expected {expected}");
}

pub fn assert_nil(results: &[TValue], idx: usize) {
    let val = &results[idx];
    assert!(val.is_nil(), "result[{idx}] = {val:?}, expected nil");
}

pub fn assert_str(results: &[TValue], idx: usize, expected: &str) {
    let val = &results[idx];
    let got = val
        .as_str()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected string \"{expected}\""))
        .to_string_lossy();
    assert_eq!(got, expected, "result[{idx}] = \"{got}\", expected \"{expected}\"");
}

/// Run a chunk and check its results are exactly these integers.
pub fn run_check_ints(p: Proto, expected: &[i64]) {
    let results = run(p);
    assert_eq!(
        results.len(),
        expected.len(),
        "expected {} results, got {}: {results:?}",
        expected.len(),
        results.len()
    );
    for (i, &e) in expected.iter().enumerate() {
        assert_int(&results, i, e);
    }
}

/// A chunk computing `R0 := RK(b) op RK(c)` and returning R0.
pub fn binop(op: OpCode, b: TValue, c: TValue) -> Proto {
    let mut asm = Asm::main();
    let rb = rk_value(&mut asm, b);
    let rc = rk_value(&mut asm, c);
    asm.abc(op, 0, rb, rc);
    asm.abc(OpCode::Return, 0, 2, 0);
    asm.finish()
}

fn rk_value(asm: &mut Asm, v: TValue) -> u32 {
    let k = match v {
        TValue::Integer(i) => asm.kint(i),
        TValue::Float(f) => asm.kflt(f),
        TValue::String(s) => asm.kstr(&s.to_string_lossy()),
        other => panic!("no constant form for {other:?}"),
    };
    rk_ask(k)
}

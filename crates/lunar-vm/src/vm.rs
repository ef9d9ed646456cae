//! The virtual machine: value stack, call frames and the calling convention.

use crate::callinfo::CallInfo;
use crate::config::VmConfig;
use crate::dispatch;
use crate::metamethod::{get_metamethod, metatable_of, TmEvent};
use crate::runtime::Runtime;
use lunar_bytecode::opcode::{index_k, is_k, Instruction, OpCode};
use lunar_bytecode::proto::Proto;
use lunar_core::closure::{Function, LuaClosure, NativeFunction, UpVal, UpValRef};
use lunar_core::error::{ErrorKind, FrameSnapshot, LuaError};
use lunar_core::native::NativeContext;
use lunar_core::string::LuaStr;
use lunar_core::table::TableRef;
use lunar_core::value::TValue;
use std::rc::Rc;

/// A Lua 5.3 bytecode interpreter.
///
/// The VM owns one value stack shared by all frames. Lua frames address
/// their registers relative to `base`; results are moved down to the slot
/// that held the called function.
pub struct Vm {
    /// Value stack (registers of every active frame).
    pub stack: Vec<TValue>,
    /// First free slot, for variable-count operations.
    pub top: usize,
    /// Active frames, innermost last.
    pub call_stack: Vec<CallInfo>,
    /// Open upvalues sorted by stack index (ascending).
    pub open_upvals: Vec<(usize, UpValRef)>,
    pub runtime: Runtime,
    pub config: VmConfig,
    /// Nesting of re-entrant calls through `call_at`.
    pub native_depth: usize,
    /// Stack address of the outermost `call_at`.
    native_stack_base: usize,
    /// Instructions left before `BudgetExhausted`; None is unlimited.
    pub budget: Option<u64>,
}

impl Vm {
    /// Create a VM with default limits.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        log::debug!(
            "creating vm: max_call_depth={} max_stack_size={}",
            config.max_call_depth,
            config.max_stack_size
        );
        Vm {
            stack: vec![TValue::nil(); config.initial_stack_size],
            top: 0,
            call_stack: Vec::new(),
            open_upvals: Vec::new(),
            runtime: Runtime::new(),
            budget: config.instruction_budget,
            config,
            native_depth: 0,
            native_stack_base: 0,
        }
    }

    /// Make sure slots `..needed` exist.
    pub fn ensure_stack(&mut self, needed: usize) -> Result<(), LuaError> {
        if needed > self.stack.len() {
            if needed > self.config.max_stack_size {
                return Err(LuaError::new(ErrorKind::StackOverflow));
            }
            self.stack.resize(needed, TValue::nil());
        }
        Ok(())
    }

    // ---- Calling convention ----

    /// Start a call of the value at `func_idx` with arguments up to `top`.
    /// Native functions run to completion; a Lua function gets a new frame
    /// and `true` is returned so the caller can run it.
    pub(crate) fn precall(&mut self, func_idx: usize, nresults: i32) -> Result<bool, LuaError> {
        self.resolve_call_handler(func_idx)?;
        match &self.stack[func_idx] {
            TValue::Function(Function::Lua(cl)) => {
                let cl = cl.clone();
                self.push_lua_frame(cl, func_idx, nresults)?;
                Ok(true)
            }
            TValue::Function(Function::Native(nf)) => {
                let nf = nf.clone();
                self.call_native(&nf, func_idx, nresults)?;
                Ok(false)
            }
            _ => Err(LuaError::internal("call handler did not yield a function")),
        }
    }

    /// Follow `__call` until the value at `func_idx` is a function.
    pub(crate) fn resolve_call_handler(&mut self, func_idx: usize) -> Result<(), LuaError> {
        let mut handlers = 0;
        while !self.stack[func_idx].is_function() {
            if handlers >= self.config.max_meta_loop {
                return Err(LuaError::runtime("'__call' chain too long; possible loop"));
            }
            self.insert_call_handler(func_idx)?;
            handlers += 1;
        }
        Ok(())
    }

    /// Replace a non-function callee by its `__call` handler, shifting the
    /// original value up to become the first argument.
    fn insert_call_handler(&mut self, func_idx: usize) -> Result<(), LuaError> {
        let func = self.stack[func_idx].clone();
        let Some(tm) = get_metamethod(&self.runtime, &func, TmEvent::Call) else {
            let origin = self.slot_origin(func_idx);
            return Err(self.op_error("call", &func, origin));
        };
        self.ensure_stack(self.top + 1)?;
        self.stack[func_idx..=self.top].rotate_right(1);
        self.stack[func_idx] = tm;
        self.top += 1;
        Ok(())
    }

    fn push_lua_frame(
        &mut self,
        cl: Rc<LuaClosure>,
        func_idx: usize,
        nresults: i32,
    ) -> Result<(), LuaError> {
        if self.call_stack.len() >= self.config.max_call_depth {
            return Err(LuaError::new(ErrorKind::StackOverflow));
        }
        let p = &cl.proto;
        let nargs = self.top - func_idx - 1;
        let num_params = p.num_params as usize;
        let fsize = p.max_stack_size as usize;
        self.ensure_stack(self.top + num_params + fsize)?;

        let base = if p.is_vararg {
            self.adjust_varargs(num_params, nargs)
        } else {
            func_idx + 1
        };
        let top = base + fsize;
        // Missing parameters and fresh registers start out nil
        let first_free = if p.is_vararg {
            base + num_params
        } else {
            base + nargs.min(num_params)
        };
        for slot in &mut self.stack[first_free..top] {
            *slot = TValue::nil();
        }

        let prev = self.call_stack.len().checked_sub(1);
        log::trace!(
            "enter {}:{} at depth {}",
            p.source,
            p.line_defined,
            self.call_stack.len()
        );
        self.call_stack
            .push(CallInfo::new_lua(cl, func_idx, base, top, nresults, prev));
        self.top = top;
        Ok(())
    }

    /// Move the fixed parameters of a vararg call above the actual
    /// arguments, leaving the extra arguments below the new base.
    fn adjust_varargs(&mut self, num_params: usize, nargs: usize) -> usize {
        let fixed = self.top - nargs;
        let base = self.top;
        for i in 0..num_params {
            self.stack[base + i] = if i < nargs {
                std::mem::take(&mut self.stack[fixed + i])
            } else {
                TValue::nil()
            };
        }
        base
    }

    fn call_native(
        &mut self,
        nf: &Rc<NativeFunction>,
        func_idx: usize,
        nresults: i32,
    ) -> Result<(), LuaError> {
        if self.call_stack.len() >= self.config.max_call_depth {
            return Err(LuaError::new(ErrorKind::StackOverflow));
        }
        let args = self.stack[func_idx + 1..self.top].to_vec();
        let prev = self.call_stack.len().checked_sub(1);
        self.call_stack
            .push(CallInfo::new_native(func_idx, self.top, nresults, prev));

        // On error the frame stays so the traceback can show it
        let results = {
            let mut ctx = NativeContext::new(args, self);
            (nf.func)(&mut ctx)?
        };
        self.call_stack.pop();
        self.poscall_values(func_idx, results, nresults)
    }

    /// Store native results at `res`, adjusted to `wanted`.
    fn poscall_values(
        &mut self,
        res: usize,
        values: Vec<TValue>,
        wanted: i32,
    ) -> Result<(), LuaError> {
        let count = if wanted < 0 {
            values.len()
        } else {
            wanted as usize
        };
        self.ensure_stack(res + count)?;
        let mut values = values.into_iter();
        for slot in &mut self.stack[res..res + count] {
            *slot = values.next().unwrap_or_default();
        }
        self.top = res + count;
        Ok(())
    }

    /// Finish the current Lua frame: move `n` results starting at `first`
    /// to the frame's function slot and pop it. Returns the number of
    /// results the caller wanted.
    pub(crate) fn poscall(&mut self, first: usize, n: usize) -> Result<i32, LuaError> {
        let ci = self
            .call_stack
            .pop()
            .ok_or_else(|| LuaError::internal("return without an active frame"))?;
        let res = ci.func_idx;
        let wanted = ci.num_results;
        let count = if wanted < 0 { n } else { wanted as usize };
        self.ensure_stack(res + count)?;
        for i in 0..count {
            self.stack[res + i] = if i < n {
                self.stack[first + i].clone()
            } else {
                TValue::nil()
            };
        }
        self.top = res + count;
        log::trace!("return {n} values to depth {}", self.call_stack.len());
        Ok(wanted)
    }

    /// Call the value at `func_idx` with arguments up to `top`, running Lua
    /// code to completion. Results land at `func_idx`.
    pub(crate) fn call_at(&mut self, func_idx: usize, nresults: i32) -> Result<(), LuaError> {
        let here = stack_marker();
        if self.native_depth == 0 {
            self.native_stack_base = here;
        }
        self.native_depth += 1;
        let stack_used = here.abs_diff(self.native_stack_base);
        let result = if self.native_depth > self.config.max_native_depth
            || stack_used > self.config.max_native_stack
        {
            log::debug!(
                "native re-entry refused at depth {} ({stack_used} bytes of stack)",
                self.native_depth
            );
            Err(LuaError::new(ErrorKind::CStackOverflow))
        } else {
            self.call_at_inner(func_idx, nresults)
        };
        self.native_depth -= 1;
        result
    }

    fn call_at_inner(&mut self, func_idx: usize, nresults: i32) -> Result<(), LuaError> {
        if self.precall(func_idx, nresults)? {
            if let Some(ci) = self.call_stack.last_mut() {
                ci.set_fresh(true);
            }
            dispatch::execute(self)?;
        }
        Ok(())
    }

    /// Call any value from outside the dispatch loop. `nresults` of -1
    /// returns every result. On error the frames entered by this call are
    /// discarded and the stack is restored.
    pub(crate) fn call_value(
        &mut self,
        func: &TValue,
        args: Vec<TValue>,
        nresults: i32,
    ) -> Result<Vec<TValue>, LuaError> {
        let entry_depth = self.call_stack.len();
        let saved_top = self.top;
        let func_idx = match self.call_stack.last() {
            Some(ci) => self.top.max(ci.top),
            None => self.top,
        };

        let result = self.push_and_call(func_idx, func, args, nresults);
        match result {
            Ok(()) => {
                let results = self.stack[func_idx..self.top].to_vec();
                self.top = saved_top;
                Ok(results)
            }
            Err(mut e) => {
                if e.traceback.is_none() {
                    e.traceback = Some(self.snapshot_frames());
                }
                self.close_upvalues(func_idx);
                self.call_stack.truncate(entry_depth);
                self.top = saved_top;
                log::debug!("call unwound to depth {entry_depth}: {e}");
                Err(e)
            }
        }
    }

    fn push_and_call(
        &mut self,
        func_idx: usize,
        func: &TValue,
        args: Vec<TValue>,
        nresults: i32,
    ) -> Result<(), LuaError> {
        self.ensure_stack(func_idx + 1 + args.len())?;
        self.stack[func_idx] = func.clone();
        let nargs = args.len();
        for (slot, arg) in self.stack[func_idx + 1..].iter_mut().zip(args) {
            *slot = arg;
        }
        self.top = func_idx + 1 + nargs;
        self.call_at(func_idx, nresults)
    }

    // ---- Upvalues ----

    /// Find or create an open upvalue for the given stack index.
    pub fn find_or_create_open_upval(&mut self, stack_idx: usize) -> UpValRef {
        match self
            .open_upvals
            .binary_search_by_key(&stack_idx, |(slot, _)| *slot)
        {
            Ok(i) => self.open_upvals[i].1.clone(),
            Err(i) => {
                let uv = UpVal::open(stack_idx);
                self.open_upvals.insert(i, (stack_idx, uv.clone()));
                uv
            }
        }
    }

    /// Close all open upvalues at or above the given level.
    pub fn close_upvalues(&mut self, level: usize) {
        let first = self.open_upvals.partition_point(|(slot, _)| *slot < level);
        for (_, uv) in self.open_upvals.drain(first..) {
            uv.borrow_mut().close(&self.stack);
        }
    }

    // ---- Loading ----

    /// Check a prototype and wrap it in a closure whose first upvalue is the
    /// globals table.
    pub fn load(&mut self, proto: impl Into<Rc<Proto>>) -> Result<TValue, LuaError> {
        let proto = proto.into();
        verify_proto(&proto)?;
        let upvalues = (0..proto.upvalues.len())
            .map(|i| {
                if i == 0 {
                    UpVal::closed(TValue::Table(self.runtime.globals.clone()))
                } else {
                    UpVal::closed(TValue::nil())
                }
            })
            .collect();
        log::debug!("loaded chunk {}", proto.source);
        Ok(TValue::from_closure(LuaClosure::new(proto, upvalues)))
    }

    /// Load and run a main chunk, returning all its results.
    pub fn run(&mut self, proto: impl Into<Rc<Proto>>) -> Result<Vec<TValue>, LuaError> {
        let main = self.load(proto)?;
        self.call(&main, vec![])
    }

    // ---- Public call API ----

    /// Call `func` and return all of its results.
    pub fn call(&mut self, func: &TValue, args: Vec<TValue>) -> Result<Vec<TValue>, LuaError> {
        self.call_value(func, args, -1)
    }

    /// Call `func`, discarding results.
    pub fn call0(&mut self, func: &TValue, args: Vec<TValue>) -> Result<(), LuaError> {
        self.call_value(func, args, 0).map(|_| ())
    }

    /// Call `func` and return its first result (nil if none).
    pub fn call1(&mut self, func: &TValue, args: Vec<TValue>) -> Result<TValue, LuaError> {
        let mut results = self.call_value(func, args, 1)?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Call `func` and return exactly `n` results, nil-padded.
    pub fn call_n(
        &mut self,
        func: &TValue,
        args: Vec<TValue>,
        n: usize,
    ) -> Result<Vec<TValue>, LuaError> {
        let n = i32::try_from(n).map_err(|_| LuaError::internal("result count out of range"))?;
        self.call_value(func, args, n)
    }

    // ---- Globals and metatables ----

    pub fn globals(&self) -> TableRef {
        self.runtime.globals.clone()
    }

    pub fn set_global(&mut self, name: &str, value: TValue) {
        self.runtime
            .globals
            .borrow_mut()
            .raw_set_str(LuaStr::from(name), value);
    }

    pub fn global(&self, name: &str) -> TValue {
        self.runtime.globals.borrow().raw_get_str(&LuaStr::from(name))
    }

    /// Expose a host function as a global.
    pub fn register(
        &mut self,
        name: &str,
        func: impl Fn(&mut NativeContext<'_>) -> Result<Vec<TValue>, LuaError> + 'static,
    ) {
        let f = TValue::from_native(NativeFunction::new(name, func));
        self.set_global(name, f);
    }

    pub fn metatable(&self, v: &TValue) -> Option<TableRef> {
        metatable_of(&self.runtime, v)
    }

    /// Tables and host values carry their own metatable; every other kind
    /// shares one per kind.
    pub fn set_metatable(&mut self, v: &TValue, mt: Option<TableRef>) {
        match v {
            TValue::Table(t) => t.borrow_mut().metatable = mt,
            TValue::Host(h) => h.set_metatable(mt),
            _ => {
                let kind = v.kind();
                match mt {
                    Some(mt) => {
                        self.runtime.type_metatables.insert(kind, mt);
                    }
                    None => {
                        self.runtime.type_metatables.remove(&kind);
                    }
                }
            }
        }
    }

    /// Reset the instruction budget.
    pub fn set_instruction_budget(&mut self, budget: Option<u64>) {
        self.budget = budget;
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Frames of the active call chain, innermost first.
    pub fn callers(&self) -> Vec<FrameSnapshot> {
        self.snapshot_frames()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Address of a local in a fresh Rust frame. Differences between two
/// markers measure the stack used by the frames in between.
#[inline(never)]
fn stack_marker() -> usize {
    let marker = 0u8;
    std::hint::black_box(std::ptr::addr_of!(marker)) as usize
}

/// Reject bytecode the dispatch loop cannot run safely: unknown opcodes,
/// out-of-range constants, prototypes, upvalues, registers or jumps.
fn verify_proto(p: &Proto) -> Result<(), LuaError> {
    let bad = |pc: usize, what: &str| {
        LuaError::internal(format!("malformed bytecode in {}: {what} at pc {pc}", p.source))
    };
    let nk = p.constants.len();
    let nregs = p.max_stack_size as usize;
    let code_len = p.code.len();
    let reg_ok = |r: u32| (r as usize) < nregs;
    let rk_ok = |x: u32| if is_k(x) { index_k(x) < nk } else { reg_ok(x) };
    let upval_ok = |u: u32| (u as usize) < p.upvalues.len();
    let next_is_extra = |pc: usize| {
        p.code
            .get(pc + 1)
            .and_then(Instruction::opcode)
            .is_some_and(|op| op == OpCode::ExtraArg)
    };

    if p.num_params as usize > nregs {
        return Err(LuaError::internal(format!(
            "malformed bytecode in {}: {} parameters in a {}-register frame",
            p.source, p.num_params, nregs
        )));
    }
    for (pc, inst) in p.code.iter().enumerate() {
        let op = inst
            .opcode()
            .ok_or_else(|| bad(pc, &format!("invalid opcode {}", inst.0 & 0x3f)))?;
        let (a, b, c) = (inst.a(), inst.b(), inst.c());
        let ok = match op {
            OpCode::Move => reg_ok(a) && reg_ok(b),
            OpCode::LoadK => reg_ok(a) && (inst.bx() as usize) < nk,
            OpCode::LoadKX => {
                reg_ok(a)
                    && next_is_extra(pc)
                    && (p.code[pc + 1].ax_field() as usize) < nk
            }
            OpCode::LoadBool => reg_ok(a),
            OpCode::LoadNil => (a as usize + b as usize) < nregs,
            OpCode::GetUpval => reg_ok(a) && upval_ok(b),
            OpCode::GetTabUp => reg_ok(a) && upval_ok(b) && rk_ok(c),
            OpCode::GetTable => reg_ok(a) && reg_ok(b) && rk_ok(c),
            OpCode::SetTabUp => upval_ok(a) && rk_ok(b) && rk_ok(c),
            OpCode::SetUpval => reg_ok(a) && upval_ok(b),
            OpCode::SetTable => reg_ok(a) && rk_ok(b) && rk_ok(c),
            OpCode::NewTable => reg_ok(a),
            OpCode::Self_ => (a as usize + 1) < nregs && reg_ok(b) && rk_ok(c),
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Div
            | OpCode::IDiv
            | OpCode::BAnd
            | OpCode::BOr
            | OpCode::BXor
            | OpCode::Shl
            | OpCode::Shr => reg_ok(a) && rk_ok(b) && rk_ok(c),
            OpCode::Unm | OpCode::BNot | OpCode::Not | OpCode::Len => reg_ok(a) && reg_ok(b),
            OpCode::Concat => reg_ok(a) && b <= c && reg_ok(c),
            OpCode::Eq | OpCode::Lt | OpCode::Le => rk_ok(b) && rk_ok(c),
            OpCode::Test => reg_ok(a),
            OpCode::TestSet => reg_ok(a) && reg_ok(b),
            OpCode::Call | OpCode::TailCall | OpCode::Return => {
                reg_ok(a) && (b == 0 || (a as usize + b as usize) <= nregs)
            }
            OpCode::ForLoop | OpCode::ForPrep => (a as usize + 3) < nregs,
            OpCode::TForCall => (a as usize + 3 + (c as usize).max(1)) <= nregs,
            OpCode::TForLoop => (a as usize + 1) < nregs,
            OpCode::SetList => {
                (b == 0 || (a as usize + b as usize) < nregs) && (c != 0 || next_is_extra(pc))
            }
            OpCode::Closure => {
                reg_ok(a)
                    && p.protos.get(inst.bx() as usize).is_some_and(|child| {
                        child.upvalues.iter().all(|uv| {
                            if uv.in_stack {
                                (uv.index as usize) < nregs
                            } else {
                                (uv.index as usize) < p.upvalues.len()
                            }
                        })
                    })
            }
            OpCode::VarArg => reg_ok(a) && (b == 0 || (a as usize + b as usize) <= nregs),
            OpCode::Jmp => true,
            OpCode::ExtraArg => true,
        };
        if !ok {
            return Err(bad(pc, &format!("operand out of range for {}", op.name())));
        }
        if matches!(
            op,
            OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop
        ) {
            let target = pc as i64 + 1 + inst.sbx() as i64;
            if target < 0 || target as usize > code_len {
                return Err(bad(pc, "jump out of range"));
            }
        }
    }
    for child in &p.protos {
        verify_proto(child)?;
    }
    Ok(())
}

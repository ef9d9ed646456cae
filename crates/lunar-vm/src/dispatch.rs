//! Main bytecode dispatch loop.

use crate::arith::ArithOp;
use crate::coerce::for_limit;
use crate::debug::Origin;
use crate::vm::Vm;
use lunar_bytecode::opcode::{fb2int, index_k, is_k, OpCode};
use lunar_bytecode::proto::Constant;
use lunar_core::closure::{Function, LuaClosure, UpValRef};
use lunar_core::error::{ErrorKind, LuaError};
use lunar_core::table::Table;
use lunar_core::value::TValue;

/// Run the innermost frame (a fresh Lua frame) until it returns. Errors
/// raised by the running Lua function get its source position.
pub(crate) fn execute(vm: &mut Vm) -> Result<(), LuaError> {
    run(vm).map_err(|e| vm.annotate(e))
}

/// Value of an RK operand.
#[inline]
fn rk(vm: &Vm, base: usize, k: &[Constant], x: u32) -> TValue {
    if is_k(x) {
        TValue::from_constant(&k[index_k(x)])
    } else {
        vm.stack[base + x as usize].clone()
    }
}

#[inline]
fn jump(vm: &mut Vm, ci_idx: usize, sbx: i32) {
    let pc = &mut vm.call_stack[ci_idx].pc;
    *pc = (*pc as i64 + sbx as i64) as usize;
}

fn arith_op_of(op: OpCode) -> Option<ArithOp> {
    Some(match op {
        OpCode::Add => ArithOp::Add,
        OpCode::Sub => ArithOp::Sub,
        OpCode::Mul => ArithOp::Mul,
        OpCode::Mod => ArithOp::Mod,
        OpCode::Pow => ArithOp::Pow,
        OpCode::Div => ArithOp::Div,
        OpCode::IDiv => ArithOp::IDiv,
        OpCode::BAnd => ArithOp::BAnd,
        OpCode::BOr => ArithOp::BOr,
        OpCode::BXor => ArithOp::BXor,
        OpCode::Shl => ArithOp::Shl,
        OpCode::Shr => ArithOp::Shr,
        OpCode::Unm => ArithOp::Unm,
        OpCode::BNot => ArithOp::BNot,
        _ => return None,
    })
}

fn run(vm: &mut Vm) -> Result<(), LuaError> {
    'newframe: loop {
        let ci_idx = vm
            .call_stack
            .len()
            .checked_sub(1)
            .ok_or_else(|| LuaError::internal("dispatch without an active frame"))?;
        let cl = vm.call_stack[ci_idx]
            .closure
            .clone()
            .ok_or_else(|| LuaError::internal("dispatch on a native frame"))?;
        let base = vm.call_stack[ci_idx].base;
        let proto = &cl.proto;
        let k = proto.constants.as_slice();

        loop {
            let pc = vm.call_stack[ci_idx].pc;
            let inst = *proto
                .code
                .get(pc)
                .ok_or_else(|| LuaError::internal(format!("pc {pc} out of range")))?;
            vm.call_stack[ci_idx].pc += 1;

            if let Some(budget) = vm.budget.as_mut() {
                if *budget == 0 {
                    return Err(LuaError::new(ErrorKind::BudgetExhausted));
                }
                *budget -= 1;
            }

            let op = inst
                .opcode()
                .ok_or_else(|| LuaError::internal(format!("invalid opcode {}", inst.0 & 0x3f)))?;
            let a = inst.a() as usize;
            let ra = base + a;

            match op {
                OpCode::Move => {
                    let b = inst.b() as usize;
                    vm.stack[ra] = vm.stack[base + b].clone();
                }

                OpCode::LoadK => {
                    vm.stack[ra] = TValue::from_constant(&k[inst.bx() as usize]);
                }

                OpCode::LoadKX => {
                    let next = proto.code[vm.call_stack[ci_idx].pc];
                    vm.call_stack[ci_idx].pc += 1;
                    vm.stack[ra] = TValue::from_constant(&k[next.ax_field() as usize]);
                }

                OpCode::LoadBool => {
                    vm.stack[ra] = TValue::from_bool(inst.b() != 0);
                    if inst.c() != 0 {
                        vm.call_stack[ci_idx].pc += 1;
                    }
                }

                OpCode::LoadNil => {
                    let b = inst.b() as usize;
                    for slot in &mut vm.stack[ra..=ra + b] {
                        *slot = TValue::nil();
                    }
                }

                OpCode::GetUpval => {
                    let v = cl.upvalues[inst.b() as usize].borrow().get(&vm.stack);
                    vm.stack[ra] = v;
                }

                OpCode::SetUpval => {
                    let v = vm.stack[ra].clone();
                    cl.upvalues[inst.b() as usize]
                        .borrow_mut()
                        .set(&mut vm.stack, v);
                }

                // ---- Tables ----
                OpCode::GetTabUp => {
                    let b = inst.b() as usize;
                    let t = cl.upvalues[b].borrow().get(&vm.stack);
                    let key = rk(vm, base, k, inst.c());
                    let v = vm.index_with(&t, &key, Origin::Upval(b))?;
                    vm.stack[ra] = v;
                }

                OpCode::GetTable => {
                    let b = inst.b() as usize;
                    let t = vm.stack[base + b].clone();
                    let key = rk(vm, base, k, inst.c());
                    let v = vm.index_with(&t, &key, Origin::Reg(b))?;
                    vm.stack[ra] = v;
                }

                OpCode::SetTabUp => {
                    let t = cl.upvalues[a].borrow().get(&vm.stack);
                    let key = rk(vm, base, k, inst.b());
                    let v = rk(vm, base, k, inst.c());
                    vm.set_index_with(&t, key, v, Origin::Upval(a))?;
                }

                OpCode::SetTable => {
                    let t = vm.stack[ra].clone();
                    let key = rk(vm, base, k, inst.b());
                    let v = rk(vm, base, k, inst.c());
                    vm.set_index_with(&t, key, v, Origin::Reg(a))?;
                }

                OpCode::NewTable => {
                    let t = Table::new(fb2int(inst.b()), fb2int(inst.c()));
                    vm.stack[ra] = TValue::from_table(t);
                }

                OpCode::Self_ => {
                    let b = inst.b() as usize;
                    let obj = vm.stack[base + b].clone();
                    let key = rk(vm, base, k, inst.c());
                    vm.stack[ra + 1] = obj.clone();
                    let v = vm.index_with(&obj, &key, Origin::Reg(b))?;
                    vm.stack[ra] = v;
                }

                // ---- Operators ----
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
                | OpCode::Shr => {
                    let (b, c) = (inst.b(), inst.c());
                    let vb = rk(vm, base, k, b);
                    let vc = rk(vm, base, k, c);
                    let aop = arith_op_of(op)
                        .ok_or_else(|| LuaError::internal("arithmetic opcode without operator"))?;
                    let v = vm.arith_with(aop, &vb, &vc, Origin::rk(b), Origin::rk(c))?;
                    vm.stack[ra] = v;
                }

                OpCode::Unm | OpCode::BNot => {
                    let b = inst.b() as usize;
                    let vb = vm.stack[base + b].clone();
                    let aop = if op == OpCode::Unm {
                        ArithOp::Unm
                    } else {
                        ArithOp::BNot
                    };
                    let v = vm.arith_with(aop, &vb, &vb, Origin::Reg(b), Origin::Reg(b))?;
                    vm.stack[ra] = v;
                }

                OpCode::Not => {
                    let falsy = vm.stack[base + inst.b() as usize].is_falsy();
                    vm.stack[ra] = TValue::from_bool(falsy);
                }

                OpCode::Len => {
                    let b = inst.b() as usize;
                    let vb = vm.stack[base + b].clone();
                    let v = vm.length_with(&vb, Origin::Reg(b))?;
                    vm.stack[ra] = v;
                }

                OpCode::Concat => {
                    let (b, c) = (inst.b() as usize, inst.c() as usize);
                    let values = vm.stack[base + b..=base + c].to_vec();
                    let v = vm.concat_with(values, |i| Origin::Reg(b + i))?;
                    vm.stack[ra] = v;
                }

                // ---- Control ----
                OpCode::Jmp => {
                    if a != 0 {
                        vm.close_upvalues(base + a - 1);
                    }
                    jump(vm, ci_idx, inst.sbx());
                }

                OpCode::Eq | OpCode::Lt | OpCode::Le => {
                    let vb = rk(vm, base, k, inst.b());
                    let vc = rk(vm, base, k, inst.c());
                    let res = match op {
                        OpCode::Eq => vm.equals(&vb, &vc)?,
                        OpCode::Lt => vm.less_than(&vb, &vc)?,
                        _ => vm.less_equal(&vb, &vc)?,
                    };
                    if res != (a != 0) {
                        vm.call_stack[ci_idx].pc += 1;
                    }
                }

                OpCode::Test => {
                    if vm.stack[ra].is_truthy() != (inst.c() != 0) {
                        vm.call_stack[ci_idx].pc += 1;
                    }
                }

                OpCode::TestSet => {
                    let vb = vm.stack[base + inst.b() as usize].clone();
                    if vb.is_truthy() == (inst.c() != 0) {
                        vm.stack[ra] = vb;
                    } else {
                        vm.call_stack[ci_idx].pc += 1;
                    }
                }

                OpCode::ForPrep => {
                    for_prep(vm, ra)?;
                    jump(vm, ci_idx, inst.sbx());
                }

                OpCode::ForLoop => {
                    if for_loop(vm, ra)? {
                        jump(vm, ci_idx, inst.sbx());
                    }
                }

                OpCode::TForCall => {
                    let cb = ra + 3;
                    vm.ensure_stack(cb + 3)?;
                    for i in 0..3 {
                        vm.stack[cb + i] = vm.stack[ra + i].clone();
                    }
                    vm.top = cb + 3;
                    vm.call_at(cb, inst.c() as i32)?;
                    vm.top = vm.call_stack[ci_idx].top;
                }

                OpCode::TForLoop => {
                    if !vm.stack[ra + 1].is_nil() {
                        vm.stack[ra] = vm.stack[ra + 1].clone();
                        jump(vm, ci_idx, inst.sbx());
                    }
                }

                // ---- Calls ----
                OpCode::Call => {
                    let b = inst.b() as usize;
                    let nresults = inst.c() as i32 - 1;
                    if b != 0 {
                        vm.top = ra + b;
                    }
                    if vm.precall(ra, nresults)? {
                        continue 'newframe;
                    }
                    if nresults >= 0 {
                        vm.top = vm.call_stack[ci_idx].top;
                    }
                }

                OpCode::TailCall => {
                    let b = inst.b() as usize;
                    if b != 0 {
                        vm.top = ra + b;
                    }
                    vm.resolve_call_handler(ra)?;
                    if matches!(vm.stack[ra], TValue::Function(Function::Lua(_))) {
                        tail_call(vm, ci_idx, ra)?;
                        continue 'newframe;
                    }
                    // A native callee runs now; the RETURN after this
                    // instruction hands its results on
                    vm.precall(ra, -1)?;
                }

                OpCode::Return => {
                    let b = inst.b() as usize;
                    let n = if b != 0 { b - 1 } else { vm.top - ra };
                    vm.close_upvalues(base);
                    let fresh = vm.call_stack[ci_idx].is_fresh();
                    let wanted = vm.poscall(ra, n)?;
                    if fresh {
                        return Ok(());
                    }
                    if wanted >= 0 {
                        if let Some(caller) = vm.call_stack.last() {
                            vm.top = caller.top;
                        }
                    }
                    continue 'newframe;
                }

                OpCode::VarArg => {
                    let b = inst.b() as usize;
                    let func_idx = vm.call_stack[ci_idx].func_idx;
                    let n = (base - func_idx - 1).saturating_sub(proto.num_params as usize);
                    let wanted = if b == 0 {
                        vm.ensure_stack(ra + n)?;
                        vm.top = ra + n;
                        n
                    } else {
                        b - 1
                    };
                    for i in 0..wanted {
                        vm.stack[ra + i] = if i < n {
                            vm.stack[base - n + i].clone()
                        } else {
                            TValue::nil()
                        };
                    }
                }

                OpCode::SetList => {
                    let b = inst.b() as usize;
                    let n = if b == 0 { vm.top - ra - 1 } else { b };
                    let mut c = inst.c() as usize;
                    if c == 0 {
                        let next = proto.code[vm.call_stack[ci_idx].pc];
                        vm.call_stack[ci_idx].pc += 1;
                        c = next.ax_field() as usize;
                    }
                    let TValue::Table(t) = &vm.stack[ra] else {
                        return Err(LuaError::internal("SETLIST target is not a table"));
                    };
                    let t = t.clone();
                    let first = (c.saturating_sub(1) * vm.config.fields_per_flush) as i64;
                    let mut t = t.borrow_mut();
                    for i in 1..=n {
                        t.raw_seti(first + i as i64, vm.stack[ra + i].clone());
                    }
                    drop(t);
                    vm.top = vm.call_stack[ci_idx].top;
                }

                OpCode::Closure => {
                    let p = proto.protos[inst.bx() as usize].clone();
                    let upvalues: Vec<UpValRef> = p
                        .upvalues
                        .iter()
                        .map(|uv| {
                            if uv.in_stack {
                                vm.find_or_create_open_upval(base + uv.index as usize)
                            } else {
                                cl.upvalues[uv.index as usize].clone()
                            }
                        })
                        .collect();
                    vm.stack[ra] = TValue::from_closure(LuaClosure::new(p, upvalues));
                }

                OpCode::ExtraArg => {
                    return Err(LuaError::internal("EXTRAARG executed"));
                }
            }
        }
    }
}

/// Replace the current frame by a call of the Lua function at `func_idx`,
/// whose arguments run up to `top`.
fn tail_call(vm: &mut Vm, ci_idx: usize, func_idx: usize) -> Result<(), LuaError> {
    let ci = &vm.call_stack[ci_idx];
    let (dest, base, nresults, fresh) = (ci.func_idx, ci.base, ci.num_results, ci.is_fresh());
    vm.close_upvalues(base);
    let len = vm.top - func_idx;
    for i in 0..len {
        vm.stack[dest + i] = std::mem::take(&mut vm.stack[func_idx + i]);
    }
    vm.top = dest + len;
    vm.call_stack.pop();
    log::trace!("tail call spliced at depth {}", vm.call_stack.len());
    if vm.precall(dest, nresults)? {
        if let Some(ci) = vm.call_stack.last_mut() {
            ci.set_is_tail_call(true);
            ci.set_fresh(fresh);
        }
    }
    Ok(())
}

fn for_error(what: &str) -> LuaError {
    LuaError::runtime(format!("'for' {what} must be a number"))
}

/// Prepare a numeric for loop at `ra` (index, limit, step). An integer loop
/// needs an integer start and step and a limit that converts; anything else
/// runs on floats.
fn for_prep(vm: &mut Vm, ra: usize) -> Result<(), LuaError> {
    let init = &vm.stack[ra];
    let limit = &vm.stack[ra + 1];
    let step = &vm.stack[ra + 2];
    if let (TValue::Integer(init), TValue::Integer(step)) = (init, step) {
        if let Some((ilimit, skip)) = for_limit(limit, *step) {
            let (init, step) = (if skip { 0 } else { *init }, *step);
            vm.stack[ra + 1] = TValue::from_integer(ilimit);
            vm.stack[ra] = TValue::from_integer(init.wrapping_sub(step));
            return Ok(());
        }
    }
    let nlimit = limit.to_float().ok_or_else(|| for_error("limit"))?;
    let nstep = step.to_float().ok_or_else(|| for_error("step"))?;
    let ninit = init.to_float().ok_or_else(|| for_error("initial value"))?;
    vm.stack[ra] = TValue::from_float(ninit - nstep);
    vm.stack[ra + 1] = TValue::from_float(nlimit);
    vm.stack[ra + 2] = TValue::from_float(nstep);
    Ok(())
}

/// Advance a numeric for loop. Returns whether the body runs again.
fn for_loop(vm: &mut Vm, ra: usize) -> Result<bool, LuaError> {
    let next = match (&vm.stack[ra], &vm.stack[ra + 1], &vm.stack[ra + 2]) {
        (TValue::Integer(idx), TValue::Integer(limit), TValue::Integer(step)) => {
            let idx = idx.wrapping_add(*step);
            let more = if *step > 0 { idx <= *limit } else { *limit <= idx };
            more.then(|| TValue::from_integer(idx))
        }
        (idx, limit, step) => {
            let (Some(idx), Some(limit), Some(step)) =
                (idx.as_number(), limit.as_number(), step.as_number())
            else {
                return Err(LuaError::internal("FORLOOP on unprepared loop state"));
            };
            let idx = idx + step;
            let more = if step > 0.0 { idx <= limit } else { limit <= idx };
            more.then(|| TValue::from_float(idx))
        }
    };
    match next {
        Some(v) => {
            vm.stack[ra] = v.clone();
            vm.stack[ra + 3] = v;
            Ok(true)
        }
        None => Ok(false),
    }
}

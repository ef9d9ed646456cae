use super::helpers::*;
use lunar_bytecode::opcode::OpCode;
use lunar_vm::TValue;

/// `x = x + 1` on upvalue 0.
fn incrementer() -> Asm {
    let mut f = Asm::function(0, 2);
    f.upvalue("x", true, 0);
    f.abc(OpCode::GetUpval, 0, 0, 0);
    let one = f.rki(1);
    f.abc(OpCode::Add, 0, 0, one);
    f.abc(OpCode::SetUpval, 0, 0, 0);
    f.abc(OpCode::Return, 0, 1, 0);
    f
}

#[test]
fn test_shared_open_upvalue() {
    // local x = 0
    // local function inc() x = x + 1 end
    // local function get() return x end
    // inc(); inc(); return get(), x
    let mut get = Asm::function(0, 3);
    get.upvalue("x", true, 0);
    get.abc(OpCode::GetUpval, 0, 0, 0);
    get.abc(OpCode::Return, 0, 2, 0);

    let mut asm = Asm::main();
    asm.load_int(0, 0);
    asm.closure(1, incrementer());
    asm.closure(2, get);
    for _ in 0..2 {
        asm.abc(OpCode::Move, 3, 1, 0);
        asm.abc(OpCode::Call, 3, 1, 1);
    }
    asm.abc(OpCode::Move, 3, 2, 0);
    asm.abc(OpCode::Call, 3, 1, 2);
    asm.abc(OpCode::Move, 4, 0, 0);
    asm.abc(OpCode::Return, 3, 3, 0);
    run_check_ints(asm.finish(), &[2, 2]);
}

#[test]
fn test_closed_upvalues_are_per_call() {
    // local function make() local n = 0; return function() n = n + 1; return n end end
    // local c1, c2 = make(), make()
    // c1(); c1(); return c1(), c2()
    let mut counter = Asm::function(0, 2);
    counter.upvalue("n", true, 0);
    counter.abc(OpCode::GetUpval, 0, 0, 0);
    let one = counter.rki(1);
    counter.abc(OpCode::Add, 0, 0, one);
    counter.abc(OpCode::SetUpval, 0, 0, 0);
    counter.abc(OpCode::Return, 0, 2, 0);

    let mut make = Asm::function(0, 1);
    make.load_int(0, 0);
    make.closure(1, counter);
    make.abc(OpCode::Return, 1, 2, 0);

    let mut asm = Asm::main();
    asm.closure(0, make);
    asm.abc(OpCode::Move, 1, 0, 0);
    asm.abc(OpCode::Call, 1, 1, 2);
    asm.abc(OpCode::Move, 2, 0, 0);
    asm.abc(OpCode::Call, 2, 1, 2);
    for _ in 0..2 {
        asm.abc(OpCode::Move, 3, 1, 0);
        asm.abc(OpCode::Call, 3, 1, 1);
    }
    asm.abc(OpCode::Move, 3, 1, 0);
    asm.abc(OpCode::Call, 3, 1, 2);
    asm.abc(OpCode::Move, 4, 2, 0);
    asm.abc(OpCode::Call, 4, 1, 2);
    asm.abc(OpCode::Return, 3, 3, 0);
    run_check_ints(asm.finish(), &[3, 1]);
}

#[test]
fn test_loop_body_upvalues_closed_by_jmp() {
    // local fs = {}
    // for i = 1, 3 do local j = i; fs[i] = function() return j end end
    // return fs[1](), fs[3]()
    let mut getj = Asm::function(0, 2);
    getj.upvalue("j", true, 5);
    getj.abc(OpCode::GetUpval, 0, 0, 0);
    getj.abc(OpCode::Return, 0, 2, 0);

    let mut asm = Asm::main();
    asm.abc(OpCode::NewTable, 0, 0, 0);
    asm.load_int(1, 1);
    asm.load_int(2, 3);
    asm.load_int(3, 1);
    let prep = asm.asbx(OpCode::ForPrep, 1, 0);
    let body = asm.here();
    asm.abc(OpCode::Move, 5, 4, 0);
    asm.closure(6, getj);
    asm.abc(OpCode::SetTable, 0, 4, 6);
    asm.asbx(OpCode::Jmp, 6, 0);
    asm.patch_to_here(prep);
    let forloop = asm.here();
    asm.asbx(OpCode::ForLoop, 1, body as i32 - forloop as i32 - 1);
    let k1 = asm.rki(1);
    let k3 = asm.rki(3);
    asm.abc(OpCode::GetTable, 1, 0, k1);
    asm.abc(OpCode::Call, 1, 1, 2);
    asm.abc(OpCode::GetTable, 2, 0, k3);
    asm.abc(OpCode::Call, 2, 1, 2);
    asm.abc(OpCode::Return, 1, 3, 0);
    run_check_ints(asm.finish(), &[1, 3]);
}

#[test]
fn test_nested_closure_inherits_upvalue() {
    // local x = 10
    // local function outer() return function() x = x + 1; return x end end
    // local inner = outer(); inner(); return x
    let mut inner = Asm::function(0, 3);
    inner.upvalue("x", false, 0);
    inner.abc(OpCode::GetUpval, 0, 0, 0);
    let one = inner.rki(1);
    inner.abc(OpCode::Add, 0, 0, one);
    inner.abc(OpCode::SetUpval, 0, 0, 0);
    inner.abc(OpCode::Return, 0, 2, 0);

    let mut outer = Asm::function(0, 2);
    outer.upvalue("x", true, 0);
    outer.closure(0, inner);
    outer.abc(OpCode::Return, 0, 2, 0);

    let mut asm = Asm::main();
    asm.load_int(0, 10);
    asm.closure(1, outer);
    asm.abc(OpCode::Call, 1, 1, 2);
    asm.abc(OpCode::Call, 1, 1, 2);
    asm.abc(OpCode::Move, 2, 0, 0);
    asm.abc(OpCode::Return, 1, 3, 0);
    run_check_ints(asm.finish(), &[11, 11]);
}

/// `function() return v end` over the enclosing function's register 0.
fn reader(line: u32) -> Asm {
    let mut f = Asm::function(0, line);
    f.upvalue("v", true, 0);
    f.abc(OpCode::GetUpval, 0, 0, 0);
    f.abc(OpCode::Return, 0, 2, 0);
    f
}

#[test]
fn test_tail_call_closes_caller_upvalues() {
    // local function id(f) local a, b, c = 100, 100, 100; return f end
    // local function make() local v = 5; return id(function() return v end) end
    // return make()()
    let mut id = Asm::function(1, 1);
    for r in 1..4 {
        id.load_int(r, 100);
    }
    id.abc(OpCode::Return, 0, 2, 0);

    let mut make = Asm::function(0, 2);
    make.upvalue("id", true, 0);
    make.load_int(0, 5);
    make.closure(1, reader(3));
    make.abc(OpCode::GetUpval, 2, 0, 0);
    make.abc(OpCode::Move, 3, 1, 0);
    make.abc(OpCode::TailCall, 2, 2, 0);
    make.abc(OpCode::Return, 2, 0, 0);

    let mut asm = Asm::main();
    asm.closure(0, id);
    asm.closure(1, make);
    asm.abc(OpCode::Call, 1, 1, 2);
    asm.abc(OpCode::Call, 1, 1, 2);
    asm.abc(OpCode::Return, 1, 2, 0);
    run_check_ints(asm.finish(), &[5]);
}

#[test]
fn test_error_unwind_closes_upvalues() {
    // local function f() local v = 5; saved = function() return v end; fail() end
    // local ok = pcall(f)
    // clobber()            -- reuses the stack f ran on
    // return ok, saved()
    let mut f = Asm::function(0, 1);
    f.upvalue("_ENV", false, 0);
    f.load_int(0, 5);
    f.closure(1, reader(2));
    f.set_global("saved", 1);
    f.get_global(2, "fail");
    f.abc(OpCode::Call, 2, 1, 1);
    f.abc(OpCode::Return, 0, 1, 0);

    let mut clobber = Asm::function(0, 5).regs(40);
    for r in 0..40 {
        clobber.load_int(r, 100);
    }
    clobber.abc(OpCode::Return, 0, 1, 0);

    let mut asm = Asm::main();
    asm.closure(0, f);
    asm.get_global(3, "pcall");
    asm.abc(OpCode::Move, 4, 0, 0);
    asm.abc(OpCode::Call, 3, 2, 2);
    asm.closure(4, clobber);
    asm.abc(OpCode::Call, 4, 1, 1);
    asm.get_global(4, "saved");
    asm.abc(OpCode::Call, 4, 1, 2);
    asm.abc(OpCode::Return, 3, 3, 0);

    let mut vm = new_vm();
    vm.register("fail", |ctx| Err(ctx.errorf("boom")));
    vm.register("pcall", |ctx| {
        let f = ctx.arg(1);
        match ctx.call(&f, vec![]) {
            Ok(mut results) => {
                results.insert(0, TValue::from_bool(true));
                Ok(results)
            }
            Err(e) => Ok(vec![TValue::from_bool(false), e.to_value()]),
        }
    });
    let r = run_on(&mut vm, asm.finish());
    assert_bool(&r, 0, false);
    assert_int(&r, 1, 5);
    assert!(vm.open_upvals.is_empty());
}

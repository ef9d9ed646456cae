use super::helpers::*;
use lunar_bytecode::opcode::OpCode;
use lunar_core::closure::NativeFunction;
use lunar_core::string::LuaStr;
use lunar_core::table::Table;
use lunar_vm::TValue;

#[test]
fn test_select_count_of_varargs() {
    // return select('#', ...)
    let mut asm = Asm::main();
    asm.get_global(0, "select");
    asm.load_str(1, "#");
    asm.abc(OpCode::VarArg, 2, 0, 0);
    asm.abc(OpCode::Call, 0, 0, 2);
    asm.abc(OpCode::Return, 0, 2, 0);

    let mut vm = new_vm();
    let main = vm.load(asm.finish()).unwrap();
    let args = (1..=3).map(TValue::from_integer).collect();
    let r = vm.call(&main, args).unwrap();
    assert_eq!(r.len(), 1);
    assert_int(&r, 0, 3);
}

#[test]
fn test_multret_call_feeds_open_call() {
    // return select('#', three())
    let mut asm = Asm::main();
    asm.get_global(0, "select");
    asm.load_str(1, "#");
    asm.get_global(2, "three");
    asm.abc(OpCode::Call, 2, 1, 0);
    asm.abc(OpCode::Call, 0, 0, 2);
    asm.abc(OpCode::Return, 0, 2, 0);

    let mut vm = new_vm();
    vm.register("three", |_| Ok((1..=3).map(TValue::from_integer).collect()));
    let r = run_on(&mut vm, asm.finish());
    assert_int(&r, 0, 3);
}

#[test]
fn test_results_are_nil_padded() {
    let mut f = Asm::function(0, 1);
    f.load_int(0, 7);
    f.abc(OpCode::Return, 0, 2, 0);

    let mut asm = Asm::main();
    asm.closure(0, f);
    asm.abc(OpCode::Call, 0, 1, 4);
    asm.abc(OpCode::Return, 0, 4, 0);
    let r = run(asm.finish());
    assert_eq!(r.len(), 3);
    assert_int(&r, 0, 7);
    assert_nil(&r, 1);
    assert_nil(&r, 2);
}

#[test]
fn test_missing_parameters_are_nil() {
    // local function f(a, b) return a, b end; return f(10)
    let mut f = Asm::function(2, 1);
    f.abc(OpCode::Return, 0, 3, 0);

    let mut asm = Asm::main();
    asm.closure(0, f);
    asm.load_int(1, 10);
    asm.abc(OpCode::Call, 0, 2, 3);
    asm.abc(OpCode::Return, 0, 3, 0);
    let r = run(asm.finish());
    assert_int(&r, 0, 10);
    assert_nil(&r, 1);
}

#[test]
fn test_vararg_function_with_fixed_parameter() {
    // local function f(a, ...) return select('#', ...), a end
    // return f("x", 1, 2)
    let mut f = Asm::function(1, 1).vararg();
    f.upvalue("_ENV", false, 0);
    f.get_global(1, "select");
    f.load_str(2, "#");
    f.abc(OpCode::VarArg, 3, 0, 0);
    f.abc(OpCode::Call, 1, 0, 2);
    f.abc(OpCode::Move, 2, 0, 0);
    f.abc(OpCode::Return, 1, 3, 0);

    let mut asm = Asm::main();
    asm.closure(0, f);
    asm.load_str(1, "x");
    asm.load_int(2, 1);
    asm.load_int(3, 2);
    asm.abc(OpCode::Call, 0, 4, 3);
    asm.abc(OpCode::Return, 0, 3, 0);
    let r = run(asm.finish());
    assert_int(&r, 0, 2);
    assert_str(&r, 1, "x");
}

#[test]
fn test_fixed_vararg_copy() {
    // local a, b, c = ...; return c, b, a
    let mut asm = Asm::main();
    asm.abc(OpCode::VarArg, 0, 4, 0);
    asm.abc(OpCode::Move, 3, 2, 0);
    asm.abc(OpCode::Move, 4, 1, 0);
    asm.abc(OpCode::Move, 5, 0, 0);
    asm.abc(OpCode::Return, 3, 4, 0);

    let mut vm = new_vm();
    let main = vm.load(asm.finish()).unwrap();
    let r = vm
        .call(&main, vec![TValue::from_integer(1), TValue::from_integer(2)])
        .unwrap();
    assert_eq!(r.len(), 3);
    assert_nil(&r, 0);
    assert_int(&r, 1, 2);
    assert_int(&r, 2, 1);
}

#[test]
fn test_call_through_metatable() {
    // return obj(5)
    let mut asm = Asm::main();
    asm.get_global(0, "obj");
    asm.load_int(1, 5);
    asm.abc(OpCode::Call, 0, 2, 0);
    asm.abc(OpCode::Return, 0, 0, 0);

    let mut vm = new_vm();
    let handler = TValue::from_native(NativeFunction::new("handler", |ctx| {
        Ok(vec![
            TValue::from_integer(ctx.arg_count() as i64),
            ctx.arg(2),
        ])
    }));
    let mt = Table::new(0, 1).into_ref();
    mt.borrow_mut().raw_set_str(LuaStr::from("__call"), handler);
    let obj = TValue::new_table();
    vm.set_metatable(&obj, Some(mt));
    vm.set_global("obj", obj);

    let r = run_on(&mut vm, asm.finish());
    assert_eq!(r.len(), 2);
    assert_int(&r, 0, 2);
    assert_int(&r, 1, 5);
}

#[test]
fn test_calling_nil_global() {
    let mut asm = Asm::main();
    asm.get_global(0, "foo");
    asm.abc(OpCode::Call, 0, 1, 1);
    asm.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(
        run_err(asm.finish()),
        "test:1: attempt to call a nil value (global 'foo')"
    );
}

#[test]
fn test_native_error_carries_caller_position() {
    let mut asm = Asm::main();
    asm.at(4);
    asm.get_global(0, "fail");
    asm.abc(OpCode::Call, 0, 1, 1);
    asm.abc(OpCode::Return, 0, 1, 0);

    let mut vm = new_vm();
    vm.register("fail", |ctx| Err(ctx.errorf("boom")));
    assert_eq!(run_err_on(&mut vm, asm.finish()), "test:4: boom");
}

#[test]
fn test_arg_error_names_global_callee() {
    let mut asm = Asm::main();
    asm.get_global(0, "needs_int");
    asm.load_str(1, "x");
    asm.abc(OpCode::Call, 0, 2, 1);
    asm.abc(OpCode::Return, 0, 1, 0);

    let mut vm = new_vm();
    vm.register("needs_int", |ctx| {
        ctx.check_integer(1)?;
        Ok(vec![])
    });
    assert_eq!(
        run_err_on(&mut vm, asm.finish()),
        "test:1: bad argument #1 to 'needs_int' (number expected, got string)"
    );
}

#[test]
fn test_method_call_renumbers_arguments() {
    // stack:push("x")
    let mut asm = Asm::main();
    asm.get_global(0, "stack");
    let push = asm.rks("push");
    asm.abc(OpCode::Self_, 0, 0, push);
    asm.load_str(2, "x");
    asm.abc(OpCode::Call, 0, 3, 1);
    asm.abc(OpCode::Return, 0, 1, 0);

    let mut vm = new_vm();
    let stack = Table::new(0, 1).into_ref();
    stack.borrow_mut().raw_set_str(
        LuaStr::from("push"),
        TValue::from_native(NativeFunction::new("push", |ctx| {
            ctx.check_table(1)?;
            ctx.check_integer(2)?;
            Ok(vec![])
        })),
    );
    vm.set_global("stack", TValue::Table(stack));
    assert_eq!(
        run_err_on(&mut vm, asm.finish()),
        "test:1: bad argument #1 to 'push' (number expected, got string)"
    );
}

#[test]
fn test_deep_recursion_overflows() {
    // local function f() return 1 + f() end
    let mut f = Asm::function(0, 1);
    f.upvalue("f", true, 0);
    f.abc(OpCode::GetUpval, 0, 0, 0);
    f.abc(OpCode::Call, 0, 1, 2);
    let one = f.rki(1);
    f.abc(OpCode::Add, 0, one, 0);
    f.abc(OpCode::Return, 0, 2, 0);

    let mut asm = Asm::main();
    asm.closure(0, f);
    asm.abc(OpCode::Call, 0, 1, 2);
    asm.abc(OpCode::Return, 0, 2, 0);

    let mut vm = lunar_vm::Vm::with_config(lunar_vm::VmConfig::default().with_max_call_depth(500));
    let err = run_err_on(&mut vm, asm.finish());
    assert!(err.ends_with("stack overflow"), "{err}");
}

use super::helpers::*;
use lunar_bytecode::opcode::OpCode;
use lunar_core::closure::NativeFunction;
use lunar_core::native::NativeContext;
use lunar_core::object::HostValue;
use lunar_core::string::LuaStr;
use lunar_core::table::{Table, TableRef};
use lunar_vm::{LuaError, TValue, Vm};

fn table_with(fields: &[(&str, TValue)]) -> TableRef {
    let t = Table::new(0, fields.len()).into_ref();
    for (k, v) in fields {
        t.borrow_mut().raw_set_str(LuaStr::from(*k), v.clone());
    }
    t
}

fn native(
    name: &str,
    f: impl Fn(&mut NativeContext<'_>) -> Result<Vec<TValue>, LuaError> + 'static,
) -> TValue {
    TValue::from_native(NativeFunction::new(name, f))
}

fn with_meta(vm: &mut Vm, mt: TableRef) -> TValue {
    let t = TValue::new_table();
    vm.set_metatable(&t, Some(mt));
    t
}

/// `return obj.<key>`
fn get_field(key: &str) -> lunar_bytecode::proto::Proto {
    let mut asm = Asm::main();
    asm.get_global(0, "obj");
    let k = asm.rks(key);
    asm.abc(OpCode::GetTable, 0, 0, k);
    asm.abc(OpCode::Return, 0, 2, 0);
    asm.finish()
}

/// `return a <op> b` as a boolean, for EQ/LT/LE.
fn compare(op: OpCode) -> lunar_bytecode::proto::Proto {
    let mut asm = Asm::main();
    asm.get_global(0, "a");
    asm.get_global(1, "b");
    asm.abc(op, 1, 0, 1);
    asm.asbx(OpCode::Jmp, 0, 1);
    asm.abc(OpCode::LoadBool, 2, 0, 1);
    asm.abc(OpCode::LoadBool, 2, 1, 0);
    asm.abc(OpCode::Return, 2, 2, 0);
    asm.finish()
}

#[test]
fn test_index_chain_three_levels() {
    let mut vm = new_vm();
    let t3 = table_with(&[("key", TValue::from_integer(42))]);
    let t2 = with_meta(&mut vm, table_with(&[("__index", TValue::Table(t3))]));
    let t1 = with_meta(&mut vm, table_with(&[("__index", t2)]));
    vm.set_global("obj", t1);
    let r = run_on(&mut vm, get_field("key"));
    assert_int(&r, 0, 42);
}

#[test]
fn test_index_loop_detected() {
    let mut vm = new_vm();
    let mt = Table::new(0, 1).into_ref();
    let obj = with_meta(&mut vm, mt.clone());
    mt.borrow_mut()
        .raw_set_str(LuaStr::from("__index"), obj.clone());
    vm.set_global("obj", obj);
    assert_eq!(
        run_err_on(&mut vm, get_field("missing")),
        "test:1: '__index' chain too long; possible loop"
    );
}

#[test]
fn test_index_function_gets_key() {
    // __index = function(t, k) return k .. k end
    let mut f = Asm::function(2, 1);
    f.abc(OpCode::Move, 2, 1, 0);
    f.abc(OpCode::Move, 3, 1, 0);
    f.abc(OpCode::Concat, 2, 2, 3);
    f.abc(OpCode::Return, 2, 2, 0);

    let mut vm = new_vm();
    let handler = vm.load(f.finish()).unwrap();
    let obj = with_meta(&mut vm, table_with(&[("__index", handler)]));
    vm.set_global("obj", obj);
    let r = run_on(&mut vm, get_field("ab"));
    assert_str(&r, 0, "abab");
}

#[test]
fn test_newindex_redirects_absent_keys() {
    // obj.x = 5; return obj.x
    let mut asm = Asm::main();
    asm.get_global(0, "obj");
    let x = asm.rks("x");
    let five = asm.rki(5);
    asm.abc(OpCode::SetTable, 0, x, five);
    asm.abc(OpCode::GetTable, 1, 0, x);
    asm.abc(OpCode::Return, 1, 2, 0);

    let mut vm = new_vm();
    let store = Table::new(0, 1).into_ref();
    let obj = with_meta(
        &mut vm,
        table_with(&[("__newindex", TValue::Table(store.clone()))]),
    );
    vm.set_global("obj", obj);
    let r = run_on(&mut vm, asm.finish());
    assert_nil(&r, 0);
    assert_eq!(
        store.borrow().raw_get_str(&LuaStr::from("x")),
        TValue::from_integer(5)
    );
}

#[test]
fn test_eq_metamethod() {
    let mut vm = new_vm();
    let mt = table_with(&[("__eq", native("eq", |_| Ok(vec![TValue::from_bool(true)])))]);
    let a = with_meta(&mut vm, mt.clone());
    let b = with_meta(&mut vm, mt);
    vm.set_global("a", a);
    vm.set_global("b", b);
    let r = run_on(&mut vm, compare(OpCode::Eq));
    assert_bool(&r, 0, true);
}

#[test]
fn test_eq_without_metamethod_is_identity() {
    let mut vm = new_vm();
    vm.set_global("a", TValue::new_table());
    vm.set_global("b", TValue::new_table());
    let r = run_on(&mut vm, compare(OpCode::Eq));
    assert_bool(&r, 0, false);

    vm.set_global("a", TValue::from_integer(1));
    vm.set_global("b", TValue::from_float(1.0));
    let r = run_on(&mut vm, compare(OpCode::Eq));
    assert_bool(&r, 0, true);
}

#[test]
fn test_le_falls_back_to_lt() {
    // Objects ordered by their "v" field through __lt only
    let mut vm = new_vm();
    let lt = native("lt", |ctx| {
        let key = TValue::from("v");
        let (lhs, rhs) = (ctx.arg(1), ctx.arg(2));
        let a = ctx.index(&lhs, &key)?;
        let b = ctx.index(&rhs, &key)?;
        Ok(vec![TValue::from_bool(
            a.as_integer().unwrap_or(0) < b.as_integer().unwrap_or(0),
        )])
    });
    let mt = table_with(&[("__lt", lt)]);
    let a = with_meta(&mut vm, mt.clone());
    let b = with_meta(&mut vm, mt);
    vm.set_index(&a, TValue::from("v"), TValue::from_integer(1)).unwrap();
    vm.set_index(&b, TValue::from("v"), TValue::from_integer(2)).unwrap();
    vm.set_global("a", a);
    vm.set_global("b", b);

    let r = run_on(&mut vm, compare(OpCode::Lt));
    assert_bool(&r, 0, true);
    let r = run_on(&mut vm, compare(OpCode::Le));
    assert_bool(&r, 0, true);
}

#[test]
fn test_compare_error() {
    let mut vm = new_vm();
    vm.set_global("a", TValue::from_integer(1));
    vm.set_global("b", TValue::from("x"));
    assert_eq!(
        run_err_on(&mut vm, compare(OpCode::Lt)),
        "test:1: attempt to compare number with string"
    );
    vm.set_global("a", TValue::new_table());
    vm.set_global("b", TValue::new_table());
    assert_eq!(
        run_err_on(&mut vm, compare(OpCode::Le)),
        "test:1: attempt to compare two table values"
    );
}

#[test]
fn test_arith_concat_len_metamethods() {
    // return obj + 1, 1 + obj, obj .. "x", #obj, -obj
    let mut asm = Asm::main();
    asm.get_global(0, "obj");
    let one = asm.rki(1);
    asm.abc(OpCode::Add, 1, 0, one);
    asm.abc(OpCode::Add, 2, one, 0);
    asm.abc(OpCode::Move, 3, 0, 0);
    asm.load_str(4, "x");
    asm.abc(OpCode::Concat, 3, 3, 4);
    asm.abc(OpCode::Len, 4, 0, 0);
    asm.abc(OpCode::Unm, 5, 0, 0);
    asm.abc(OpCode::Return, 1, 6, 0);

    let mut vm = new_vm();
    let mt = table_with(&[
        ("__add", native("add", |ctx| {
            // The table may be either operand
            let n = if ctx.arg(1).is_table() { ctx.arg(2) } else { ctx.arg(1) };
            Ok(vec![TValue::from_integer(100 + n.as_integer().unwrap_or(0))])
        })),
        ("__concat", native("concat", |_| Ok(vec![TValue::from("cat")]))),
        ("__len", native("len", |_| Ok(vec![TValue::from_integer(99)]))),
        ("__unm", native("unm", |_| Ok(vec![TValue::from("neg")]))),
    ]);
    let obj = with_meta(&mut vm, mt);
    vm.set_global("obj", obj);

    let r = run_on(&mut vm, asm.finish());
    assert_int(&r, 0, 101);
    assert_int(&r, 1, 101);
    assert_str(&r, 2, "cat");
    assert_int(&r, 3, 99);
    assert_str(&r, 4, "neg");
}

#[test]
fn test_concat_mixed_values() {
    // return "a" .. 1 .. 2.5
    let mut asm = Asm::main();
    asm.load_str(0, "a");
    asm.load_int(1, 1);
    let k = asm.kflt(2.5);
    asm.abx(OpCode::LoadK, 2, k);
    asm.abc(OpCode::Concat, 0, 0, 2);
    asm.abc(OpCode::Return, 0, 2, 0);
    let r = run(asm.finish());
    assert_str(&r, 0, "a12.5");
}

#[test]
fn test_concat_error_names_operand() {
    // local s = "a"; local t = {}; return s .. t
    let mut asm = Asm::main();
    asm.load_str(0, "a");
    asm.abc(OpCode::NewTable, 1, 0, 0);
    asm.abc(OpCode::Move, 2, 0, 0);
    asm.abc(OpCode::Move, 3, 1, 0);
    asm.abc(OpCode::Concat, 2, 2, 3);
    asm.abc(OpCode::Return, 2, 2, 0);
    asm.local("s", 1, 6);
    asm.local("t", 2, 6);
    assert_eq!(
        run_err(asm.finish()),
        "test:1: attempt to concatenate a table value (local 't')"
    );
}

#[test]
fn test_name_metafield_in_messages() {
    let mut vm = new_vm();
    let obj = with_meta(&mut vm, table_with(&[("__name", TValue::from("Point"))]));
    vm.set_global("obj", obj);

    let mut asm = Asm::main();
    asm.get_global(0, "obj");
    let one = asm.rki(1);
    asm.abc(OpCode::Add, 0, 0, one);
    asm.abc(OpCode::Return, 0, 2, 0);
    assert_eq!(
        run_err_on(&mut vm, asm.finish()),
        "test:1: attempt to perform arithmetic on a Point value (global 'obj')"
    );
}

#[test]
fn test_recursive_index_function_is_caught() {
    // setmetatable(obj, {__index = function(t, k) return t[k] end}); return obj.x
    let mut vm = new_vm();
    let mut handler = Asm::function(2, 1);
    handler.abc(OpCode::GetTable, 2, 0, 1);
    handler.abc(OpCode::Return, 2, 2, 0);
    let handler = vm.load(handler.finish()).unwrap();
    let obj = with_meta(&mut vm, table_with(&[("__index", handler)]));
    vm.set_global("obj", obj);

    let err = vm.run(get_field("x")).unwrap_err();
    assert!(
        err.to_string().ends_with("C stack overflow"),
        "unexpected error: {err}"
    );
    assert!(vm.call_stack.is_empty());
    assert_eq!(vm.native_depth, 0);

    // Still usable afterwards
    vm.set_global("obj", TValue::new_table());
    let r = run_on(&mut vm, get_field("x"));
    assert_nil(&r, 0);
}

struct Point {
    x: i64,
}

fn point(x: i64, mt: &TableRef) -> TValue {
    TValue::Host(std::rc::Rc::new(HostValue::with_metatable(
        Point { x },
        mt.clone(),
    )))
}

fn point_x(ctx: &NativeContext<'_>, n: usize) -> Result<i64, LuaError> {
    let h = ctx.check_host(n)?;
    match h.downcast_ref::<Point>() {
        Some(p) => Ok(p.x),
        None => Err(ctx.type_error(n, "Point")),
    }
}

fn point_meta() -> TableRef {
    table_with(&[
        ("__name", TValue::from("Point")),
        (
            "__index",
            native("point_index", |ctx| {
                let x = point_x(ctx, 1)?;
                let key = ctx.check_string(2)?;
                Ok(vec![match key.as_bytes() {
                    b"x" => TValue::from_integer(x),
                    _ => TValue::Nil,
                }])
            }),
        ),
        (
            "__eq",
            native("point_eq", |ctx| {
                let same = point_x(ctx, 1)? == point_x(ctx, 2)?;
                Ok(vec![TValue::from_bool(same)])
            }),
        ),
    ])
}

#[test]
fn test_host_value_with_metatable() {
    let mut vm = new_vm();
    let mt = point_meta();
    let a = point(3, &mt);
    assert_eq!(vm.type_of(&a), "userdata");
    assert_eq!(vm.type_name(&a), "Point");

    vm.set_global("obj", a.clone());
    let r = run_on(&mut vm, get_field("x"));
    assert_int(&r, 0, 3);
    let r = run_on(&mut vm, get_field("y"));
    assert_nil(&r, 0);

    // Distinct host values compare through __eq
    vm.set_global("a", a.clone());
    vm.set_global("b", point(3, &mt));
    let r = run_on(&mut vm, compare(OpCode::Eq));
    assert_bool(&r, 0, true);
    vm.set_global("b", point(4, &mt));
    let r = run_on(&mut vm, compare(OpCode::Eq));
    assert_bool(&r, 0, false);

    // Host values without a metatable only equal themselves
    let bare = TValue::Host(std::rc::Rc::new(HostValue::new(Point { x: 3 })));
    vm.set_global("a", bare.clone());
    vm.set_global("b", bare);
    let r = run_on(&mut vm, compare(OpCode::Eq));
    assert_bool(&r, 0, true);
}

#[test]
fn test_host_value_index_error_uses_name() {
    let mut vm = new_vm();
    let bare = TValue::Host(std::rc::Rc::new(HostValue::new(Point { x: 1 })));
    vm.set_global("obj", bare);
    assert_eq!(
        run_err_on(&mut vm, get_field("x")),
        "test:1: attempt to index a userdata value (global 'obj')"
    );
}

use super::helpers::*;
use lunar_bytecode::opcode::OpCode;
use lunar_vm::{ErrorKind, TValue, Vm, VmConfig};

fn spin() -> lunar_bytecode::proto::Proto {
    let mut asm = Asm::main();
    asm.asbx(OpCode::Jmp, 0, -1);
    asm.abc(OpCode::Return, 0, 1, 0);
    asm.finish()
}

#[test]
fn test_budget_stops_infinite_loop() {
    let mut vm = new_vm();
    vm.set_instruction_budget(Some(1000));
    let err = vm.run(spin()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::BudgetExhausted));
    assert_eq!(err.to_string(), "test:1: instruction budget exhausted");
    assert_eq!(vm.budget, Some(0));
    assert!(vm.call_stack.is_empty());

    // The VM runs again once the budget is lifted
    vm.set_instruction_budget(None);
    let mut asm = Asm::main();
    asm.load_int(0, 7);
    asm.abc(OpCode::Return, 0, 2, 0);
    let r = run_on(&mut vm, asm.finish());
    assert_int(&r, 0, 7);
}

#[test]
fn test_budget_counts_instructions() {
    let mut vm = new_vm();
    vm.set_instruction_budget(Some(100));
    let mut asm = Asm::main();
    asm.load_int(0, 1);
    asm.load_int(1, 2);
    asm.abc(OpCode::Return, 0, 3, 0);
    run_on(&mut vm, asm.finish());
    assert_eq!(vm.budget, Some(97));
}

#[test]
fn test_budget_from_config() {
    init_logging();
    let mut vm = Vm::with_config(VmConfig::default().with_instruction_budget(Some(10)));
    let err = vm.run(spin()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::BudgetExhausted));
}

#[test]
fn test_budget_spans_nested_calls() {
    // A native re-entering the VM spends from the same budget
    let mut vm = new_vm();
    vm.register("reenter", |ctx| {
        let f = ctx.arg(1);
        ctx.call(&f, vec![])
    });
    let spinner = vm.load(spin()).unwrap();
    let reenter = vm.global("reenter");
    vm.set_instruction_budget(Some(50));
    let err = vm.call(&reenter, vec![spinner]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::BudgetExhausted));
    assert_eq!(vm.native_depth, 0);

    vm.set_instruction_budget(None);
    let select = vm.global("select");
    let r = vm.call(&select, vec![TValue::from("#")]).unwrap();
    assert_eq!(r, vec![TValue::from_integer(0)]);
}

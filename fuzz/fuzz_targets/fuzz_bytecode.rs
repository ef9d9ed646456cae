#![no_main]

use libfuzzer_sys::fuzz_target;
use lunar_bytecode::opcode::Instruction;
use lunar_bytecode::proto::{Constant, Proto};
use lunar_vm::{Vm, VmConfig};

fuzz_target!(|data: &[u8]| {
    // Arbitrary instruction words either fail verification or run to an
    // error or a result. They must never panic.
    let mut p = Proto::new("=fuzz");
    p.is_vararg = true;
    p.max_stack_size = 16;
    p.add_upvalue("_ENV", true, 0);
    p.add_constant(Constant::Integer(1));
    p.add_constant(Constant::Float(0.5));
    p.add_constant(Constant::string("k"));
    for word in data.chunks_exact(4) {
        let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        p.emit(Instruction(word), 1);
    }
    let config = VmConfig::default()
        .with_instruction_budget(Some(10_000))
        .with_max_call_depth(64)
        .with_max_stack_size(1 << 16);
    let mut vm = Vm::with_config(config);
    if let Ok(f) = vm.load(p) {
        let _ = vm.call(&f, vec![]);
    }
});

//! Lunar bytecode: Lua 5.3 instruction encoding, function prototypes and a disassembler.
//!
//! Prototypes are produced by an external compiler (or assembled by hand) and
//! consumed read-only by the VM.

pub mod disasm;
pub mod opcode;
pub mod proto;

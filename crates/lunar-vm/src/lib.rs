//! Lunar virtual machine: a register-based Lua 5.3 bytecode interpreter.
//!
//! A [`Vm`] loads hand-built or externally compiled [`Proto`]s and runs
//! them with Lua 5.3 semantics: metatables, closures with shared upvalues,
//! proper tail calls, and errors that name the values involved.
//!
//! [`Proto`]: lunar_bytecode::proto::Proto

pub mod arith;
pub mod callinfo;
pub mod coerce;
pub mod compare;
pub mod config;
pub mod debug;
mod dispatch;
mod host;
pub mod metamethod;
mod ops;
pub mod runtime;
pub mod vm;

pub use arith::ArithOp;
pub use config::VmConfig;
pub use debug::Origin;
pub use lunar_core::error::{ErrorKind, FrameSnapshot, LuaError};
pub use lunar_core::native::{FrameInfo, Host, NativeContext};
pub use lunar_core::table::TableError;
pub use lunar_core::value::TValue;
pub use runtime::Runtime;
pub use vm::Vm;

//! Lunar core types: values, strings, tables, closures and errors.

pub mod closure;
pub mod error;
pub mod native;
pub mod number;
pub mod object;
pub mod string;
pub mod table;
pub mod value;

pub use error::{ErrorKind, LuaError};
pub use value::TValue;

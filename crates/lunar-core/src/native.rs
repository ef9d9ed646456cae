//! The capability a native function receives: its arguments plus a handle
//! back into the running VM.

use crate::closure::Function;
use crate::error::{CalleeName, ErrorKind, LuaError};
use crate::object::{HostRef, ThreadRef};
use crate::string::LuaStr;
use crate::table::TableRef;
use crate::value::TValue;
use std::fmt;

/// Debug information about one active call level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// "Lua", "C" or "main".
    pub what: &'static str,
    /// The chunk name, or "=[C]" for native functions.
    pub source: String,
    /// The printable chunk id ("main.lua", "[C]", ...).
    pub short_src: String,
    pub current_line: Option<u32>,
    pub line_defined: u32,
    /// How the function was called: "global", "local", "method", "field",
    /// "upvalue", "metamethod", "for iterator", or "" when unknown.
    pub namewhat: &'static str,
    pub name: Option<String>,
    pub is_tail_call: bool,
}

/// Operations a native function may perform on the VM that called it.
pub trait Host {
    /// Call any value, honoring `__call`.
    fn call(&mut self, func: &TValue, args: Vec<TValue>) -> Result<Vec<TValue>, LuaError>;

    /// `obj[key]` with `__index`.
    fn index(&mut self, obj: &TValue, key: &TValue) -> Result<TValue, LuaError>;

    /// `obj[key] = value` with `__newindex`.
    fn set_index(&mut self, obj: &TValue, key: TValue, value: TValue) -> Result<(), LuaError>;

    fn metatable(&self, v: &TValue) -> Option<TableRef>;

    /// Set a table or host value's metatable; other kinds share one per kind.
    fn set_metatable(&mut self, v: &TValue, mt: Option<TableRef>) -> Result<(), LuaError>;

    /// `tostring(v)`, honoring `__tostring` and `__name`.
    fn tostring(&mut self, v: &TValue) -> Result<LuaStr, LuaError>;

    /// Type name for messages, honoring a string `__name` in the metatable.
    fn type_name(&self, v: &TValue) -> String;

    /// Info about call level `level` (0 = the running native, 1 = its caller).
    fn caller(&self, level: usize) -> Option<FrameInfo>;

    /// "chunk:line: " for a Lua function at `level`, "" otherwise.
    fn where_(&self, level: usize) -> String;

    /// A "stack traceback:" listing starting at `level`.
    fn traceback(&self, msg: Option<&str>, level: usize) -> String;

    fn globals(&self) -> TableRef;

    /// How the caller named the running native function.
    fn callee_name(&self) -> Option<CalleeName>;
}

/// Context passed to native functions.
pub struct NativeContext<'a> {
    pub args: Vec<TValue>,
    pub host: &'a mut dyn Host,
}

impl<'a> NativeContext<'a> {
    pub fn new(args: Vec<TValue>, host: &'a mut dyn Host) -> Self {
        NativeContext { args, host }
    }

    /// Number of arguments passed.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Argument `n` (1-based), nil when absent.
    pub fn arg(&self, n: usize) -> TValue {
        n.checked_sub(1)
            .and_then(|i| self.args.get(i))
            .cloned()
            .unwrap_or_default()
    }

    fn is_none(&self, n: usize) -> bool {
        n == 0 || n > self.args.len()
    }

    fn is_none_or_nil(&self, n: usize) -> bool {
        self.arg(n).is_nil()
    }

    // ---- Errors ----

    /// "bad argument #n to 'f' (msg)".
    pub fn arg_error(&self, n: usize, msg: impl Into<String>) -> LuaError {
        LuaError::new(ErrorKind::Arg {
            arg: n,
            callee: self.callee_for_error(),
            msg: msg.into(),
        })
        .with_position(self.host.where_(1))
    }

    /// "bad argument #n to 'f' (X expected, got Y)".
    pub fn type_error(&self, n: usize, expected: impl Into<String>) -> LuaError {
        let got = if self.is_none(n) {
            "no value".to_string()
        } else {
            self.host.type_name(&self.arg(n))
        };
        LuaError::new(ErrorKind::Type {
            arg: n,
            callee: self.callee_for_error(),
            expected: expected.into(),
            got,
        })
        .with_position(self.host.where_(1))
    }

    fn callee_for_error(&self) -> Option<CalleeName> {
        // No caller frame at all: plain "bad argument #n (msg)"
        self.host.caller(0)?;
        Some(self.host.callee_name().unwrap_or_else(|| CalleeName {
            name: "?".to_string(),
            is_method: false,
        }))
    }

    /// Raise an arbitrary value.
    pub fn error(&self, value: TValue) -> LuaError {
        LuaError::value(value)
    }

    /// Raise a message prefixed with the caller's position.
    pub fn errorf(&self, msg: impl fmt::Display) -> LuaError {
        LuaError::runtime(msg.to_string()).with_position(self.host.where_(1))
    }

    // ---- Argument checks ----

    pub fn check_any(&self, n: usize) -> Result<TValue, LuaError> {
        if self.is_none(n) {
            return Err(self.arg_error(n, "value expected"));
        }
        Ok(self.arg(n))
    }

    pub fn check_integer(&self, n: usize) -> Result<i64, LuaError> {
        let v = self.arg(n);
        match v.to_integer() {
            Some(i) => Ok(i),
            None if v.to_number().is_some() => {
                Err(self.arg_error(n, "number has no integer representation"))
            }
            None => Err(self.type_error(n, "number")),
        }
    }

    pub fn check_number(&self, n: usize) -> Result<f64, LuaError> {
        self.arg(n)
            .to_float()
            .ok_or_else(|| self.type_error(n, "number"))
    }

    /// A string argument; numbers are converted.
    pub fn check_string(&self, n: usize) -> Result<LuaStr, LuaError> {
        match self.arg(n) {
            TValue::String(s) => Ok(s),
            v @ (TValue::Integer(_) | TValue::Float(_)) => Ok(LuaStr::from(v.to_string())),
            _ => Err(self.type_error(n, "string")),
        }
    }

    pub fn check_boolean(&self, n: usize) -> Result<bool, LuaError> {
        self.arg(n)
            .as_bool()
            .ok_or_else(|| self.type_error(n, "boolean"))
    }

    pub fn check_table(&self, n: usize) -> Result<TableRef, LuaError> {
        match self.arg(n) {
            TValue::Table(t) => Ok(t),
            _ => Err(self.type_error(n, "table")),
        }
    }

    pub fn check_function(&self, n: usize) -> Result<Function, LuaError> {
        match self.arg(n) {
            TValue::Function(f) => Ok(f),
            _ => Err(self.type_error(n, "function")),
        }
    }

    pub fn check_host(&self, n: usize) -> Result<HostRef, LuaError> {
        match self.arg(n) {
            TValue::Host(h) => Ok(h),
            _ => Err(self.type_error(n, "userdata")),
        }
    }

    pub fn check_thread(&self, n: usize) -> Result<ThreadRef, LuaError> {
        match self.arg(n) {
            TValue::Thread(t) => Ok(t),
            _ => Err(self.type_error(n, "thread")),
        }
    }

    /// Truthiness of argument `n`; absent arguments are false.
    pub fn to_boolean(&self, n: usize) -> bool {
        self.arg(n).is_truthy()
    }

    pub fn opt_integer(&self, n: usize, default: i64) -> Result<i64, LuaError> {
        if self.is_none_or_nil(n) {
            Ok(default)
        } else {
            self.check_integer(n)
        }
    }

    pub fn opt_number(&self, n: usize, default: f64) -> Result<f64, LuaError> {
        if self.is_none_or_nil(n) {
            Ok(default)
        } else {
            self.check_number(n)
        }
    }

    pub fn opt_string(&self, n: usize, default: &str) -> Result<LuaStr, LuaError> {
        if self.is_none_or_nil(n) {
            Ok(LuaStr::from(default))
        } else {
            self.check_string(n)
        }
    }

    pub fn opt_boolean(&self, n: usize, default: bool) -> Result<bool, LuaError> {
        if self.is_none_or_nil(n) {
            Ok(default)
        } else {
            self.check_boolean(n)
        }
    }

    // Reference kinds have no useful default; absent or nil gives None.

    pub fn opt_table(&self, n: usize) -> Result<Option<TableRef>, LuaError> {
        self.opt_with(n, Self::check_table)
    }

    pub fn opt_function(&self, n: usize) -> Result<Option<Function>, LuaError> {
        self.opt_with(n, Self::check_function)
    }

    pub fn opt_host(&self, n: usize) -> Result<Option<HostRef>, LuaError> {
        self.opt_with(n, Self::check_host)
    }

    pub fn opt_thread(&self, n: usize) -> Result<Option<ThreadRef>, LuaError> {
        self.opt_with(n, Self::check_thread)
    }

    /// Argument `n` unless it is absent or nil.
    pub fn opt_any(&self, n: usize) -> Option<TValue> {
        let v = self.arg(n);
        (!v.is_nil()).then_some(v)
    }

    fn opt_with<T>(
        &self,
        n: usize,
        check: fn(&Self, usize) -> Result<T, LuaError>,
    ) -> Result<Option<T>, LuaError> {
        if self.is_none_or_nil(n) {
            Ok(None)
        } else {
            check(self, n).map(Some)
        }
    }

    // ---- VM access ----

    pub fn call(&mut self, func: &TValue, args: Vec<TValue>) -> Result<Vec<TValue>, LuaError> {
        self.host.call(func, args)
    }

    pub fn index(&mut self, obj: &TValue, key: &TValue) -> Result<TValue, LuaError> {
        self.host.index(obj, key)
    }

    pub fn set_index(&mut self, obj: &TValue, key: TValue, value: TValue) -> Result<(), LuaError> {
        self.host.set_index(obj, key, value)
    }

    pub fn metatable(&self, v: &TValue) -> Option<TableRef> {
        self.host.metatable(v)
    }

    pub fn set_metatable(&mut self, v: &TValue, mt: Option<TableRef>) -> Result<(), LuaError> {
        self.host.set_metatable(v, mt)
    }

    pub fn tostring(&mut self, v: &TValue) -> Result<LuaStr, LuaError> {
        self.host.tostring(v)
    }

    pub fn caller(&self, level: usize) -> Option<FrameInfo> {
        self.host.caller(level)
    }

    pub fn traceback(&self, msg: Option<&str>) -> String {
        self.host.traceback(msg, 1)
    }

    pub fn globals(&self) -> TableRef {
        self.host.globals()
    }
}

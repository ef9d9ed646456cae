//! Lua runtime error types.

use crate::table::TableError;
use crate::value::TValue;

/// How a native function was named by its caller, for argument errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalleeName {
    pub name: String,
    /// Called with method syntax (`obj:f(...)`), so argument 1 is `self`.
    pub is_method: bool,
}

/// One frame of the call chain captured when an error was raised.
#[derive(Clone, Debug)]
pub struct FrameSnapshot {
    /// The running function.
    pub func: TValue,
    /// Index of the executing instruction (Lua frames only).
    pub pc: usize,
    pub is_lua: bool,
    pub is_tail_call: bool,
}

/// What went wrong.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Bad argument to a native function.
    #[error("{}", fmt_arg_error(.arg, .callee, .msg))]
    Arg {
        arg: usize,
        callee: Option<CalleeName>,
        msg: String,
    },
    /// Wrong argument type for a native function.
    #[error("{}", fmt_type_error(.arg, .callee, .expected, .got))]
    Type {
        arg: usize,
        callee: Option<CalleeName>,
        expected: String,
        got: String,
    },
    /// Operation applied to a value of the wrong type.
    #[error("attempt to {verb} a {type_name} value{varinfo}")]
    Op {
        verb: String,
        type_name: String,
        varinfo: String,
    },
    #[error("{}", fmt_compare(.left, .right))]
    Compare { left: String, right: String },
    #[error("number{varinfo} has no integer representation")]
    NoInteger { varinfo: String },
    #[error("{0}")]
    Runtime(String),
    /// An arbitrary raised value.
    #[error("{}", fmt_value(.0))]
    Value(TValue),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("stack overflow")]
    StackOverflow,
    #[error("C stack overflow")]
    CStackOverflow,
    #[error("instruction budget exhausted")]
    BudgetExhausted,
    /// Malformed bytecode or a broken VM invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

fn fmt_arg_error(arg: &usize, callee: &Option<CalleeName>, msg: &str) -> String {
    match callee {
        None => format!("bad argument #{arg} ({msg})"),
        Some(CalleeName {
            name,
            is_method: true,
        }) => {
            if *arg == 1 {
                format!("calling '{name}' on bad self ({msg})")
            } else {
                format!("bad argument #{} to '{name}' ({msg})", arg - 1)
            }
        }
        Some(CalleeName { name, .. }) => format!("bad argument #{arg} to '{name}' ({msg})"),
    }
}

fn fmt_type_error(arg: &usize, callee: &Option<CalleeName>, expected: &str, got: &str) -> String {
    fmt_arg_error(arg, callee, &format!("{expected} expected, got {got}"))
}

fn fmt_compare(left: &str, right: &str) -> String {
    if left == right {
        format!("attempt to compare two {left} values")
    } else {
        format!("attempt to compare {left} with {right}")
    }
}

fn fmt_value(v: &TValue) -> String {
    match v {
        TValue::String(_) | TValue::Integer(_) | TValue::Float(_) => v.to_string(),
        _ => format!("(error object is a {} value)", v.type_name()),
    }
}

/// A Lua runtime error: the failure, where it was raised, and the call
/// chain at that point.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{position}{kind}")]
pub struct LuaError {
    pub kind: ErrorKind,
    /// "chunk:line: " prefix, empty when raised outside Lua code.
    pub position: String,
    /// Frames at the raise point, innermost first. Filled in once while
    /// unwinding through the first call boundary.
    pub traceback: Option<Vec<FrameSnapshot>>,
}

impl LuaError {
    pub fn new(kind: ErrorKind) -> Self {
        LuaError {
            kind,
            position: String::new(),
            traceback: None,
        }
    }

    /// A runtime error with a plain message.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime(msg.into()))
    }

    /// Raise an arbitrary value, as `error(v)` does.
    pub fn value(v: TValue) -> Self {
        Self::new(ErrorKind::Value(v))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(msg.into()))
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = position.into();
        self
    }

    /// The error as a Lua value: the raised value itself, or the message
    /// string for everything else.
    pub fn to_value(&self) -> TValue {
        match &self.kind {
            ErrorKind::Value(v) if self.position.is_empty() => v.clone(),
            _ => TValue::from_string(self.to_string()),
        }
    }

    /// The raised value, when this error carries one.
    pub fn raised_value(&self) -> Option<&TValue> {
        match &self.kind {
            ErrorKind::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.kind, ErrorKind::Internal(_))
    }
}

impl From<ErrorKind> for LuaError {
    fn from(kind: ErrorKind) -> Self {
        LuaError::new(kind)
    }
}

impl From<TableError> for LuaError {
    fn from(e: TableError) -> Self {
        LuaError::new(ErrorKind::Table(e))
    }
}

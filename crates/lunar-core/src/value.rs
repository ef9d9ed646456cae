/// Lua value representation.
///
/// A tagged union over the nine Lua types. Scalars are stored inline;
/// strings, tables, functions, host values and threads are reference
/// counted handles, so cloning a `TValue` never copies the referenced object.
use crate::closure::{Function, LuaClosure, NativeFunction};
use crate::number::{self, Num};
use crate::object::{HostRef, ThreadRef, ValueKind};
use crate::string::LuaStr;
use crate::table::{Table, TableRef};
use lunar_bytecode::proto::Constant;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A Lua value.
#[derive(Clone, Default)]
pub enum TValue {
    #[default]
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(LuaStr),
    Table(TableRef),
    Function(Function),
    Host(HostRef),
    Thread(ThreadRef),
}

impl TValue {
    // ---- Constructors ----

    /// Create a nil value.
    #[inline]
    pub fn nil() -> Self {
        TValue::Nil
    }

    /// Create a boolean value.
    #[inline]
    pub fn from_bool(b: bool) -> Self {
        TValue::Bool(b)
    }

    /// Create an integer value.
    #[inline]
    pub fn from_integer(i: i64) -> Self {
        TValue::Integer(i)
    }

    /// Create a float value.
    #[inline]
    pub fn from_float(f: f64) -> Self {
        TValue::Float(f)
    }

    /// Create a string value.
    pub fn from_string(s: impl Into<LuaStr>) -> Self {
        TValue::String(s.into())
    }

    /// Wrap a new table.
    pub fn from_table(t: Table) -> Self {
        TValue::Table(Rc::new(RefCell::new(t)))
    }

    /// Create a new empty table value.
    pub fn new_table() -> Self {
        Self::from_table(Table::new(0, 0))
    }

    /// Wrap a Lua closure.
    pub fn from_closure(c: LuaClosure) -> Self {
        TValue::Function(Function::Lua(Rc::new(c)))
    }

    /// Wrap a native function.
    pub fn from_native(f: NativeFunction) -> Self {
        TValue::Function(Function::Native(Rc::new(f)))
    }

    /// Convert a parsed numeral.
    pub fn from_num(n: Num) -> Self {
        match n {
            Num::Int(i) => TValue::Integer(i),
            Num::Float(f) => TValue::Float(f),
        }
    }

    /// Load a constant-pool entry. String constants share their allocation.
    pub fn from_constant(k: &Constant) -> Self {
        match k {
            Constant::Nil => TValue::Nil,
            Constant::Boolean(b) => TValue::Bool(*b),
            Constant::Integer(i) => TValue::Integer(*i),
            Constant::Float(f) => TValue::Float(*f),
            Constant::String(s) => TValue::String(LuaStr::from(s.clone())),
        }
    }

    // ---- Type checks ----

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, TValue::Nil)
    }

    #[inline]
    pub fn is_bool(&self) -> bool {
        matches!(self, TValue::Bool(_))
    }

    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, TValue::Integer(_))
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, TValue::Float(_))
    }

    /// Returns true if this value is a number (integer or float).
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, TValue::Integer(_) | TValue::Float(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, TValue::String(_))
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        matches!(self, TValue::Table(_))
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(self, TValue::Function(_))
    }

    /// Returns true for nil and false.
    #[inline]
    pub fn is_falsy(&self) -> bool {
        matches!(self, TValue::Nil | TValue::Bool(false))
    }

    /// Returns true for everything except nil and false.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    // ---- Extractors ----

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            TValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            TValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Numeric value as f64, without string coercion.
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            TValue::Integer(i) => Some(*i as f64),
            TValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&LuaStr> {
        match self {
            TValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            TValue::Table(t) => Some(t),
            _ => None,
        }
    }

    #[inline]
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            TValue::Function(f) => Some(f),
            _ => None,
        }
    }

    /// The Lua closure, if this is one.
    pub fn as_lua_closure(&self) -> Option<&Rc<LuaClosure>> {
        match self {
            TValue::Function(Function::Lua(c)) => Some(c),
            _ => None,
        }
    }

    #[inline]
    pub fn as_host(&self) -> Option<&HostRef> {
        match self {
            TValue::Host(h) => Some(h),
            _ => None,
        }
    }

    #[inline]
    pub fn as_thread(&self) -> Option<&ThreadRef> {
        match self {
            TValue::Thread(t) => Some(t),
            _ => None,
        }
    }

    // ---- Coercions ----

    /// Convert to a number, coercing numeric strings.
    pub fn to_number(&self) -> Option<TValue> {
        match self {
            TValue::Integer(_) | TValue::Float(_) => Some(self.clone()),
            TValue::String(s) => number::str_to_number(s.as_bytes()).map(TValue::from_num),
            _ => None,
        }
    }

    /// Convert to a float, coercing integers and numeric strings.
    pub fn to_float(&self) -> Option<f64> {
        match self {
            TValue::Float(f) => Some(*f),
            TValue::Integer(i) => Some(*i as f64),
            TValue::String(_) => self.to_number().and_then(|n| n.as_number()),
            _ => None,
        }
    }

    /// Convert to an integer if the value has an exact integer representation.
    /// Numeric strings are accepted.
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            TValue::Integer(i) => Some(*i),
            TValue::Float(f) => number::float_to_integer(*f),
            TValue::String(_) => self.to_number().and_then(|n| n.to_integer()),
            _ => None,
        }
    }

    // ---- Identity and type ----

    /// The basic type of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            TValue::Nil => ValueKind::Nil,
            TValue::Bool(_) => ValueKind::Boolean,
            TValue::Integer(_) | TValue::Float(_) => ValueKind::Number,
            TValue::String(_) => ValueKind::String,
            TValue::Table(_) => ValueKind::Table,
            TValue::Function(_) => ValueKind::Function,
            TValue::Host(_) => ValueKind::Userdata,
            TValue::Thread(_) => ValueKind::Thread,
        }
    }

    /// The Lua type name ("nil", "number", ...), ignoring `__name`.
    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Address of the referenced object, for reference kinds.
    pub fn ptr_id(&self) -> Option<usize> {
        match self {
            TValue::Table(t) => Some(Rc::as_ptr(t) as *const () as usize),
            TValue::Function(f) => Some(f.ptr_id()),
            TValue::Host(h) => Some(Rc::as_ptr(h) as *const () as usize),
            TValue::Thread(t) => Some(Rc::as_ptr(t) as *const () as usize),
            _ => None,
        }
    }

    /// Primitive equality: no metamethods. Integers and floats compare by
    /// mathematical value, strings by content, everything else by identity.
    pub fn raw_equal(&self, other: &TValue) -> bool {
        match (self, other) {
            (TValue::Nil, TValue::Nil) => true,
            (TValue::Bool(a), TValue::Bool(b)) => a == b,
            (TValue::Integer(a), TValue::Integer(b)) => a == b,
            (TValue::Float(a), TValue::Float(b)) => a == b,
            (TValue::Integer(i), TValue::Float(f)) | (TValue::Float(f), TValue::Integer(i)) => {
                number::float_to_integer(*f) == Some(*i)
            }
            (TValue::String(a), TValue::String(b)) => a == b,
            _ => match (self.ptr_id(), other.ptr_id()) {
                (Some(a), Some(b)) => a == b && self.kind() == other.kind(),
                _ => false,
            },
        }
    }
}

impl PartialEq for TValue {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equal(other)
    }
}

impl From<bool> for TValue {
    fn from(b: bool) -> Self {
        TValue::Bool(b)
    }
}

impl From<i64> for TValue {
    fn from(i: i64) -> Self {
        TValue::Integer(i)
    }
}

impl From<f64> for TValue {
    fn from(f: f64) -> Self {
        TValue::Float(f)
    }
}

impl From<&str> for TValue {
    fn from(s: &str) -> Self {
        TValue::String(LuaStr::from(s))
    }
}

impl From<LuaStr> for TValue {
    fn from(s: LuaStr) -> Self {
        TValue::String(s)
    }
}

impl From<TableRef> for TValue {
    fn from(t: TableRef) -> Self {
        TValue::Table(t)
    }
}

impl From<Function> for TValue {
    fn from(f: Function) -> Self {
        TValue::Function(f)
    }
}

/// Raw `tostring` rendering: no `__tostring` / `__name` lookups.
impl fmt::Display for TValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TValue::Nil => f.write_str("nil"),
            TValue::Bool(b) => write!(f, "{b}"),
            TValue::Integer(i) => write!(f, "{i}"),
            TValue::Float(x) => f.write_str(&number::fmt_float(*x)),
            TValue::String(s) => write!(f, "{s}"),
            _ => write!(
                f,
                "{}: {:#x}",
                self.type_name(),
                self.ptr_id().unwrap_or_default()
            ),
        }
    }
}

impl fmt::Debug for TValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TValue::String(s) => write!(f, "{s:?}"),
            _ => write!(f, "{self}"),
        }
    }
}

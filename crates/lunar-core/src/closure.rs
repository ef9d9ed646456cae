//! Closures, native functions and upvalue cells.

use crate::error::LuaError;
use crate::native::NativeContext;
use crate::value::TValue;
use lunar_bytecode::proto::Proto;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared handle to an upvalue cell.
pub type UpValRef = Rc<RefCell<UpVal>>;

/// An upvalue: either open (pointing to a stack slot) or closed (holding a value).
#[derive(Debug)]
pub struct UpVal {
    pub location: UpValLocation,
}

/// Where an upvalue's value lives.
#[derive(Debug)]
pub enum UpValLocation {
    /// Points to a stack index (still on the stack).
    Open(usize),
    /// Value has been captured (the owning frame is gone).
    Closed(TValue),
}

impl UpVal {
    /// A new open cell aliasing `slot`.
    pub fn open(slot: usize) -> UpValRef {
        Rc::new(RefCell::new(UpVal {
            location: UpValLocation::Open(slot),
        }))
    }

    /// A cell that was never on the stack.
    pub fn closed(value: TValue) -> UpValRef {
        Rc::new(RefCell::new(UpVal {
            location: UpValLocation::Closed(value),
        }))
    }

    /// The stack slot, while open.
    pub fn slot(&self) -> Option<usize> {
        match self.location {
            UpValLocation::Open(slot) => Some(slot),
            UpValLocation::Closed(_) => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.slot().is_some()
    }

    /// Read through the cell.
    pub fn get(&self, stack: &[TValue]) -> TValue {
        match &self.location {
            UpValLocation::Open(slot) => stack.get(*slot).cloned().unwrap_or_default(),
            UpValLocation::Closed(v) => v.clone(),
        }
    }

    /// Write through the cell.
    pub fn set(&mut self, stack: &mut [TValue], value: TValue) {
        match &mut self.location {
            UpValLocation::Open(slot) => {
                if let Some(dst) = stack.get_mut(*slot) {
                    *dst = value;
                }
            }
            UpValLocation::Closed(v) => *v = value,
        }
    }

    /// Snapshot the stack slot into the cell. No-op when already closed.
    pub fn close(&mut self, stack: &[TValue]) {
        if let UpValLocation::Open(slot) = self.location {
            self.location = UpValLocation::Closed(stack.get(slot).cloned().unwrap_or_default());
        }
    }
}

/// A Lua closure (prototype + captured upvalues).
pub struct LuaClosure {
    pub proto: Rc<Proto>,
    pub upvalues: Vec<UpValRef>,
}

impl LuaClosure {
    pub fn new(proto: Rc<Proto>, upvalues: Vec<UpValRef>) -> Self {
        LuaClosure { proto, upvalues }
    }
}

impl fmt::Debug for LuaClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LuaClosure({}:{}, {} upvalues)",
            self.proto.source,
            self.proto.line_defined,
            self.upvalues.len()
        )
    }
}

/// Signature of a host function.
pub type NativeFn = dyn Fn(&mut NativeContext<'_>) -> Result<Vec<TValue>, LuaError>;

/// A native (Rust) function callable from Lua.
pub struct NativeFunction {
    pub name: String,
    pub func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&mut NativeContext<'_>) -> Result<Vec<TValue>, LuaError> + 'static,
    ) -> Self {
        NativeFunction {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// A callable value.
#[derive(Clone, Debug)]
pub enum Function {
    Lua(Rc<LuaClosure>),
    Native(Rc<NativeFunction>),
}

impl Function {
    /// Identity of the underlying closure.
    pub fn ptr_id(&self) -> usize {
        match self {
            Function::Lua(c) => Rc::as_ptr(c) as *const () as usize,
            Function::Native(n) => Rc::as_ptr(n) as *const () as usize,
        }
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        self.ptr_id() == other.ptr_id()
    }

    pub fn is_lua(&self) -> bool {
        matches!(self, Function::Lua(_))
    }
}

//! Type tags and the opaque reference kinds: host values and threads.

use crate::table::TableRef;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// The basic Lua types, as reported by `type()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Nil,
    Boolean,
    Number,
    String,
    Table,
    Function,
    Userdata,
    Thread,
}

impl ValueKind {
    /// Every kind, in Lua's type-tag order.
    pub const ALL: [ValueKind; 8] = [
        ValueKind::Nil,
        ValueKind::Boolean,
        ValueKind::Userdata,
        ValueKind::Number,
        ValueKind::String,
        ValueKind::Table,
        ValueKind::Function,
        ValueKind::Thread,
    ];

    /// The Lua type name.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Nil => "nil",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Table => "table",
            ValueKind::Function => "function",
            ValueKind::Userdata => "userdata",
            ValueKind::Thread => "thread",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared handle to a host value.
pub type HostRef = Rc<HostValue>;

/// An opaque host object with its own optional metatable.
pub struct HostValue {
    data: Box<dyn Any>,
    metatable: RefCell<Option<TableRef>>,
}

impl HostValue {
    pub fn new<T: Any>(data: T) -> Self {
        HostValue {
            data: Box::new(data),
            metatable: RefCell::new(None),
        }
    }

    /// Wrap a host object with a metatable already attached.
    pub fn with_metatable<T: Any>(data: T, mt: TableRef) -> Self {
        HostValue {
            data: Box::new(data),
            metatable: RefCell::new(Some(mt)),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref()
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.borrow().clone()
    }

    pub fn set_metatable(&self, mt: Option<TableRef>) {
        *self.metatable.borrow_mut() = mt;
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostValue")
            .field("has_metatable", &self.metatable.borrow().is_some())
            .finish()
    }
}

/// Shared handle to a thread.
pub type ThreadRef = Rc<ThreadHandle>;

/// A thread value. Threads have identity but cannot be resumed: the VM
/// does not implement coroutines.
#[derive(Debug, Default)]
pub struct ThreadHandle {
    pub name: Option<String>,
}

impl ThreadHandle {
    pub fn new() -> Self {
        Self::default()
    }
}

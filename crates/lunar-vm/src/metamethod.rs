//! Metamethod events and lookup.

use crate::runtime::Runtime;
use lunar_core::string::LuaStr;
use lunar_core::table::TableRef;
use lunar_core::value::TValue;

/// Every metamethod event the VM raises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TmEvent {
    Index,
    NewIndex,
    Len,
    Eq,
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
    Lt,
    Le,
    Concat,
    Call,
    ToString,
    Name,
}

impl TmEvent {
    pub const COUNT: usize = 24;

    pub const ALL: [TmEvent; TmEvent::COUNT] = [
        TmEvent::Index,
        TmEvent::NewIndex,
        TmEvent::Len,
        TmEvent::Eq,
        TmEvent::Add,
        TmEvent::Sub,
        TmEvent::Mul,
        TmEvent::Mod,
        TmEvent::Pow,
        TmEvent::Div,
        TmEvent::IDiv,
        TmEvent::BAnd,
        TmEvent::BOr,
        TmEvent::BXor,
        TmEvent::Shl,
        TmEvent::Shr,
        TmEvent::Unm,
        TmEvent::BNot,
        TmEvent::Lt,
        TmEvent::Le,
        TmEvent::Concat,
        TmEvent::Call,
        TmEvent::ToString,
        TmEvent::Name,
    ];

    /// The metatable key, e.g. "__index".
    pub fn name(self) -> &'static str {
        match self {
            TmEvent::Index => "__index",
            TmEvent::NewIndex => "__newindex",
            TmEvent::Len => "__len",
            TmEvent::Eq => "__eq",
            TmEvent::Add => "__add",
            TmEvent::Sub => "__sub",
            TmEvent::Mul => "__mul",
            TmEvent::Mod => "__mod",
            TmEvent::Pow => "__pow",
            TmEvent::Div => "__div",
            TmEvent::IDiv => "__idiv",
            TmEvent::BAnd => "__band",
            TmEvent::BOr => "__bor",
            TmEvent::BXor => "__bxor",
            TmEvent::Shl => "__shl",
            TmEvent::Shr => "__shr",
            TmEvent::Unm => "__unm",
            TmEvent::BNot => "__bnot",
            TmEvent::Lt => "__lt",
            TmEvent::Le => "__le",
            TmEvent::Concat => "__concat",
            TmEvent::Call => "__call",
            TmEvent::ToString => "__tostring",
            TmEvent::Name => "__name",
        }
    }

    /// The event name without the leading underscores, as used in
    /// "metamethod 'index'" frame names.
    pub fn short_name(self) -> &'static str {
        &self.name()[2..]
    }
}

/// Metatable keys, built once per runtime so lookups don't allocate.
pub struct MetamethodNames {
    names: Vec<LuaStr>,
}

impl MetamethodNames {
    pub fn init() -> Self {
        MetamethodNames {
            names: TmEvent::ALL
                .iter()
                .map(|ev| LuaStr::from(ev.name()))
                .collect(),
        }
    }

    pub fn get(&self, ev: TmEvent) -> &LuaStr {
        &self.names[ev as usize]
    }
}

/// The metatable governing `v`: its own for tables and host values, the
/// per-kind one for everything else.
pub fn metatable_of(rt: &Runtime, v: &TValue) -> Option<TableRef> {
    match v {
        TValue::Table(t) => t.borrow().metatable.clone(),
        TValue::Host(h) => h.metatable(),
        _ => rt.type_metatables.get(&v.kind()).cloned(),
    }
}

/// Look up metamethod `ev` for `v`. Returns None when absent or nil.
pub fn get_metamethod(rt: &Runtime, v: &TValue, ev: TmEvent) -> Option<TValue> {
    let mt = metatable_of(rt, v)?;
    let tm = mt.borrow().raw_get_str(rt.mm_names.get(ev));
    if tm.is_nil() {
        None
    } else {
        Some(tm)
    }
}

/// Fast check for an event in a table's own metatable.
pub fn table_metamethod(rt: &Runtime, t: &TableRef, ev: TmEvent) -> Option<TValue> {
    let mt = t.borrow().metatable.clone()?;
    let tm = mt.borrow().raw_get_str(rt.mm_names.get(ev));
    if tm.is_nil() {
        None
    } else {
        Some(tm)
    }
}

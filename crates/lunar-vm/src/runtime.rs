//! Process-wide interpreter state shared by every frame: globals, the
//! registry and per-kind metatables.

use crate::metamethod::MetamethodNames;
use lunar_core::object::ValueKind;
use lunar_core::string::LuaStr;
use lunar_core::table::{Table, TableRef};
use lunar_core::value::TValue;
use rustc_hash::FxHashMap;

/// Registry key of the loaded-modules table.
pub const LOADED_KEY: &str = "_LOADED";
/// Registry array slot holding the globals table.
pub const RIDX_GLOBALS: i64 = 2;

pub struct Runtime {
    pub globals: TableRef,
    pub registry: TableRef,
    /// Module table searched for global function names in tracebacks.
    pub loaded: TableRef,
    /// Metatables shared by all values of a non-table, non-host kind.
    pub type_metatables: FxHashMap<ValueKind, TableRef>,
    pub mm_names: MetamethodNames,
}

impl Runtime {
    pub fn new() -> Self {
        let globals = Table::new(0, 32).into_ref();
        globals
            .borrow_mut()
            .raw_set_str(LuaStr::from("_G"), TValue::Table(globals.clone()));

        let loaded = Table::new(0, 4).into_ref();
        loaded
            .borrow_mut()
            .raw_set_str(LuaStr::from("_G"), TValue::Table(globals.clone()));

        let registry = Table::new(2, 4).into_ref();
        {
            let mut reg = registry.borrow_mut();
            reg.raw_seti(RIDX_GLOBALS, TValue::Table(globals.clone()));
            reg.raw_set_str(LuaStr::from(LOADED_KEY), TValue::Table(loaded.clone()));
        }

        log::debug!("runtime created");
        Runtime {
            globals,
            registry,
            loaded,
            type_metatables: FxHashMap::default(),
            mm_names: MetamethodNames::init(),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

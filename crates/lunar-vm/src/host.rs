//! The VM as seen by native functions.

use crate::vm::Vm;
use lunar_core::error::{CalleeName, LuaError};
use lunar_core::native::{FrameInfo, Host};
use lunar_core::string::LuaStr;
use lunar_core::table::TableRef;
use lunar_core::value::TValue;

impl Host for Vm {
    fn call(&mut self, func: &TValue, args: Vec<TValue>) -> Result<Vec<TValue>, LuaError> {
        self.call_value(func, args, -1)
    }

    fn index(&mut self, obj: &TValue, key: &TValue) -> Result<TValue, LuaError> {
        Vm::index(self, obj, key)
    }

    fn set_index(&mut self, obj: &TValue, key: TValue, value: TValue) -> Result<(), LuaError> {
        Vm::set_index(self, obj, key, value)
    }

    fn metatable(&self, v: &TValue) -> Option<TableRef> {
        Vm::metatable(self, v)
    }

    fn set_metatable(&mut self, v: &TValue, mt: Option<TableRef>) -> Result<(), LuaError> {
        Vm::set_metatable(self, v, mt);
        Ok(())
    }

    fn tostring(&mut self, v: &TValue) -> Result<LuaStr, LuaError> {
        Vm::tostring(self, v)
    }

    fn type_name(&self, v: &TValue) -> String {
        Vm::type_name(self, v)
    }

    fn caller(&self, level: usize) -> Option<FrameInfo> {
        self.frame_info_at(level)
    }

    fn where_(&self, level: usize) -> String {
        Vm::where_(self, level)
    }

    fn traceback(&self, msg: Option<&str>, level: usize) -> String {
        let frames = self.snapshot_frames();
        let tb = self.format_traceback(frames.get(level..).unwrap_or_default());
        match msg {
            Some(msg) => format!("{msg}\n{tb}"),
            None => tb,
        }
    }

    fn globals(&self) -> TableRef {
        Vm::globals(self)
    }

    fn callee_name(&self) -> Option<CalleeName> {
        self.running_callee_name()
    }
}

//! Call frame information for the VM.

use lunar_core::closure::LuaClosure;
use std::rc::Rc;

/// Index of a frame in the VM's call stack.
pub type FrameId = usize;

// Flags for CallInfo boolean fields
const FLAG_IS_LUA: u8 = 1;
const FLAG_IS_TAIL_CALL: u8 = 2;
/// Entered from the host: RETURN leaves the dispatch loop instead of
/// resuming the caller.
const FLAG_FRESH: u8 = 4;

/// A call frame on the VM call stack.
#[derive(Clone, Debug)]
pub struct CallInfo {
    /// The running closure (None for native frames).
    pub closure: Option<Rc<LuaClosure>>,
    /// Stack slot holding the called function; results are moved here.
    pub func_idx: usize,
    /// First register.
    pub base: usize,
    /// One past the frame's last usable slot.
    pub top: usize,
    /// Index of the next instruction.
    pub pc: usize,
    /// Expected number of results (-1 = multi-return).
    pub num_results: i32,
    /// The calling frame.
    pub prev: Option<FrameId>,
    flags: u8,
}

impl CallInfo {
    pub fn new_lua(
        closure: Rc<LuaClosure>,
        func_idx: usize,
        base: usize,
        top: usize,
        num_results: i32,
        prev: Option<FrameId>,
    ) -> Self {
        CallInfo {
            closure: Some(closure),
            func_idx,
            base,
            top,
            pc: 0,
            num_results,
            prev,
            flags: FLAG_IS_LUA,
        }
    }

    pub fn new_native(
        func_idx: usize,
        top: usize,
        num_results: i32,
        prev: Option<FrameId>,
    ) -> Self {
        CallInfo {
            closure: None,
            func_idx,
            base: func_idx + 1,
            top,
            pc: 0,
            num_results,
            prev,
            flags: 0,
        }
    }

    #[inline(always)]
    pub fn is_lua(&self) -> bool {
        self.flags & FLAG_IS_LUA != 0
    }

    #[inline(always)]
    pub fn is_tail_call(&self) -> bool {
        self.flags & FLAG_IS_TAIL_CALL != 0
    }

    #[inline(always)]
    pub fn set_is_tail_call(&mut self, v: bool) {
        if v {
            self.flags |= FLAG_IS_TAIL_CALL;
        } else {
            self.flags &= !FLAG_IS_TAIL_CALL;
        }
    }

    #[inline(always)]
    pub fn is_fresh(&self) -> bool {
        self.flags & FLAG_FRESH != 0
    }

    #[inline(always)]
    pub fn set_fresh(&mut self, v: bool) {
        if v {
            self.flags |= FLAG_FRESH;
        } else {
            self.flags &= !FLAG_FRESH;
        }
    }

    /// Index of the instruction being executed.
    #[inline(always)]
    pub fn current_pc(&self) -> usize {
        self.pc.saturating_sub(1)
    }
}

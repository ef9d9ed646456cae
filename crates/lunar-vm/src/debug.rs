//! Debug information derived from bytecode: names for the values involved
//! in an error, frame descriptions and stack tracebacks.

use crate::callinfo::CallInfo;
use crate::metamethod::TmEvent;
use crate::vm::Vm;
use lunar_bytecode::opcode::{index_k, is_k, OpCode};
use lunar_bytecode::proto::{chunk_id, Constant, Proto};
use lunar_core::closure::Function;
use lunar_core::error::{CalleeName, ErrorKind, FrameSnapshot, LuaError};
use lunar_core::native::FrameInfo;
use lunar_core::value::TValue;
use std::fmt::Write;

/// Where an operand of a failing operation came from, so the error can name
/// it ("local 'x'", "global 'f'", ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Not tied to a register or upvalue of the running function.
    None,
    /// A register of the running Lua function.
    Reg(usize),
    /// An upvalue of the running Lua function.
    Upval(usize),
}

impl Origin {
    /// Origin of an RK operand: constants have no name.
    #[inline]
    pub fn rk(x: u32) -> Origin {
        if is_k(x) {
            Origin::None
        } else {
            Origin::Reg(x as usize)
        }
    }
}

// Levels shown before and after the "..." of a long traceback.
const LEVELS1: usize = 10;
const LEVELS2: usize = 11;

/// Find the last instruction before `lastpc` that wrote `reg`. Code after a
/// forward jump target is conditional, so its writes are not trusted.
fn find_set_reg(p: &Proto, lastpc: usize, reg: usize) -> Option<usize> {
    let mut setreg = None;
    let mut jmptarget = 0;
    let filter = |pc: usize, jmptarget: usize| (pc >= jmptarget).then_some(pc);
    for (pc, inst) in p.code.iter().enumerate().take(lastpc) {
        let Some(op) = inst.opcode() else { continue };
        let a = inst.a() as usize;
        match op {
            OpCode::LoadNil => {
                let b = inst.b() as usize;
                if a <= reg && reg <= a + b {
                    setreg = filter(pc, jmptarget);
                }
            }
            OpCode::TForCall => {
                if reg >= a + 2 {
                    setreg = filter(pc, jmptarget);
                }
            }
            OpCode::Call | OpCode::TailCall => {
                if reg >= a {
                    setreg = filter(pc, jmptarget);
                }
            }
            OpCode::Jmp => {
                let dest = pc as i64 + 1 + inst.sbx() as i64;
                // Forward jump that does not skip lastpc
                if (pc as i64) < dest && dest <= lastpc as i64 && dest as usize > jmptarget {
                    jmptarget = dest as usize;
                }
            }
            _ => {
                if op.sets_register_a() && reg == a {
                    setreg = filter(pc, jmptarget);
                }
            }
        }
    }
    setreg
}

/// Name of the value in `reg` at `lastpc`, with its kind: "local",
/// "global", "field", "upvalue", "constant" or "method".
pub fn get_obj_name(p: &Proto, lastpc: usize, reg: usize) -> Option<(&'static str, String)> {
    if let Some(name) = p.local_name(reg + 1, lastpc) {
        return Some(("local", name.to_string()));
    }
    let pc = find_set_reg(p, lastpc, reg)?;
    let inst = p.code[pc];
    match inst.opcode()? {
        OpCode::Move => {
            let b = inst.b() as usize;
            if b < inst.a() as usize {
                get_obj_name(p, pc, b)
            } else {
                None
            }
        }
        op @ (OpCode::GetTabUp | OpCode::GetTable) => {
            let table = inst.b() as usize;
            let is_env = if op == OpCode::GetTable {
                p.local_name(table + 1, pc) == Some("_ENV")
            } else {
                p.upvalue_name(table) == "_ENV"
            };
            let key = key_name(p, pc, inst.c());
            Some((if is_env { "global" } else { "field" }, key))
        }
        OpCode::GetUpval => Some(("upvalue", p.upvalue_name(inst.b() as usize).to_string())),
        op @ (OpCode::LoadK | OpCode::LoadKX) => {
            let idx = if op == OpCode::LoadK {
                inst.bx() as usize
            } else {
                p.code.get(pc + 1)?.ax_field() as usize
            };
            match p.constants.get(idx)? {
                Constant::String(s) => Some(("constant", String::from_utf8_lossy(s).into_owned())),
                _ => None,
            }
        }
        OpCode::Self_ => Some(("method", key_name(p, pc, inst.c()))),
        _ => None,
    }
}

/// Name of a table key operand: a string constant, or a register that was
/// loaded from one. "?" otherwise.
fn key_name(p: &Proto, pc: usize, c: u32) -> String {
    if is_k(c) {
        if let Some(Constant::String(s)) = p.constants.get(index_k(c)) {
            return String::from_utf8_lossy(s).into_owned();
        }
    } else if let Some(("constant", name)) = get_obj_name(p, pc, c as usize) {
        return name;
    }
    "?".to_string()
}

/// How the instruction at `pc` called a function: the called expression for
/// calls, or the metamethod event an operator triggered.
pub fn func_name_from_code(p: &Proto, pc: usize) -> Option<(&'static str, String)> {
    let inst = p.code.get(pc)?;
    let ev = match inst.opcode()? {
        OpCode::Call | OpCode::TailCall => return get_obj_name(p, pc, inst.a() as usize),
        OpCode::TForCall => return Some(("for iterator", "for iterator".to_string())),
        OpCode::Self_ | OpCode::GetTabUp | OpCode::GetTable => TmEvent::Index,
        OpCode::SetTabUp | OpCode::SetTable => TmEvent::NewIndex,
        OpCode::Add => TmEvent::Add,
        OpCode::Sub => TmEvent::Sub,
        OpCode::Mul => TmEvent::Mul,
        OpCode::Mod => TmEvent::Mod,
        OpCode::Pow => TmEvent::Pow,
        OpCode::Div => TmEvent::Div,
        OpCode::IDiv => TmEvent::IDiv,
        OpCode::BAnd => TmEvent::BAnd,
        OpCode::BOr => TmEvent::BOr,
        OpCode::BXor => TmEvent::BXor,
        OpCode::Shl => TmEvent::Shl,
        OpCode::Shr => TmEvent::Shr,
        OpCode::Unm => TmEvent::Unm,
        OpCode::BNot => TmEvent::BNot,
        OpCode::Len => TmEvent::Len,
        OpCode::Concat => TmEvent::Concat,
        OpCode::Eq => TmEvent::Eq,
        OpCode::Lt => TmEvent::Lt,
        OpCode::Le => TmEvent::Le,
        _ => return None,
    };
    Some(("metamethod", ev.short_name().to_string()))
}

fn snapshot_of(vm: &Vm, ci: &CallInfo) -> FrameSnapshot {
    let func = match &ci.closure {
        Some(cl) => TValue::Function(Function::Lua(cl.clone())),
        None => vm.stack.get(ci.func_idx).cloned().unwrap_or_default(),
    };
    FrameSnapshot {
        func,
        pc: ci.current_pc(),
        is_lua: ci.is_lua(),
        is_tail_call: ci.is_tail_call(),
    }
}

/// Describe one frame. `caller` is the frame that called it, used to name
/// the function from the calling instruction.
pub fn frame_info(snap: &FrameSnapshot, caller: Option<&FrameSnapshot>) -> FrameInfo {
    let mut info = match snap.func.as_lua_closure().filter(|_| snap.is_lua) {
        Some(cl) => {
            let p = &cl.proto;
            FrameInfo {
                what: if p.is_main() { "main" } else { "Lua" },
                source: p.source.to_string(),
                short_src: chunk_id(&p.source),
                current_line: p.get_line(snap.pc),
                line_defined: p.line_defined,
                ..FrameInfo::default()
            }
        }
        None => FrameInfo {
            what: "C",
            source: "=[C]".to_string(),
            short_src: "[C]".to_string(),
            ..FrameInfo::default()
        },
    };
    info.is_tail_call = snap.is_tail_call;
    if !snap.is_tail_call {
        let named = caller
            .filter(|c| c.is_lua)
            .and_then(|c| c.func.as_lua_closure())
            .and_then(|cl| func_name_from_code(&cl.proto, caller.map_or(0, |c| c.pc)));
        if let Some((namewhat, name)) = named {
            info.namewhat = namewhat;
            info.name = Some(name);
        }
    }
    info
}

impl Vm {
    /// Snapshot of frame `level` (0 = innermost).
    fn live_frame(&self, level: usize) -> Option<FrameSnapshot> {
        let mut id = self.call_stack.len().checked_sub(1)?;
        for _ in 0..level {
            id = self.call_stack.get(id)?.prev?;
        }
        Some(snapshot_of(self, self.call_stack.get(id)?))
    }

    /// Every active frame, innermost first.
    pub(crate) fn snapshot_frames(&self) -> Vec<FrameSnapshot> {
        let mut frames = Vec::with_capacity(self.call_stack.len());
        let mut next = self.call_stack.len().checked_sub(1);
        while let Some(ci) = next.and_then(|id| self.call_stack.get(id)) {
            frames.push(snapshot_of(self, ci));
            next = ci.prev;
        }
        frames
    }

    /// Info about the active frame at `level` (0 = innermost).
    pub fn frame_info_at(&self, level: usize) -> Option<FrameInfo> {
        let snap = self.live_frame(level)?;
        let caller = self.live_frame(level + 1);
        Some(frame_info(&snap, caller.as_ref()))
    }

    /// "chunk:line: " for the Lua frame at `level`, "" when it is native or
    /// has no line information.
    pub fn where_(&self, level: usize) -> String {
        match self.frame_info_at(level) {
            Some(FrameInfo {
                short_src,
                current_line: Some(line),
                ..
            }) if line > 0 => format!("{short_src}:{line}: "),
            _ => String::new(),
        }
    }

    /// Name a register or upvalue of the running Lua function for an error
    /// message: " (local 'x')", or "" when nothing is known.
    pub(crate) fn varinfo(&self, origin: Origin) -> String {
        let Some(cl) = self.call_stack.last().and_then(|ci| ci.closure.as_ref()) else {
            return String::new();
        };
        let p = &cl.proto;
        match origin {
            Origin::Upval(idx) => format!(" (upvalue '{}')", p.upvalue_name(idx)),
            Origin::Reg(reg) => {
                let pc = self.call_stack.last().map_or(0, CallInfo::current_pc);
                match get_obj_name(p, pc, reg) {
                    Some((kind, name)) => format!(" ({kind} '{name}')"),
                    None => String::new(),
                }
            }
            Origin::None => String::new(),
        }
    }

    /// Origin of an absolute stack slot: a register when it lies in the
    /// running Lua frame.
    pub(crate) fn slot_origin(&self, slot: usize) -> Origin {
        match self.call_stack.last() {
            Some(ci) if ci.is_lua() && (ci.base..ci.top).contains(&slot) => {
                Origin::Reg(slot - ci.base)
            }
            _ => Origin::None,
        }
    }

    /// Give an error raised by the running Lua function its source position.
    pub(crate) fn annotate(&self, mut e: LuaError) -> LuaError {
        if !e.position.is_empty() || e.traceback.is_some() {
            return e;
        }
        if let Some(ci) = self.call_stack.last() {
            if let Some(cl) = &ci.closure {
                let p = &cl.proto;
                let line = p
                    .get_line(ci.current_pc())
                    .map_or_else(|| "?".to_string(), |l| l.to_string());
                e.position = format!("{}:{line}: ", chunk_id(&p.source));
            }
        }
        e
    }

    /// Name under which `func` is reachable from the loaded-modules table:
    /// "mod.name", or just "name" for globals.
    pub fn global_func_name(&self, func: &TValue) -> Option<String> {
        let loaded = self.runtime.loaded.borrow();
        let mut key = TValue::nil();
        while let Ok(Some((k, module))) = loaded.next(&key) {
            if let TValue::String(modname) = &k {
                if module.raw_equal(func) {
                    return Some(modname.to_string_lossy());
                }
                if let Some(found) = find_field(&module, func) {
                    let modname = modname.to_string_lossy();
                    return Some(if modname == "_G" {
                        found
                    } else {
                        format!("{modname}.{found}")
                    });
                }
            }
            key = k;
        }
        None
    }

    /// How the running native function was named by its caller.
    pub(crate) fn running_callee_name(&self) -> Option<CalleeName> {
        let snap = self.live_frame(0)?;
        let info = self.frame_info_at(0)?;
        if let Some(name) = info.name {
            return Some(CalleeName {
                name,
                is_method: info.namewhat == "method",
            });
        }
        let name = self.global_func_name(&snap.func).or_else(|| match &snap.func {
            TValue::Function(Function::Native(nf)) => Some(nf.name.clone()),
            _ => None,
        })?;
        Some(CalleeName {
            name,
            is_method: false,
        })
    }

    fn describe_function(&self, func: &TValue, info: &FrameInfo) -> String {
        if let Some(name) = self.global_func_name(func) {
            format!("function '{name}'")
        } else if let (false, Some(name)) = (info.namewhat.is_empty(), &info.name) {
            format!("{} '{}'", info.namewhat, name)
        } else if info.what == "main" {
            "main chunk".to_string()
        } else if info.what != "C" {
            format!("function <{}:{}>", info.short_src, info.line_defined)
        } else {
            "?".to_string()
        }
    }

    /// Render frames (innermost first) as a "stack traceback:" listing.
    pub fn format_traceback(&self, frames: &[FrameSnapshot]) -> String {
        let mut out = String::from("stack traceback:");
        let n = frames.len();
        let mut level = 0;
        while level < n {
            if n > LEVELS1 + LEVELS2 + 1 && level == LEVELS1 {
                out.push_str("\n\t...");
                level = n - LEVELS2;
                continue;
            }
            let snap = &frames[level];
            let info = frame_info(snap, frames.get(level + 1));
            let _ = write!(out, "\n\t{}:", info.short_src);
            if let Some(line) = info.current_line.filter(|l| *l > 0) {
                let _ = write!(out, "{line}:");
            }
            out.push_str(" in ");
            out.push_str(&self.describe_function(&snap.func, &info));
            if info.is_tail_call {
                out.push_str("\n\t(...tail calls...)");
            }
            level += 1;
        }
        out
    }

    /// The traceback captured when `err` was raised.
    pub fn traceback(&self, err: &LuaError) -> String {
        self.format_traceback(err.traceback.as_deref().unwrap_or_default())
    }

    /// The message of `err` as a script would print it. Raised values that
    /// are neither strings nor numbers go through `__tostring` when they
    /// have one.
    pub fn error_message(&mut self, err: &LuaError) -> String {
        if let ErrorKind::Value(v) = &err.kind {
            if err.position.is_empty() && !matches!(v, TValue::String(_)) && !v.is_number() {
                let v = v.clone();
                if let Some(mt) = self.metatable(&v) {
                    let has_tostring = !mt
                        .borrow()
                        .raw_get_str(self.runtime.mm_names.get(TmEvent::ToString))
                        .is_nil();
                    if has_tostring {
                        if let Ok(s) = self.tostring(&v) {
                            return s.to_string_lossy();
                        }
                    }
                }
            }
        }
        err.to_string()
    }
}

/// Find a string key of table `module` whose value is `func`.
fn find_field(module: &TValue, func: &TValue) -> Option<String> {
    let TValue::Table(t) = module else {
        return None;
    };
    let t = t.borrow();
    let mut key = TValue::nil();
    while let Ok(Some((k, v))) = t.next(&key) {
        if let TValue::String(name) = &k {
            if v.raw_equal(func) {
                return Some(name.to_string_lossy());
            }
        }
        key = k;
    }
    None
}

//! Metatable-aware operations: indexing, arithmetic, comparison, length,
//! concatenation and `tostring`.

use crate::arith::{arith_op, ArithOp, ArithResult};
use crate::coerce::{is_concatable, to_string_for_concat};
use crate::compare::{eq_needs_metamethod, lua_le, lua_lt, CompareResult};
use crate::debug::Origin;
use crate::metamethod::{get_metamethod, metatable_of, table_metamethod, TmEvent};
use crate::vm::Vm;
use lunar_core::error::{ErrorKind, LuaError};
use lunar_core::string::LuaStr;
use lunar_core::value::TValue;

fn arith_event(op: ArithOp) -> TmEvent {
    match op {
        ArithOp::Add => TmEvent::Add,
        ArithOp::Sub => TmEvent::Sub,
        ArithOp::Mul => TmEvent::Mul,
        ArithOp::Mod => TmEvent::Mod,
        ArithOp::Pow => TmEvent::Pow,
        ArithOp::Div => TmEvent::Div,
        ArithOp::IDiv => TmEvent::IDiv,
        ArithOp::BAnd => TmEvent::BAnd,
        ArithOp::BOr => TmEvent::BOr,
        ArithOp::BXor => TmEvent::BXor,
        ArithOp::Shl => TmEvent::Shl,
        ArithOp::Shr => TmEvent::Shr,
        ArithOp::Unm => TmEvent::Unm,
        ArithOp::BNot => TmEvent::BNot,
    }
}

impl Vm {
    /// Type name for error messages: a string `__name` in the metatable of a
    /// table or host value overrides the basic type.
    pub fn obj_type_name(&self, v: &TValue) -> String {
        if matches!(v, TValue::Table(_) | TValue::Host(_)) {
            if let Some(name) = self.metafield_name(v) {
                return name;
            }
        }
        v.type_name().to_string()
    }

    /// Type name honoring `__name` for any value with a metatable.
    pub fn type_name(&self, v: &TValue) -> String {
        self.metafield_name(v)
            .unwrap_or_else(|| v.type_name().to_string())
    }

    /// `type(v)`: the basic type, ignoring metatables.
    pub fn type_of(&self, v: &TValue) -> &'static str {
        v.type_name()
    }

    fn metafield_name(&self, v: &TValue) -> Option<String> {
        let mt = metatable_of(&self.runtime, v)?;
        let name = mt
            .borrow()
            .raw_get_str(self.runtime.mm_names.get(TmEvent::Name));
        name.as_str().map(LuaStr::to_string_lossy)
    }

    /// "attempt to {verb} a {type} value{varinfo}".
    pub(crate) fn op_error(&self, verb: &str, v: &TValue, origin: Origin) -> LuaError {
        LuaError::new(ErrorKind::Op {
            verb: verb.to_string(),
            type_name: self.obj_type_name(v),
            varinfo: self.varinfo(origin),
        })
    }

    /// Call a metamethod and keep its first result.
    fn call_tm(&mut self, tm: &TValue, args: Vec<TValue>) -> Result<TValue, LuaError> {
        let mut results = self.call_value(tm, args, 1)?;
        Ok(results.pop().unwrap_or_default())
    }

    // ---- Indexing ----

    /// `t[key]`, following `__index`.
    pub fn index(&mut self, t: &TValue, key: &TValue) -> Result<TValue, LuaError> {
        self.index_with(t, key, Origin::None)
    }

    pub(crate) fn index_with(
        &mut self,
        t: &TValue,
        key: &TValue,
        origin: Origin,
    ) -> Result<TValue, LuaError> {
        let mut t = t.clone();
        for depth in 0..self.config.max_meta_loop {
            let tm = if let TValue::Table(tab) = &t {
                let v = tab.borrow().raw_get(key);
                if !v.is_nil() {
                    return Ok(v);
                }
                match table_metamethod(&self.runtime, tab, TmEvent::Index) {
                    Some(tm) => tm,
                    None => return Ok(TValue::nil()),
                }
            } else {
                match get_metamethod(&self.runtime, &t, TmEvent::Index) {
                    Some(tm) => tm,
                    None => {
                        let origin = if depth == 0 { origin } else { Origin::None };
                        return Err(self.op_error("index", &t, origin));
                    }
                }
            };
            if tm.is_function() {
                return self.call_tm(&tm, vec![t, key.clone()]);
            }
            t = tm;
        }
        Err(LuaError::runtime("'__index' chain too long; possible loop"))
    }

    /// `t[key] = value`, following `__newindex`.
    pub fn set_index(&mut self, t: &TValue, key: TValue, value: TValue) -> Result<(), LuaError> {
        self.set_index_with(t, key, value, Origin::None)
    }

    pub(crate) fn set_index_with(
        &mut self,
        t: &TValue,
        key: TValue,
        value: TValue,
        origin: Origin,
    ) -> Result<(), LuaError> {
        let mut t = t.clone();
        for depth in 0..self.config.max_meta_loop {
            let tm = if let TValue::Table(tab) = &t {
                let present = !tab.borrow().raw_get(&key).is_nil();
                let tm = if present {
                    None
                } else {
                    table_metamethod(&self.runtime, tab, TmEvent::NewIndex)
                };
                match tm {
                    Some(tm) => tm,
                    None => {
                        tab.borrow_mut().raw_set(&key, value)?;
                        return Ok(());
                    }
                }
            } else {
                match get_metamethod(&self.runtime, &t, TmEvent::NewIndex) {
                    Some(tm) => tm,
                    None => {
                        let origin = if depth == 0 { origin } else { Origin::None };
                        return Err(self.op_error("index", &t, origin));
                    }
                }
            };
            if tm.is_function() {
                self.call_value(&tm, vec![t, key, value], 0)?;
                return Ok(());
            }
            t = tm;
        }
        Err(LuaError::runtime("'__newindex' chain too long; possible loop"))
    }

    // ---- Arithmetic ----

    /// Apply an arithmetic or bitwise operator, falling back to metamethods.
    /// Unary operators ignore `b`.
    pub fn arith(&mut self, op: ArithOp, a: &TValue, b: &TValue) -> Result<TValue, LuaError> {
        let b = if op.is_unary() { a } else { b };
        self.arith_with(op, a, b, Origin::None, Origin::None)
    }

    pub(crate) fn arith_with(
        &mut self,
        op: ArithOp,
        a: &TValue,
        b: &TValue,
        oa: Origin,
        ob: Origin,
    ) -> Result<TValue, LuaError> {
        match arith_op(op, a, b) {
            ArithResult::Ok(v) => Ok(v),
            ArithResult::Error(e) => Err(e),
            ArithResult::NeedMetamethod => {
                let ev = arith_event(op);
                let tm = get_metamethod(&self.runtime, a, ev)
                    .or_else(|| get_metamethod(&self.runtime, b, ev));
                match tm {
                    Some(tm) => self.call_tm(&tm, vec![a.clone(), b.clone()]),
                    None => Err(self.arith_error(op, a, b, oa, ob)),
                }
            }
        }
    }

    fn arith_error(&self, op: ArithOp, a: &TValue, b: &TValue, oa: Origin, ob: Origin) -> LuaError {
        // Blame the first operand that is not a number
        let (culprit, origin) = if a.to_number().is_none() {
            (a, oa)
        } else {
            (b, ob)
        };
        if op.is_bitwise() {
            if a.to_number().is_some() && b.to_number().is_some() {
                let origin = if a.to_integer().is_none() { oa } else { ob };
                return LuaError::new(ErrorKind::NoInteger {
                    varinfo: self.varinfo(origin),
                });
            }
            self.op_error("perform bitwise operation on", culprit, origin)
        } else {
            self.op_error("perform arithmetic on", culprit, origin)
        }
    }

    // ---- Comparison ----

    /// `a == b`, consulting `__eq` for two tables or two host values.
    pub fn equals(&mut self, a: &TValue, b: &TValue) -> Result<bool, LuaError> {
        if a.raw_equal(b) {
            return Ok(true);
        }
        if !eq_needs_metamethod(a, b) {
            return Ok(false);
        }
        let tm = get_metamethod(&self.runtime, a, TmEvent::Eq)
            .or_else(|| get_metamethod(&self.runtime, b, TmEvent::Eq));
        match tm {
            Some(tm) => Ok(self.call_tm(&tm, vec![a.clone(), b.clone()])?.is_truthy()),
            None => Ok(false),
        }
    }

    /// `a < b`.
    pub fn less_than(&mut self, a: &TValue, b: &TValue) -> Result<bool, LuaError> {
        if let CompareResult::Ok(r) = lua_lt(a, b) {
            return Ok(r);
        }
        match self.call_order_tm(a, b, TmEvent::Lt)? {
            Some(r) => Ok(r),
            None => Err(self.order_error(a, b)),
        }
    }

    /// `a <= b`. Without `__le`, falls back to `not (b < a)` through `__lt`.
    pub fn less_equal(&mut self, a: &TValue, b: &TValue) -> Result<bool, LuaError> {
        if let CompareResult::Ok(r) = lua_le(a, b) {
            return Ok(r);
        }
        if let Some(r) = self.call_order_tm(a, b, TmEvent::Le)? {
            return Ok(r);
        }
        match self.call_order_tm(b, a, TmEvent::Lt)? {
            Some(r) => Ok(!r),
            None => Err(self.order_error(a, b)),
        }
    }

    fn call_order_tm(
        &mut self,
        a: &TValue,
        b: &TValue,
        ev: TmEvent,
    ) -> Result<Option<bool>, LuaError> {
        let tm = get_metamethod(&self.runtime, a, ev)
            .or_else(|| get_metamethod(&self.runtime, b, ev));
        match tm {
            Some(tm) => Ok(Some(
                self.call_tm(&tm, vec![a.clone(), b.clone()])?.is_truthy(),
            )),
            None => Ok(None),
        }
    }

    fn order_error(&self, a: &TValue, b: &TValue) -> LuaError {
        LuaError::new(ErrorKind::Compare {
            left: self.obj_type_name(a),
            right: self.obj_type_name(b),
        })
    }

    // ---- Length ----

    /// `#v`: string length, `__len`, or the table border.
    pub fn length(&mut self, v: &TValue) -> Result<TValue, LuaError> {
        self.length_with(v, Origin::None)
    }

    pub(crate) fn length_with(&mut self, v: &TValue, origin: Origin) -> Result<TValue, LuaError> {
        match v {
            TValue::String(s) => Ok(TValue::from_integer(s.len() as i64)),
            TValue::Table(t) => match table_metamethod(&self.runtime, t, TmEvent::Len) {
                Some(tm) => self.call_tm(&tm, vec![v.clone(), v.clone()]),
                None => Ok(TValue::from_integer(t.borrow().length())),
            },
            _ => match get_metamethod(&self.runtime, v, TmEvent::Len) {
                Some(tm) => self.call_tm(&tm, vec![v.clone(), v.clone()]),
                None => Err(self.op_error("get length of", v, origin)),
            },
        }
    }

    // ---- Concatenation ----

    /// Concatenate values right to left, as `a .. b .. c` does.
    pub fn concat(&mut self, values: Vec<TValue>) -> Result<TValue, LuaError> {
        self.concat_with(values, |_| Origin::None)
    }

    /// Fold `values` from the right. Runs of strings and numbers are joined
    /// in one step; any other pair goes through `__concat`.
    pub(crate) fn concat_with(
        &mut self,
        mut values: Vec<TValue>,
        origin: impl Fn(usize) -> Origin,
    ) -> Result<TValue, LuaError> {
        let mut total = values.len();
        if total == 0 {
            return Ok(TValue::from_string(""));
        }
        while total > 1 {
            let (i1, i2) = (total - 2, total - 1);
            let mut merged = 2;
            if !is_concatable(&values[i1]) || !is_concatable(&values[i2]) {
                let (a, b) = (values[i1].clone(), values[i2].clone());
                values[i1] = self.concat_tm(&a, &b, origin(i1), origin(i2))?;
            } else if values[i2].as_str().is_some_and(LuaStr::is_empty) {
                values[i1] = TValue::String(to_concat_str(&values[i1]));
            } else if values[i1].as_str().is_some_and(LuaStr::is_empty) {
                values[i1] = TValue::String(to_concat_str(&values[i2]));
            } else {
                // Gather the longest run of strings and numbers ending here
                merged = 1;
                while merged < total && is_concatable(&values[total - merged - 1]) {
                    merged += 1;
                }
                let parts: Vec<LuaStr> = values[total - merged..total]
                    .iter()
                    .map(to_concat_str)
                    .collect();
                let joined = LuaStr::concat(parts.iter().map(LuaStr::as_bytes));
                values[total - merged] = TValue::String(joined);
            }
            total -= merged - 1;
        }
        Ok(values.swap_remove(0))
    }

    fn concat_tm(
        &mut self,
        a: &TValue,
        b: &TValue,
        oa: Origin,
        ob: Origin,
    ) -> Result<TValue, LuaError> {
        let tm = get_metamethod(&self.runtime, a, TmEvent::Concat)
            .or_else(|| get_metamethod(&self.runtime, b, TmEvent::Concat));
        match tm {
            Some(tm) => self.call_tm(&tm, vec![a.clone(), b.clone()]),
            None => {
                let (culprit, origin) = if is_concatable(a) { (b, ob) } else { (a, oa) };
                Err(self.op_error("concatenate", culprit, origin))
            }
        }
    }

    // ---- tostring ----

    /// `tostring(v)`: `__tostring` if present, then `__name`, then the raw
    /// rendering.
    pub fn tostring(&mut self, v: &TValue) -> Result<LuaStr, LuaError> {
        if let Some(tm) = get_metamethod(&self.runtime, v, TmEvent::ToString) {
            return match self.call_tm(&tm, vec![v.clone()])? {
                TValue::String(s) => Ok(s),
                n @ (TValue::Integer(_) | TValue::Float(_)) => Ok(to_concat_str(&n)),
                _ => Err(LuaError::runtime("'__tostring' must return a string")
                    .with_position(self.where_(1))),
            };
        }
        Ok(match v {
            TValue::String(s) => s.clone(),
            TValue::Nil | TValue::Bool(_) | TValue::Integer(_) | TValue::Float(_) => {
                LuaStr::from(v.to_string())
            }
            _ => {
                let kind = self
                    .metafield_name(v)
                    .unwrap_or_else(|| v.type_name().to_string());
                LuaStr::from(format!("{kind}: {:#x}", v.ptr_id().unwrap_or_default()))
            }
        })
    }
}

fn to_concat_str(v: &TValue) -> LuaStr {
    to_string_for_concat(v).unwrap_or_else(|| LuaStr::from(""))
}

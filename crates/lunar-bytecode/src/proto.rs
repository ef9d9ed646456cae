/// Function prototype: holds bytecode, constants, and debug info.
use crate::opcode::Instruction;
use std::rc::Rc;

/// A constant value in the constant pool.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Rc<[u8]>),
}

impl Constant {
    /// Build a string constant.
    pub fn string(s: impl AsRef<[u8]>) -> Self {
        Constant::String(Rc::from(s.as_ref()))
    }

    /// The bytes of a string constant.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Description of an upvalue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpvalDesc {
    /// Name of the upvalue (for debug info).
    pub name: Option<Rc<str>>,
    /// True if captured from the enclosing function's registers, false if
    /// it is one of the enclosing closure's own upvalues.
    pub in_stack: bool,
    /// Register index if in_stack, upvalue index in the enclosing closure otherwise.
    pub index: u8,
}

/// A local variable debug entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVar {
    pub name: Rc<str>,
    /// First PC where the variable is active.
    pub start_pc: u32,
    /// First PC where the variable is dead.
    pub end_pc: u32,
}

/// A compiled function prototype.
#[derive(Clone, Debug)]
pub struct Proto {
    /// Bytecode instructions.
    pub code: Vec<Instruction>,
    /// Constant pool.
    pub constants: Vec<Constant>,
    /// Nested function prototypes.
    pub protos: Vec<Rc<Proto>>,
    /// Upvalue descriptors.
    pub upvalues: Vec<UpvalDesc>,
    /// Number of fixed parameters.
    pub num_params: u8,
    /// Whether this function accepts varargs.
    pub is_vararg: bool,
    /// Number of registers the function needs.
    pub max_stack_size: u8,
    /// Chunk name ("=stdin", "@file.lua", or the source text itself).
    pub source: Rc<str>,
    /// Line where the function was defined (0 for a main chunk).
    pub line_defined: u32,
    pub last_line_defined: u32,

    // --- Debug info ---
    /// Source line of each instruction (empty when stripped).
    pub line_info: Vec<u32>,
    /// Local variable debug info.
    pub local_vars: Vec<LocalVar>,
}

impl Proto {
    /// Create a new empty prototype for the given chunk name.
    pub fn new(source: &str) -> Self {
        Proto {
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2, // minimum
            source: Rc::from(source),
            line_defined: 0,
            last_line_defined: 0,
            line_info: Vec::new(),
            local_vars: Vec::new(),
        }
    }

    /// Emit an instruction at the given source line, returning its pc.
    pub fn emit(&mut self, inst: Instruction, line: u32) -> usize {
        let pc = self.code.len();
        self.code.push(inst);
        self.line_info.push(line);
        pc
    }

    /// Add a constant to the pool, returning its index. Deduplicates.
    pub fn add_constant(&mut self, k: Constant) -> u32 {
        if let Some(i) = self.constants.iter().position(|e| constants_equal(e, &k)) {
            return i as u32;
        }
        self.constants.push(k);
        (self.constants.len() - 1) as u32
    }

    /// Add a nested prototype, returning its index for CLOSURE.
    pub fn add_proto(&mut self, p: Proto) -> u32 {
        self.protos.push(Rc::new(p));
        (self.protos.len() - 1) as u32
    }

    /// Declare an upvalue, returning its index.
    pub fn add_upvalue(&mut self, name: &str, in_stack: bool, index: u8) -> u32 {
        self.upvalues.push(UpvalDesc {
            name: Some(Rc::from(name)),
            in_stack,
            index,
        });
        (self.upvalues.len() - 1) as u32
    }

    /// Record a local variable live over `start_pc..end_pc`.
    pub fn add_local(&mut self, name: &str, start_pc: u32, end_pc: u32) {
        self.local_vars.push(LocalVar {
            name: Rc::from(name),
            start_pc,
            end_pc,
        });
    }

    /// Get the line number for a given PC, if line info is present.
    pub fn get_line(&self, pc: usize) -> Option<u32> {
        self.line_info.get(pc).copied()
    }

    /// Name of the `n`-th (1-based) local variable active at `pc`.
    pub fn local_name(&self, mut n: usize, pc: usize) -> Option<&str> {
        if n == 0 {
            return None;
        }
        for var in &self.local_vars {
            if var.start_pc as usize > pc {
                break;
            }
            if pc < var.end_pc as usize {
                n -= 1;
                if n == 0 {
                    return Some(&var.name);
                }
            }
        }
        None
    }

    /// Name of upvalue `idx`, "?" when unnamed.
    pub fn upvalue_name(&self, idx: usize) -> &str {
        self.upvalues
            .get(idx)
            .and_then(|u| u.name.as_deref())
            .unwrap_or("?")
    }

    /// Get the number of instructions.
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Get a mutable reference to an instruction (for backpatching).
    pub fn get_mut(&mut self, pc: usize) -> &mut Instruction {
        &mut self.code[pc]
    }

    /// Returns true for a main chunk rather than a nested function.
    pub fn is_main(&self) -> bool {
        self.line_defined == 0
    }
}

impl Default for Proto {
    fn default() -> Self {
        Self::new("=?")
    }
}

/// Check if two constants are equal (floats compare by bit pattern).
fn constants_equal(a: &Constant, b: &Constant) -> bool {
    match (a, b) {
        (Constant::Nil, Constant::Nil) => true,
        (Constant::Boolean(a), Constant::Boolean(b)) => a == b,
        (Constant::Integer(a), Constant::Integer(b)) => a == b,
        (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
        (Constant::String(a), Constant::String(b)) => a == b,
        _ => false,
    }
}

/// Shorten a chunk name for messages: `=name` and `@file` drop their prefix,
/// source text becomes `[string "first line..."]`.
pub fn chunk_id(source: &str) -> String {
    const LUA_IDSIZE: usize = 60;
    if source.is_empty() {
        return "?".to_string();
    }
    if let Some(s) = source.strip_prefix('=') {
        s.chars().take(LUA_IDSIZE - 1).collect()
    } else if let Some(s) = source.strip_prefix('@') {
        if s.len() >= LUA_IDSIZE {
            let keep = LUA_IDSIZE - 4;
            let start = s
                .char_indices()
                .map(|(i, _)| i)
                .find(|&i| s.len() - i <= keep)
                .unwrap_or(s.len());
            format!("...{}", &s[start..])
        } else {
            s.to_string()
        }
    } else {
        let first_line = source.lines().next().unwrap_or("");
        // [string "..."] plus an ellipsis takes 14 of the budget
        let max_content = LUA_IDSIZE - 1 - 14;
        if first_line.len() > max_content || source.contains('\n') {
            let truncated: String = first_line.chars().take(max_content).collect();
            format!("[string \"{truncated}...\"]")
        } else {
            format!("[string \"{first_line}\"]")
        }
    }
}

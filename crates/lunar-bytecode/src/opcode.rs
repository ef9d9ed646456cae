/// Lua 5.3 opcodes and instruction encoding.
///
/// Instruction format (32 bits):
/// - Bits 0-5: OpCode (6 bits)
/// - Bits 6-13: A (8 bits)
/// - For iABC format:
///   - Bits 14-22: C (9 bits)
///   - Bits 23-31: B (9 bits)
/// - For iABx: Bx = bits 14-31 (unsigned 18 bits)
/// - For iAsBx: sBx = Bx - MAX_SBX (excess-K signed interpretation)
/// - For iAx: Ax = bits 6-31 (26 bits, unsigned)
///
/// B and C operands of "RK" kind address a constant when bit 8 is set,
/// a register otherwise.
use std::fmt;

/// Size constants for instruction fields.
const SIZE_OP: u32 = 6;
const SIZE_A: u32 = 8;
const SIZE_B: u32 = 9;
const SIZE_C: u32 = 9;
const SIZE_BX: u32 = SIZE_B + SIZE_C; // 18
const SIZE_AX: u32 = SIZE_A + SIZE_B + SIZE_C; // 26

/// Position constants.
const POS_OP: u32 = 0;
const POS_A: u32 = POS_OP + SIZE_OP; // 6
const POS_C: u32 = POS_A + SIZE_A; // 14
const POS_B: u32 = POS_C + SIZE_C; // 23
const POS_BX: u32 = POS_C;
const POS_AX: u32 = POS_A;

/// Mask helpers.
const fn mask(n: u32) -> u32 {
    (1 << n) - 1
}

pub const MAX_A: u32 = mask(SIZE_A); // 255
pub const MAX_B: u32 = mask(SIZE_B); // 511
pub const MAX_C: u32 = mask(SIZE_C); // 511
pub const MAX_BX: u32 = mask(SIZE_BX); // 262143
pub const MAX_SBX: i32 = (MAX_BX >> 1) as i32; // 131071
pub const MIN_SBX: i32 = -MAX_SBX;
pub const MAX_AX: u32 = mask(SIZE_AX);

/// Bit that marks an RK operand as a constant index.
pub const BITRK: u32 = 1 << (SIZE_B - 1);
/// Largest constant index addressable through an RK operand.
pub const MAX_INDEX_RK: u32 = BITRK - 1;

/// Number of list items accumulated before a SETLIST flush.
pub const FIELDS_PER_FLUSH: usize = 50;

/// Returns true if the RK operand addresses a constant.
#[inline(always)]
pub fn is_k(x: u32) -> bool {
    x & BITRK != 0
}

/// Constant index of an RK operand.
#[inline(always)]
pub fn index_k(x: u32) -> usize {
    (x & !BITRK) as usize
}

/// Encode a constant index as an RK operand.
#[inline(always)]
pub fn rk_ask(k: u32) -> u32 {
    debug_assert!(k <= MAX_INDEX_RK, "constant index out of RK range: {k}");
    k | BITRK
}

/// Decode a "floating point byte" (eeeeexxx) size hint as used by NEWTABLE.
pub fn fb2int(x: u32) -> usize {
    if x < 8 {
        x as usize
    } else {
        (((x & 7) + 8) as usize) << ((x >> 3) - 1)
    }
}

/// Encode a size hint as a floating point byte, rounding up.
pub fn int2fb(mut x: u32) -> u32 {
    let mut e = 0;
    if x < 8 {
        return x;
    }
    while x >= (8 << 4) {
        x = (x + 0xf) >> 4;
        e += 4;
    }
    while x >= (8 << 1) {
        x = (x + 1) >> 1;
        e += 1;
    }
    ((e + 1) << 3) | (x - 8)
}

/// All 47 Lua 5.3 opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,
    LoadK,
    LoadKX,
    LoadBool,
    LoadNil,
    GetUpval,
    GetTabUp,
    GetTable,
    SetTabUp,
    SetUpval,
    SetTable,
    NewTable,
    Self_,
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
    Not,
    Len,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Call,
    TailCall,
    Return,
    ForLoop,
    ForPrep,
    TForCall,
    TForLoop,
    SetList,
    Closure,
    VarArg,
    ExtraArg,
}

const ALL_OPCODES: [OpCode; OpCode::COUNT] = {
    use OpCode::*;
    [
        Move, LoadK, LoadKX, LoadBool, LoadNil, GetUpval, GetTabUp, GetTable, SetTabUp, SetUpval,
        SetTable, NewTable, Self_, Add, Sub, Mul, Mod, Pow, Div, IDiv, BAnd, BOr, BXor, Shl, Shr,
        Unm, BNot, Not, Len, Concat, Jmp, Eq, Lt, Le, Test, TestSet, Call, TailCall, Return,
        ForLoop, ForPrep, TForCall, TForLoop, SetList, Closure, VarArg, ExtraArg,
    ]
};

impl OpCode {
    /// Number of opcodes.
    pub const COUNT: usize = 47;

    /// Get the opcode from a u8 value.
    pub fn from_u8(val: u8) -> Option<OpCode> {
        ALL_OPCODES.get(val as usize).copied()
    }

    /// Get the instruction format for this opcode.
    pub fn format(&self) -> InstructionFormat {
        use InstructionFormat::*;
        use OpCode::*;
        match self {
            ExtraArg => IAx,
            LoadK | LoadKX | Closure => IABx,
            Jmp | ForLoop | ForPrep | TForLoop => IAsBx,
            _ => IABC,
        }
    }

    /// Returns true if this opcode writes register A.
    pub fn sets_register_a(&self) -> bool {
        use OpCode::*;
        !matches!(
            self,
            SetTabUp
                | SetUpval
                | SetTable
                | Jmp
                | Eq
                | Lt
                | Le
                | Test
                | Return
                | TForCall
                | SetList
                | ExtraArg
        )
    }

    /// Get the name of this opcode.
    pub fn name(&self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadKX => "LOADKX",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetTabUp => "GETTABUP",
            GetTable => "GETTABLE",
            SetTabUp => "SETTABUP",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Mod => "MOD",
            Pow => "POW",
            Div => "DIV",
            IDiv => "IDIV",
            BAnd => "BAND",
            BOr => "BOR",
            BXor => "BXOR",
            Shl => "SHL",
            Shr => "SHR",
            Unm => "UNM",
            BNot => "BNOT",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Closure => "CLOSURE",
            VarArg => "VARARG",
            ExtraArg => "EXTRAARG",
        }
    }

    /// Returns true if this opcode is a test (conditional skip of the next instruction).
    pub fn is_test(&self) -> bool {
        use OpCode::*;
        matches!(self, Eq | Lt | Le | Test | TestSet)
    }
}

/// Instruction format types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionFormat {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// A 32-bit Lua bytecode instruction.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    // ---- Constructors ----

    /// Create an iABC instruction.
    pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        debug_assert!(a <= MAX_A && b <= MAX_B && c <= MAX_C);
        let mut i = (op as u32) << POS_OP;
        i |= a << POS_A;
        i |= b << POS_B;
        i |= c << POS_C;
        Instruction(i)
    }

    /// Create an iABx instruction.
    pub fn abx(op: OpCode, a: u32, bx: u32) -> Self {
        debug_assert!(bx <= MAX_BX, "Bx out of range: {bx}");
        let mut i = (op as u32) << POS_OP;
        i |= a << POS_A;
        i |= bx << POS_BX;
        Instruction(i)
    }

    /// Create an iAsBx instruction (signed Bx).
    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        debug_assert!(
            (MIN_SBX..=MAX_SBX).contains(&sbx),
            "sBx out of range: {sbx}"
        );
        Self::abx(op, a, (sbx + MAX_SBX) as u32)
    }

    /// Create an iAx instruction.
    pub fn ax(op: OpCode, ax: u32) -> Self {
        debug_assert!(ax <= MAX_AX, "Ax out of range: {ax}");
        Instruction(((op as u32) << POS_OP) | (ax << POS_AX))
    }

    // ---- Field access ----

    /// Decode the opcode. `None` for an opcode number outside the instruction set.
    #[inline(always)]
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(((self.0 >> POS_OP) & mask(SIZE_OP)) as u8)
    }

    #[inline(always)]
    pub fn a(&self) -> u32 {
        (self.0 >> POS_A) & MAX_A
    }

    #[inline(always)]
    pub fn b(&self) -> u32 {
        (self.0 >> POS_B) & MAX_B
    }

    #[inline(always)]
    pub fn c(&self) -> u32 {
        (self.0 >> POS_C) & MAX_C
    }

    #[inline(always)]
    pub fn bx(&self) -> u32 {
        (self.0 >> POS_BX) & MAX_BX
    }

    #[inline(always)]
    pub fn sbx(&self) -> i32 {
        self.bx() as i32 - MAX_SBX
    }

    #[inline(always)]
    pub fn ax_field(&self) -> u32 {
        (self.0 >> POS_AX) & MAX_AX
    }

    // ---- Mutation (for backpatching) ----

    pub fn set_a(&mut self, a: u32) {
        self.0 = (self.0 & !(MAX_A << POS_A)) | ((a & MAX_A) << POS_A);
    }

    pub fn set_sbx(&mut self, sbx: i32) {
        let bx = (sbx + MAX_SBX) as u32 & MAX_BX;
        self.0 = (self.0 & !(MAX_BX << POS_BX)) | (bx << POS_BX);
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(op) = self.opcode() else {
            return write!(f, "<invalid {:#010x}>", self.0);
        };
        match op.format() {
            InstructionFormat::IABC => write!(
                f,
                "{} A={} B={} C={}",
                op.name(),
                self.a(),
                self.b(),
                self.c()
            ),
            InstructionFormat::IABx => write!(f, "{} A={} Bx={}", op.name(), self.a(), self.bx()),
            InstructionFormat::IAsBx => {
                write!(f, "{} A={} sBx={}", op.name(), self.a(), self.sbx())
            }
            InstructionFormat::IAx => write!(f, "{} Ax={}", op.name(), self.ax_field()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

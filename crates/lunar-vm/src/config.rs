//! VM limits and tunables.

/// Configuration for a [`Vm`](crate::vm::Vm).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum number of active call frames.
    pub max_call_depth: usize,
    /// Maximum nesting of re-entrant calls (metamethods, native callbacks).
    pub max_native_depth: usize,
    /// Bytes of Rust stack that nested re-entrant calls may use before
    /// "C stack overflow", whatever the depth.
    pub max_native_stack: usize,
    /// Maximum number of value-stack slots.
    pub max_stack_size: usize,
    /// Slots allocated up front.
    pub initial_stack_size: usize,
    /// Bound on `__index` / `__newindex` / `__call` chains.
    pub max_meta_loop: usize,
    /// Array items stored per SETLIST flush.
    pub fields_per_flush: usize,
    /// Instructions allowed before execution is aborted; None is unlimited.
    pub instruction_budget: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 200_000,
            max_native_depth: 100,
            max_native_stack: 1 << 20,
            max_stack_size: 1_000_000,
            initial_stack_size: 40,
            max_meta_loop: 2000,
            fields_per_flush: lunar_bytecode::opcode::FIELDS_PER_FLUSH,
            instruction_budget: None,
        }
    }
}

impl VmConfig {
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_native_depth(mut self, depth: usize) -> Self {
        self.max_native_depth = depth;
        self
    }

    pub fn with_max_native_stack(mut self, bytes: usize) -> Self {
        self.max_native_stack = bytes;
        self
    }

    pub fn with_max_stack_size(mut self, slots: usize) -> Self {
        self.max_stack_size = slots;
        self
    }

    pub fn with_initial_stack_size(mut self, slots: usize) -> Self {
        self.initial_stack_size = slots;
        self
    }

    pub fn with_max_meta_loop(mut self, n: usize) -> Self {
        self.max_meta_loop = n;
        self
    }

    pub fn with_fields_per_flush(mut self, n: usize) -> Self {
        self.fields_per_flush = n;
        self
    }

    pub fn with_instruction_budget(mut self, budget: Option<u64>) -> Self {
        self.instruction_budget = budget;
        self
    }
}

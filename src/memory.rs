//! Address-space tagging for memory references.
//! Every load, store or atomic carries a `MemorySpace` so the timing model can
//! route it to the right structure (register file, shared memory, constant
//! cache, global memory through L1/L2, ...).

use serde::{Deserialize, Serialize};

/// Logical memory region a reference targets.
///
/// Variant order is significant: it is the primary sort key of
/// [`MemorySpace`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SpaceKind {
    #[default]
    Undefined,
    Register,
    Local,
    Shared,
    ParamUnclassified,
    /// Global to all threads in a kernel, read-only
    ParamKernel,
    /// Local to a thread, read-writable
    ParamLocal,
    Constant,
    Texture,
    Surface,
    Global,
    Generic,
    Instruction,
}

impl SpaceKind {
    /// PTX state-space name.
    pub fn ptx_name(self) -> &'static str {
        match self {
            SpaceKind::Undefined => ".undefined",
            SpaceKind::Register => ".reg",
            SpaceKind::Local => ".local",
            SpaceKind::Shared => ".shared",
            SpaceKind::ParamUnclassified => ".param",
            SpaceKind::ParamKernel => ".param::entry",
            SpaceKind::ParamLocal => ".param::func",
            SpaceKind::Constant => ".const",
            SpaceKind::Texture => ".tex",
            SpaceKind::Surface => ".surf",
            SpaceKind::Global => ".global",
            SpaceKind::Generic => ".generic",
            SpaceKind::Instruction => ".instruction",
        }
    }
}

/// Address-space descriptor: a space kind plus a bank.
///
/// The bank is the `n` in `.const[n]`; `.const` is the same as `.const[0]`.
/// Ordering is by kind first, then bank (field order of the derive).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MemorySpace {
    kind: SpaceKind,
    bank: u32,
}

impl MemorySpace {
    pub fn new(kind: SpaceKind) -> Self {
        MemorySpace { kind, bank: 0 }
    }

    pub fn with_bank(kind: SpaceKind, bank: u32) -> Self {
        MemorySpace { kind, bank }
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    pub fn bank(&self) -> u32 {
        self.bank
    }

    /// Select which constant bank this reference targets.
    pub fn set_bank(&mut self, bank: u32) {
        self.bank = bank;
    }
}

impl From<SpaceKind> for MemorySpace {
    fn from(kind: SpaceKind) -> Self {
        MemorySpace::new(kind)
    }
}

impl std::fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.kind, self.bank) {
            (kind, 0) => write!(f, "{}", kind.ptx_name()),
            (kind, bank) => write!(f, "{}[{}]", kind.ptx_name(), bank),
        }
    }
}

/// Memory operation kind as seen by the timing model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryOp {
    #[default]
    None,
    Load,
    Store,
}

//! Scalar (per-thread) instruction descriptor.
//! Holds the fields the timing model can see for one decoded instruction,
//! independent of SIMT width. The warp-wide form lives in `warp.rs`.

use serde::{Deserialize, Serialize};

use crate::memory::{MemoryOp, MemorySpace};

/// Register numbers kept for bank conflict evaluation.
pub const MAX_REG_OPERANDS: usize = 8;

/// Program counter of an instruction that has not been decoded.
pub const INVALID_PC: u32 = u32::MAX;

/// Operation classes visible to the timing model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    #[default]
    NoOp,
    Alu,
    Sfu,
    AluSfu,
    Load,
    Store,
    Branch,
    Barrier,
    MemoryBarrier,
}

impl OpType {
    pub fn is_memory(self) -> bool {
        matches!(self, OpType::Load | OpType::Store)
    }
}

/// One decoded instruction.
///
/// Unused register slots are `None`. The decoded flag can only be set by
/// [`decode`], so an `Instruction` straight from `Default` always reports
/// `!is_valid()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Program counter address of the instruction
    pub pc: u32,
    /// Encoded size in bytes
    pub encoded_size: u32,
    pub op: OpType,
    pub memory_op: MemoryOp,
    pub outputs: [Option<u32>; 4],
    pub inputs: [Option<u32>; 4],
    pub is_vector_in: bool,
    pub is_vector_out: bool,
    /// Predicate register number
    pub pred: Option<u32>,
    pub ar1: Option<u32>,
    pub ar2: Option<u32>,
    /// Register number for bank conflict evaluation
    pub arch_reg: [Option<u32>; MAX_REG_OPERANDS],
    /// 1/throughput, in cycles
    pub cycles: u32,
    /// Size of the word being operated on
    pub data_size: u32,
    pub space: MemorySpace,
    decoded: bool,
}

impl Default for Instruction {
    fn default() -> Self {
        Instruction {
            pc: INVALID_PC,
            encoded_size: 0,
            op: OpType::NoOp,
            memory_op: MemoryOp::None,
            outputs: [None; 4],
            inputs: [None; 4],
            is_vector_in: false,
            is_vector_out: false,
            pred: None,
            ar1: None,
            ar2: None,
            arch_reg: [None; MAX_REG_OPERANDS],
            cycles: 0,
            data_size: 0,
            space: MemorySpace::default(),
            decoded: false,
        }
    }
}

impl Instruction {
    pub fn is_valid(&self) -> bool {
        self.decoded
    }

    /// Write the diagnostic line for this instruction to `sink`.
    pub fn render<W: std::io::Write>(&self, sink: &mut W) -> std::io::Result<()> {
        write!(sink, "{self}")
    }

    /// Architectural registers in use, in slot order.
    pub fn arch_regs(&self) -> impl Iterator<Item = u32> + '_ {
        self.arch_reg.iter().flatten().copied()
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, " [inst @ pc=0x{:04x}] ", self.pc)
    }
}

/// Hook for instruction representations that the decoder fills in.
///
/// The decoder calls [`Decode::pre_decode`] before populating any field so a
/// wider representation can reset its own extra state first.
pub trait Decode {
    fn instruction_mut(&mut self) -> &mut Instruction;

    fn pre_decode(&mut self) {}
}

impl Decode for Instruction {
    fn instruction_mut(&mut self) -> &mut Instruction {
        self
    }
}

/// Decode into `target`: run its pre-decode hook, let `populate` fill the
/// fields, then mark it decoded.
pub fn decode<D, F>(target: &mut D, populate: F)
where
    D: Decode + ?Sized,
    F: FnOnce(&mut Instruction),
{
    target.pre_decode();
    let inst = target.instruction_mut();
    populate(&mut *inst);
    inst.decoded = true;
    log::trace!("decoded{}op={:?}", inst, inst.op);
}

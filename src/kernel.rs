//! Kernel launch bookkeeping.
//! A `KernelInfo` describes one kernel dispatch and hands out block (CTA) and
//! thread coordinates to the dispatcher in row-major order.

use serde::{Deserialize, Serialize};

use crate::dim3::Dim3;

/// Opaque handle to a kernel's entry function.
///
/// The function itself (its code, symbol table, etc.) is owned by whatever
/// loaded the program; a launch only remembers which one it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub usize);

/// Resource usage reported for a kernel (ptxinfo).
/// All fields are zero when no ptxinfo is available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelResources {
    /// Local memory bytes per thread
    pub lmem: u32,
    /// Shared memory bytes per block
    pub smem: u32,
    /// Constant memory bytes
    pub cmem: u32,
    /// Registers per thread
    pub regs: u32,
    pub ptx_version: u32,
    pub sm_target: u32,
}

/// One kernel argument: its bytes and where they land in parameter memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArg {
    pub data: Vec<u8>,
    pub offset: usize,
}

impl KernelArg {
    pub fn new(data: impl Into<Vec<u8>>, offset: usize) -> Self {
        KernelArg {
            data: data.into(),
            offset,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A kernel launch: grid and block shape plus the dispatch cursors.
///
/// Both cursors only move forward in row-major order. The thread cursor is
/// reset every time the block cursor advances.
#[derive(Debug, Clone, Default)]
pub struct KernelInfo {
    valid: bool,
    entry: Option<EntryId>,
    grid_dim: Dim3,
    block_dim: Dim3,
    next_block: Dim3,
    next_thread: Dim3,
    resources: KernelResources,
    args: Vec<KernelArg>,
}

impl KernelInfo {
    pub fn new(grid_dim: Dim3, block_dim: Dim3, entry: EntryId) -> Self {
        log::debug!(
            "kernel launch: entry={:?} grid={} block={}",
            entry,
            grid_dim,
            block_dim
        );
        KernelInfo {
            valid: true,
            entry: Some(entry),
            grid_dim,
            block_dim,
            next_block: Dim3::ZERO,
            next_thread: Dim3::ZERO,
            resources: KernelResources::default(),
            args: Vec::new(),
        }
    }

    pub fn with_resources(mut self, resources: KernelResources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_args(mut self, args: Vec<KernelArg>) -> Self {
        self.args = args;
        self
    }

    /// False for a default-constructed launch.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn entry(&self) -> Option<EntryId> {
        self.entry
    }

    pub fn grid_dim(&self) -> Dim3 {
        self.grid_dim
    }

    pub fn block_dim(&self) -> Dim3 {
        self.block_dim
    }

    pub fn resources(&self) -> &KernelResources {
        &self.resources
    }

    pub fn args(&self) -> &[KernelArg] {
        &self.args
    }

    /// Bytes of parameter memory the arguments span.
    pub fn param_bytes(&self) -> usize {
        self.args
            .iter()
            .map(|arg| arg.offset + arg.len())
            .max()
            .unwrap_or(0)
    }

    /// Total number of thread blocks in the grid
    pub fn num_blocks(&self) -> u64 {
        self.grid_dim.size()
    }

    /// Total number of threads per block
    pub fn threads_per_block(&self) -> u64 {
        self.block_dim.size()
    }

    pub fn next_block_id(&self) -> Dim3 {
        self.next_block
    }

    /// Move on to the next block and rewind the thread cursor.
    pub fn advance_block(&mut self) {
        self.next_block.advance_within(self.grid_dim);
        self.next_thread = Dim3::ZERO;
        log::trace!("next block {}", self.next_block);
    }

    /// True once the block cursor sits at or past the grid bound on any axis.
    ///
    /// Only z can actually overflow under the carry rule; x and y are
    /// checked as well so a cursor that was never valid reads as exhausted.
    pub fn blocks_exhausted(&self) -> bool {
        self.next_block.any_at_or_beyond(self.grid_dim)
    }

    pub fn advance_thread(&mut self) {
        self.next_thread.advance_within(self.block_dim);
    }

    pub fn next_thread_id_3d(&self) -> Dim3 {
        self.next_thread
    }

    pub fn next_thread_id(&self) -> u32 {
        self.next_thread.linearize(self.block_dim)
    }

    pub fn threads_remaining_in_block(&self) -> bool {
        self.next_thread.is_within(self.block_dim)
    }
}

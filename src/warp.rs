//! Warp-wide (SIMT) instructions.
//! A `WarpInstruction` is a decoded instruction widened to a warp: which lanes
//! execute it, which warp issued it and when, and per-lane memory state
//! (effective address, cache miss, deferred atomic completion).
//!
//! Pipeline stages own warp instructions as slots. A slot is either empty or
//! holds one issued instruction; `move_warp` hands an instruction to the next
//! stage without copying its per-lane state.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use bitvec::BitArr;

use crate::callback::{Completion, CompletionFn};
use crate::config::CoreConfig;
use crate::instruction::{Decode, Instruction};

pub const MAX_WARP_SIZE: usize = 32; // Standard CUDA warp size

/// One bit per lane; bit i is lane i.
pub type ActiveMask = BitArr!(for MAX_WARP_SIZE, in u32);

/// Effective memory address as produced by address generation.
pub type Address = u64;

/// Per-lane memory state.
#[derive(Debug)]
pub struct PerLaneInfo<T> {
    pub addr: Address,
    pub cache_miss: bool,
    pub callback: Completion<T>,
}

impl<T> Default for PerLaneInfo<T> {
    fn default() -> Self {
        PerLaneInfo {
            addr: 0,
            cache_miss: false,
            callback: Completion::default(),
        }
    }
}

impl<T> Clone for PerLaneInfo<T> {
    fn clone(&self) -> Self {
        PerLaneInfo {
            addr: self.addr,
            cache_miss: self.cache_miss,
            callback: self.callback.clone(),
        }
    }
}

/// A warp instruction slot. `T` is the functional simulator's per-thread
/// context that atomic completions run against.
#[derive(Debug)]
pub struct WarpInstruction<T> {
    inst: Instruction,
    warp_size: usize,
    empty: bool,
    issue_cycle: u64,
    is_atomic: bool,
    warp_id: usize,
    active_mask: ActiveMask,
    /// Allocated on first address or callback, always `warp_size` long.
    lanes: Option<Box<[PerLaneInfo<T>]>>,
}

impl<T> WarpInstruction<T> {
    pub fn new(warp_size: usize) -> Self {
        assert!(
            warp_size <= MAX_WARP_SIZE,
            "warp size {warp_size} exceeds the maximum of {MAX_WARP_SIZE}"
        );
        WarpInstruction {
            inst: Instruction::default(),
            warp_size,
            empty: true,
            issue_cycle: 0,
            is_atomic: false,
            warp_id: 0,
            active_mask: ActiveMask::ZERO,
            lanes: None,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.warp_size as usize)
    }

    /// Occupy this slot: lane i is active iff bit i of `mask` is set.
    /// Mask bits at or above the warp size are ignored.
    ///
    /// Atomic completions bound for a previous occupant are dropped; the
    /// memory pipeline binds fresh ones after issue.
    pub fn issue(&mut self, mask: u32, warp_id: usize, cycle: u64) {
        assert!(
            self.empty,
            "issue of warp {warp_id} onto a slot still holding warp {}",
            self.warp_id
        );
        self.active_mask = ActiveMask::ZERO;
        for lane in 0..self.warp_size {
            self.active_mask.set(lane, mask & (1 << lane) != 0);
        }
        self.is_atomic = false;
        if let Some(lanes) = &mut self.lanes {
            for info in lanes.iter_mut() {
                info.callback = Completion::default();
            }
        }
        self.warp_id = warp_id;
        self.issue_cycle = cycle;
        self.empty = false;
        if self.active_count() == 0 {
            log::warn!("warp {} issued with no active lanes", warp_id);
        }
        log::trace!(
            "issue warp={} cycle={}{}mask={}",
            warp_id,
            cycle,
            self.inst,
            self.mask_bits()
        );
    }

    /// Vacate the slot. Per-lane storage is kept but means nothing until the
    /// next issue, which drops any callbacks still bound.
    pub fn clear(&mut self) {
        self.empty = true;
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn warp_size(&self) -> usize {
        self.warp_size
    }

    pub fn warp_id(&self) -> usize {
        assert!(!self.empty, "warp id of an empty warp instruction");
        self.warp_id
    }

    pub fn issue_cycle(&self) -> u64 {
        assert!(!self.empty, "issue cycle of an empty warp instruction");
        self.issue_cycle
    }

    pub fn is_active(&self, lane: usize) -> bool {
        assert!(lane < self.warp_size, "lane {lane} out of range");
        self.active_mask[lane]
    }

    pub fn active_mask(&self) -> &ActiveMask {
        &self.active_mask
    }

    pub fn active_count(&self) -> usize {
        self.active_mask.count_ones()
    }

    pub fn is_atomic(&self) -> bool {
        self.is_atomic
    }

    /// Per-lane state, if any lane has needed it yet.
    pub fn lanes(&self) -> Option<&[PerLaneInfo<T>]> {
        self.lanes.as_deref()
    }

    fn lanes_mut(&mut self) -> &mut [PerLaneInfo<T>] {
        let warp_size = self.warp_size;
        self.lanes
            .get_or_insert_with(|| (0..warp_size).map(|_| PerLaneInfo::default()).collect())
    }

    pub fn set_address(&mut self, lane: usize, addr: Address) {
        self.lanes_mut()[lane].addr = addr;
    }

    /// Effective address recorded for `lane`. Only meaningful for lanes that
    /// were given one with [`WarpInstruction::set_address`].
    pub fn address(&self, lane: usize) -> Address {
        let Some(lanes) = &self.lanes else {
            panic!("address of lane {lane} requested before any address was set");
        };
        lanes[lane].addr
    }

    pub fn set_cache_miss(&mut self, lane: usize, miss: bool) {
        self.lanes_mut()[lane].cache_miss = miss;
    }

    pub fn cache_miss(&self, lane: usize) -> bool {
        self.lanes
            .as_ref()
            .is_some_and(|lanes| lanes[lane].cache_miss)
    }

    /// Park the functional effect of an atomic for `lane`. Marks the whole
    /// instruction atomic.
    pub fn add_callback(
        &mut self,
        lane: usize,
        function: CompletionFn<T>,
        instruction: &Rc<Instruction>,
        thread: &Rc<RefCell<T>>,
    ) {
        self.lanes_mut()[lane].callback = Completion::new(function, instruction, thread);
        self.is_atomic = true;
    }

    pub fn has_callback(&self, lane: usize) -> bool {
        self.active_mask[lane]
            && self
                .lanes
                .as_ref()
                .is_some_and(|lanes| lanes[lane].callback.is_bound())
    }

    /// Apply every parked atomic effect, lowest lane first. Lanes that are
    /// inactive or have no thread context are skipped. Returns how many ran.
    ///
    /// Called once by the memory pipeline after the atomic access completes.
    pub fn run_atomic_completions(&self) -> usize {
        assert!(
            self.is_atomic && !self.empty,
            "atomic completion on {} warp instruction",
            if self.empty { "an empty" } else { "a non-atomic" }
        );
        let Some(lanes) = &self.lanes else {
            return 0;
        };
        let mut ran = 0;
        for (lane, info) in lanes.iter().enumerate() {
            if self.active_mask[lane] && info.callback.invoke() {
                ran += 1;
            }
        }
        log::trace!("warp {} ran {} atomic completions", self.warp_id, ran);
        ran
    }

    /// Active mask as a string, most significant lane first.
    pub fn mask_bits(&self) -> String {
        (0..self.warp_size)
            .rev()
            .map(|lane| if self.active_mask[lane] { '1' } else { '0' })
            .collect()
    }

    /// Write the diagnostic line for this instruction to `sink`.
    pub fn render<W: std::io::Write>(&self, sink: &mut W) -> std::io::Result<()> {
        write!(sink, "{self}")
    }
}

impl<T> Deref for WarpInstruction<T> {
    type Target = Instruction;

    fn deref(&self) -> &Instruction {
        &self.inst
    }
}

impl<T> DerefMut for WarpInstruction<T> {
    fn deref_mut(&mut self) -> &mut Instruction {
        &mut self.inst
    }
}

impl<T> Decode for WarpInstruction<T> {
    fn instruction_mut(&mut self) -> &mut Instruction {
        &mut self.inst
    }

    /// A freshly decoded instruction has touched no memory yet.
    fn pre_decode(&mut self) {
        self.is_atomic = false;
        self.lanes = None;
    }
}

impl<T> std::fmt::Display for WarpInstruction<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.inst, self.mask_bits())
    }
}

/// Hand the instruction in `src` to `dst`, leaving `src` empty.
///
/// `dst` must be empty. The two slots swap storage, so no per-lane state is
/// copied and `src` ends up with `dst`'s old (empty) allocation.
pub fn move_warp<T>(dst: &mut WarpInstruction<T>, src: &mut WarpInstruction<T>) {
    assert!(dst.is_empty(), "move into a non-empty warp instruction slot");
    std::mem::swap(dst, src);
    src.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{OpType, decode};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[derive(Debug, Default)]
    struct ThreadCtx {
        lane: usize,
        log: Rc<RefCell<Vec<usize>>>,
    }

    fn record(_inst: &Instruction, ctx: &mut ThreadCtx) {
        ctx.log.borrow_mut().push(ctx.lane);
    }

    fn atomic_inst() -> Rc<Instruction> {
        let mut inst = Instruction::default();
        decode(&mut inst, |i| {
            i.pc = 0x80;
            i.op = OpType::Load;
        });
        Rc::new(inst)
    }

    fn threads(n: usize, log: &Rc<RefCell<Vec<usize>>>) -> Vec<Rc<RefCell<ThreadCtx>>> {
        (0..n)
            .map(|lane| {
                Rc::new(RefCell::new(ThreadCtx {
                    lane,
                    log: Rc::clone(log),
                }))
            })
            .collect()
    }

    #[test]
    fn new_slot_is_empty_and_unallocated() {
        let w: WarpInstruction<ThreadCtx> = WarpInstruction::new(32);
        assert!(w.is_empty());
        assert!(!w.is_atomic());
        assert!(w.lanes().is_none());
        assert!(!w.is_valid());
        assert_eq!(w.active_count(), 0);
    }

    #[test]
    #[should_panic(expected = "exceeds the maximum")]
    fn oversized_warp_panics() {
        let _w: WarpInstruction<ThreadCtx> = WarpInstruction::new(MAX_WARP_SIZE + 1);
    }

    #[test]
    fn issue_sets_mask_id_and_cycle() {
        let mut w: WarpInstruction<ThreadCtx> = WarpInstruction::new(8);
        w.issue(0b1010_0101, 3, 100);
        assert!(!w.is_empty());
        assert_eq!(w.warp_id(), 3);
        assert_eq!(w.issue_cycle(), 100);
        let active: Vec<bool> = (0..8).map(|l| w.is_active(l)).collect();
        assert_eq!(
            active,
            vec![true, false, true, false, false, true, false, true]
        );
        assert_eq!(w.mask_bits(), "10100101");
    }

    #[test]
    fn issue_ignores_bits_beyond_warp_size() {
        let mut w: WarpInstruction<ThreadCtx> = WarpInstruction::new(4);
        w.issue(u32::MAX, 0, 0);
        assert_eq!(w.active_count(), 4);
    }

    #[test]
    fn reissue_after_clear_replaces_mask() {
        let mut w: WarpInstruction<ThreadCtx> = WarpInstruction::new(4);
        w.issue(0b1111, 0, 0);
        w.clear();
        assert!(w.is_empty());
        w.issue(0b0001, 1, 5);
        assert_eq!(w.mask_bits(), "0001");
    }

    #[test]
    fn issue_with_empty_mask_is_legal() {
        let mut w: WarpInstruction<ThreadCtx> = WarpInstruction::new(8);
        w.issue(0, 4, 1);
        assert!(!w.is_empty());
        assert_eq!(w.active_count(), 0);
        assert_eq!(w.mask_bits(), "00000000");
    }

    #[test]
    fn reissued_slot_does_not_replay_previous_atomics() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let ctxs = threads(4, &log);
        let inst = atomic_inst();
        let mut fetch = WarpInstruction::new(4);
        let mut mem = WarpInstruction::new(4);

        mem.issue(0b0001, 0, 0);
        mem.add_callback(0, record, &inst, &ctxs[0]);
        assert_eq!(mem.run_atomic_completions(), 1);
        mem.clear();

        // the atomic slot's storage travels back to `fetch` through the swap
        fetch.issue(0b0001, 1, 1);
        move_warp(&mut mem, &mut fetch);
        mem.clear();
        fetch.issue(0b0001, 2, 2);
        assert!(!fetch.is_atomic());
        assert!(!fetch.has_callback(0));

        mem.issue(0b0001, 3, 3);
        assert!(!mem.is_atomic());
        assert!(!mem.has_callback(0));
        assert_eq!(*log.borrow(), vec![0]);
    }

    #[test]
    #[should_panic(expected = "onto a slot still holding")]
    fn issue_onto_occupied_slot_panics() {
        let mut w: WarpInstruction<ThreadCtx> = WarpInstruction::new(4);
        w.issue(0b1, 0, 0);
        w.issue(0b1, 1, 1);
    }

    #[test]
    fn addresses_allocate_lazily() {
        let mut w: WarpInstruction<ThreadCtx> = WarpInstruction::new(4);
        w.issue(0b0101, 0, 0);
        assert!(w.lanes().is_none());
        w.set_address(0, 0x1000);
        w.set_address(2, 0x2000);
        assert_eq!(w.lanes().map(<[_]>::len), Some(4));
        assert_eq!(w.address(0), 0x1000);
        assert_eq!(w.address(2), 0x2000);
        assert!(!w.is_atomic());
    }

    #[test]
    #[should_panic(expected = "before any address was set")]
    fn address_without_allocation_panics() {
        let mut w: WarpInstruction<ThreadCtx> = WarpInstruction::new(4);
        w.issue(0b1, 0, 0);
        w.address(0);
    }

    #[test]
    fn cache_miss_is_tracked_per_lane() {
        let mut w: WarpInstruction<ThreadCtx> = WarpInstruction::new(4);
        assert!(!w.cache_miss(1));
        w.set_cache_miss(1, true);
        assert!(w.cache_miss(1));
        assert!(!w.cache_miss(0));
    }

    #[test]
    fn completions_run_in_lane_order_once_each() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let ctxs = threads(4, &log);
        let inst = atomic_inst();
        let mut w = WarpInstruction::new(4);
        w.issue(0b0011, 2, 10);
        // bind out of order
        w.add_callback(1, record, &inst, &ctxs[1]);
        w.add_callback(0, record, &inst, &ctxs[0]);
        assert!(w.is_atomic());
        assert!(w.has_callback(0));
        assert!(w.has_callback(1));
        assert!(!w.has_callback(2));
        assert_eq!(w.run_atomic_completions(), 2);
        assert_eq!(*log.borrow(), vec![0, 1]);
    }

    #[test]
    fn inactive_lanes_are_skipped() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let ctxs = threads(4, &log);
        let inst = atomic_inst();
        let mut w = WarpInstruction::new(4);
        w.issue(0b1001, 0, 0);
        for lane in 0..4 {
            w.add_callback(lane, record, &inst, &ctxs[lane]);
        }
        assert!(!w.has_callback(1));
        assert_eq!(w.run_atomic_completions(), 2);
        assert_eq!(*log.borrow(), vec![0, 3]);
    }

    #[test]
    #[should_panic(expected = "non-atomic")]
    fn completions_on_non_atomic_panic() {
        let mut w: WarpInstruction<ThreadCtx> = WarpInstruction::new(4);
        w.issue(0b1, 0, 0);
        w.run_atomic_completions();
    }

    #[test]
    #[should_panic(expected = "empty")]
    fn completions_on_empty_panic() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let ctxs = threads(1, &log);
        let mut w = WarpInstruction::new(4);
        w.add_callback(0, record, &atomic_inst(), &ctxs[0]);
        w.run_atomic_completions();
    }

    #[test]
    fn render_shows_pc_and_mask_msb_first() {
        let mut w: WarpInstruction<ThreadCtx> = WarpInstruction::new(4);
        decode(&mut w, |i| i.pc = 0x30);
        w.issue(0b0011, 0, 0);
        let mut out = Vec::new();
        w.render(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), " [inst @ pc=0x0030] 0011");
    }

    #[test]
    fn decode_resets_lane_state() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let ctxs = threads(1, &log);
        let mut w = WarpInstruction::new(4);
        w.add_callback(0, record, &atomic_inst(), &ctxs[0]);
        w.set_address(0, 0x40);
        decode(&mut w, |i| i.op = OpType::Alu);
        assert!(w.is_valid());
        assert!(!w.is_atomic());
        assert!(w.lanes().is_none());
        assert_eq!(w.op, OpType::Alu);
    }

    #[test]
    fn move_warp_transfers_everything() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let ctxs = threads(4, &log);
        let inst = atomic_inst();
        let mut src = WarpInstruction::new(4);
        decode(&mut src, |i| i.pc = 0x44);
        src.issue(0b0110, 7, 99);
        src.set_address(1, 0xdead);
        src.add_callback(2, record, &inst, &ctxs[2]);
        let mut dst = WarpInstruction::new(4);

        move_warp(&mut dst, &mut src);

        assert!(src.is_empty());
        assert!(!dst.is_empty());
        assert_eq!(dst.pc, 0x44);
        assert_eq!(dst.warp_id(), 7);
        assert_eq!(dst.issue_cycle(), 99);
        assert_eq!(dst.mask_bits(), "0110");
        assert_eq!(dst.address(1), 0xdead);
        assert!(dst.is_atomic());
        assert!(dst.has_callback(2));
        assert_eq!(dst.run_atomic_completions(), 1);
        assert_eq!(*log.borrow(), vec![2]);
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn move_into_occupied_slot_panics() {
        let mut src: WarpInstruction<ThreadCtx> = WarpInstruction::new(4);
        let mut dst: WarpInstruction<ThreadCtx> = WarpInstruction::new(4);
        src.issue(0b1, 0, 0);
        dst.issue(0b1, 1, 0);
        move_warp(&mut dst, &mut src);
    }

    fn lane_snapshot<T>(w: &WarpInstruction<T>) -> Option<Vec<(Address, bool, bool)>> {
        w.lanes().map(|lanes| {
            lanes
                .iter()
                .map(|l| (l.addr, l.cache_miss, l.callback.is_bound()))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn issue_mask_matches_active_lanes(width in 0usize..=MAX_WARP_SIZE, mask in any::<u32>()) {
            let mut w: WarpInstruction<ThreadCtx> = WarpInstruction::new(width);
            w.issue(mask, 0, 0);
            for lane in 0..width {
                prop_assert_eq!(w.is_active(lane), mask & (1 << lane) != 0);
            }
        }

        #[test]
        fn move_warp_preserves_lane_state(
            width in 1usize..=MAX_WARP_SIZE,
            mask in prop_oneof![Just(0u32), Just(u32::MAX), any::<u32>()],
            atomic in any::<bool>(),
            addrs in proptest::collection::vec(any::<u64>(), MAX_WARP_SIZE),
        ) {
            let log = Rc::new(RefCell::new(Vec::new()));
            let ctxs = threads(width, &log);
            let inst = atomic_inst();
            let mut src = WarpInstruction::new(width);
            src.issue(mask, 1, 2);
            for lane in 0..width {
                src.set_address(lane, addrs[lane]);
                src.set_cache_miss(lane, addrs[lane] % 2 == 0);
                if atomic {
                    src.add_callback(lane, record, &inst, &ctxs[lane]);
                }
            }
            let before = lane_snapshot(&src);
            let mask_before = src.mask_bits();

            let mut dst = WarpInstruction::new(width);
            move_warp(&mut dst, &mut src);

            prop_assert!(src.is_empty());
            prop_assert!(!dst.is_empty());
            prop_assert_eq!(dst.is_atomic(), atomic);
            prop_assert_eq!(dst.mask_bits(), mask_before);
            prop_assert_eq!(lane_snapshot(&dst), before);
        }
    }
}

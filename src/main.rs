use std::cell::{Cell, RefCell};
use std::rc::Rc;

use simtcore::config::CoreConfig;
use simtcore::device::DeviceRegistry;
use simtcore::dim3::Dim3;
use simtcore::instruction::{Instruction, OpType, decode};
use simtcore::kernel::{EntryId, KernelInfo};
use simtcore::memory::{MemoryOp, MemorySpace, SpaceKind};
use simtcore::sm::{Core, FunctionalCore};
use simtcore::warp::{WarpInstruction, move_warp};

/// Functional state of one simulated thread.
struct ThreadState {
    global_id: u64,
    counter: Rc<Cell<u64>>,
}

/// atom.global.add.u32 [counter], 1
fn atomic_add(_inst: &Instruction, thread: &mut ThreadState) {
    thread.counter.set(thread.counter.get() + 1);
}

fn lane_mask(lanes: usize) -> u32 {
    if lanes >= 32 { u32::MAX } else { (1u32 << lanes) - 1 }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::h100(),
    };
    let warp_size = config.warp_size as usize;

    let mut devices = DeviceRegistry::new();
    let device = devices.register("h100", config.clone());
    let mut core = FunctionalCore::new(0, device, &config);
    println!(
        "[simtcore] device {} with {} cores, warp size {}",
        device, config.num_cores, warp_size
    );

    let mut atom = Instruction::default();
    decode(&mut atom, |i| {
        i.pc = 0x120;
        i.encoded_size = 8;
        i.op = OpType::Load;
        i.memory_op = MemoryOp::Load;
        i.space = MemorySpace::new(SpaceKind::Global);
        i.data_size = 4;
        i.cycles = 4;
    });
    let atom = Rc::new(atom);

    let mut kernel = KernelInfo::new(Dim3::x(4), Dim3::x(80), EntryId(0));
    println!(
        "[simtcore] Launching kernel: grid={} block={} ({} blocks x {} threads)",
        kernel.grid_dim(),
        kernel.block_dim(),
        kernel.num_blocks(),
        kernel.threads_per_block()
    );

    let counter = Rc::new(Cell::new(0u64));
    let counter_base: u64 = 0x1000;
    let mut issue_slot: WarpInstruction<ThreadState> = WarpInstruction::from_config(&config);
    let mut mem_slot: WarpInstruction<ThreadState> = WarpInstruction::from_config(&config);
    let mut cycle = 0u64;
    let mut warps_issued = 0;

    while !kernel.blocks_exhausted() {
        let block = kernel.next_block_id();
        let cta_id = block.linearize(kernel.grid_dim()) as usize;

        // hand out this block's threads
        let mut threads = Vec::new();
        while kernel.threads_remaining_in_block() {
            let tid = kernel.next_thread_id();
            threads.push(Rc::new(RefCell::new(ThreadState {
                global_id: cta_id as u64 * kernel.threads_per_block() + u64::from(tid),
                counter: Rc::clone(&counter),
            })));
            kernel.advance_thread();
        }

        let warps: Vec<_> = threads.chunks(warp_size).collect();
        for warp_id in 0..warps.len() {
            core.assign_warp(cta_id, warp_id);
        }

        for (warp_id, lanes) in warps.iter().enumerate() {
            decode(&mut issue_slot, |i| *i = (*atom).clone());
            issue_slot.issue(lane_mask(lanes.len()), warp_id, cycle);
            for (lane, thread) in lanes.iter().enumerate() {
                let addr = counter_base + thread.borrow().global_id % 4;
                issue_slot.set_address(lane, addr);
                issue_slot.add_callback(lane, atomic_add, &atom, thread);
            }
            core.begin_atomic(warp_id);
            move_warp(&mut mem_slot, &mut issue_slot);

            // the access completes some cycles later
            cycle += u64::from(mem_slot.cycles);
            mem_slot.run_atomic_completions();
            core.complete_atomic(warp_id);
            mem_slot.clear();
            warps_issued += 1;
            cycle += 1;
        }

        for warp_id in 0..warps.len() {
            core.notify_barrier_arrival(cta_id, warp_id);
        }
        let released = (0..warps.len()).all(|w| !core.is_waiting_at_barrier(w));
        log::debug!("block {} barrier released: {}", block, released);

        for warp_id in 0..warps.len() {
            core.notify_warp_exit(warp_id);
        }
        kernel.advance_block();
    }

    println!(
        "[simtcore] Kernel complete: {} warps issued over {} cycles, counter = {}",
        warps_issued,
        cycle,
        counter.get()
    );
    Ok(())
}

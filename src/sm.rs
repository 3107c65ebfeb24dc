//! Streaming multiprocessor (core) capability contract.
//!
//! The barrier unit and warp scheduler talk to a simulated execution core only
//! through the `Core` trait: they report barrier arrivals and warp exits, and
//! poll whether a warp is blocked on a barrier or on outstanding atomics.
//! Each timing-model variant provides one implementation; `FunctionalCore` is
//! the one used for functional-only simulation.

use std::collections::HashMap;

use bitvec::vec::BitVec;

use crate::config::CoreConfig;
use crate::device::DeviceId;

pub trait Core {
    /// Warp `warp_id` of CTA `cta_id` reached a barrier. Repeated arrivals
    /// before the barrier releases are harmless.
    fn notify_barrier_arrival(&mut self, cta_id: usize, warp_id: usize);

    /// The warp retired for good. It never waits on anything again.
    fn notify_warp_exit(&mut self, warp_id: usize);

    /// True from arrival until every live warp of the CTA has arrived.
    fn is_waiting_at_barrier(&self, warp_id: usize) -> bool;

    /// True while the warp has atomics whose completion has not run.
    fn is_waiting_for_atomics(&self, warp_id: usize) -> bool;

    /// The device this core belongs to. Shared by all of its cores.
    fn device(&self) -> DeviceId;
}

/// Barrier state of one CTA resident on a core.
#[derive(Debug, Clone)]
struct CtaBarrier {
    /// Live warps of the CTA
    members: BitVec,
    /// Live warps waiting at the current barrier
    arrived: BitVec,
}

impl CtaBarrier {
    fn new(max_warps: usize) -> Self {
        CtaBarrier {
            members: BitVec::repeat(false, max_warps),
            arrived: BitVec::repeat(false, max_warps),
        }
    }

    fn all_arrived(&self) -> bool {
        self.members.iter_ones().all(|warp| self.arrived[warp])
    }
}

/// Barrier and atomic bookkeeping for one simulated core.
#[derive(Debug)]
pub struct FunctionalCore {
    id: usize,
    device: DeviceId,
    max_warps: usize,
    /// CTA each warp slot belongs to
    warp_cta: Vec<Option<usize>>,
    ctas: HashMap<usize, CtaBarrier>,
    /// Outstanding atomics per warp
    pending_atomics: Vec<u32>,
    exited: BitVec,
}

impl FunctionalCore {
    pub fn new(id: usize, device: DeviceId, config: &CoreConfig) -> Self {
        let max_warps = config.max_warps_per_core as usize;
        FunctionalCore {
            id,
            device,
            max_warps,
            warp_cta: vec![None; max_warps],
            ctas: HashMap::new(),
            pending_atomics: vec![0; max_warps],
            exited: BitVec::repeat(false, max_warps),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    fn check_warp(&self, warp_id: usize) {
        assert!(
            warp_id < self.max_warps,
            "warp {warp_id} out of range on core {} (max {})",
            self.id,
            self.max_warps
        );
    }

    /// Place a warp slot in a CTA. Done when the CTA is launched on this core.
    pub fn assign_warp(&mut self, cta_id: usize, warp_id: usize) {
        self.check_warp(warp_id);
        if let Some(old) = self.warp_cta[warp_id] {
            assert_eq!(
                old, cta_id,
                "warp {warp_id} already belongs to CTA {old} on core {}",
                self.id
            );
        }
        self.warp_cta[warp_id] = Some(cta_id);
        self.exited.set(warp_id, false);
        self.ctas
            .entry(cta_id)
            .or_insert_with(|| CtaBarrier::new(self.max_warps))
            .members
            .set(warp_id, true);
    }

    /// CTA a warp currently belongs to, if any.
    pub fn cta_of(&self, warp_id: usize) -> Option<usize> {
        self.warp_cta.get(warp_id).copied().flatten()
    }

    /// The memory pipeline accepted an atomic from this warp.
    pub fn begin_atomic(&mut self, warp_id: usize) {
        self.check_warp(warp_id);
        if self.exited[warp_id] {
            log::warn!(
                "core {}: ignoring atomic from exited warp {}",
                self.id,
                warp_id
            );
            return;
        }
        self.pending_atomics[warp_id] += 1;
    }

    /// An atomic from this warp finished and its completions ran.
    pub fn complete_atomic(&mut self, warp_id: usize) {
        self.check_warp(warp_id);
        if self.exited[warp_id] {
            return;
        }
        assert!(
            self.pending_atomics[warp_id] > 0,
            "atomic completion for warp {warp_id} with none outstanding"
        );
        self.pending_atomics[warp_id] -= 1;
    }

    fn try_release(&mut self, cta_id: usize) {
        let Some(cta) = self.ctas.get_mut(&cta_id) else {
            return;
        };
        if cta.members.not_any() {
            self.ctas.remove(&cta_id);
            return;
        }
        if !cta.all_arrived() {
            return;
        }
        log::debug!("core {}: CTA {} released from barrier", self.id, cta_id);
        cta.arrived.fill(false);
    }
}

impl Core for FunctionalCore {
    fn notify_barrier_arrival(&mut self, cta_id: usize, warp_id: usize) {
        self.check_warp(warp_id);
        if self.exited[warp_id] {
            log::warn!(
                "core {}: ignoring barrier arrival of exited warp {}",
                self.id,
                warp_id
            );
            return;
        }
        assert_eq!(
            self.warp_cta[warp_id],
            Some(cta_id),
            "warp {warp_id} arrived at a barrier of CTA {cta_id} it does not belong to"
        );
        if let Some(cta) = self.ctas.get_mut(&cta_id) {
            cta.arrived.set(warp_id, true);
        }
        log::trace!("core {}: warp {} at barrier (CTA {})", self.id, warp_id, cta_id);
        self.try_release(cta_id);
    }

    fn notify_warp_exit(&mut self, warp_id: usize) {
        self.check_warp(warp_id);
        self.exited.set(warp_id, true);
        self.pending_atomics[warp_id] = 0;
        if let Some(cta_id) = self.warp_cta[warp_id].take() {
            if let Some(cta) = self.ctas.get_mut(&cta_id) {
                cta.members.set(warp_id, false);
                cta.arrived.set(warp_id, false);
            }
            log::trace!("core {}: warp {} exited (CTA {})", self.id, warp_id, cta_id);
            // the remaining warps may now all be waiting
            self.try_release(cta_id);
        }
    }

    fn is_waiting_at_barrier(&self, warp_id: usize) -> bool {
        self.check_warp(warp_id);
        self.cta_of(warp_id)
            .and_then(|cta_id| self.ctas.get(&cta_id))
            .is_some_and(|cta| cta.arrived[warp_id])
    }

    fn is_waiting_for_atomics(&self, warp_id: usize) -> bool {
        self.check_warp(warp_id);
        self.pending_atomics[warp_id] > 0
    }

    fn device(&self) -> DeviceId {
        self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn core_with_cta(warps: &[usize]) -> FunctionalCore {
        let mut core = FunctionalCore::new(0, DeviceId(0), &CoreConfig::h100());
        for &w in warps {
            core.assign_warp(1, w);
        }
        core
    }

    #[test]
    fn barrier_releases_when_all_warps_arrive() {
        let mut core = core_with_cta(&[0, 1, 2]);
        core.notify_barrier_arrival(1, 0);
        core.notify_barrier_arrival(1, 2);
        assert!(core.is_waiting_at_barrier(0));
        assert!(!core.is_waiting_at_barrier(1));
        assert!(core.is_waiting_at_barrier(2));

        core.notify_barrier_arrival(1, 1);
        for w in 0..3 {
            assert!(!core.is_waiting_at_barrier(w));
        }
    }

    #[test]
    fn duplicate_arrivals_are_idempotent() {
        let mut core = core_with_cta(&[0, 1]);
        core.notify_barrier_arrival(1, 0);
        core.notify_barrier_arrival(1, 0);
        assert!(core.is_waiting_at_barrier(0));
        core.notify_barrier_arrival(1, 1);
        assert!(!core.is_waiting_at_barrier(0));
        assert!(!core.is_waiting_at_barrier(1));
    }

    #[test]
    fn exit_of_last_straggler_releases_barrier() {
        let mut core = core_with_cta(&[0, 1]);
        core.notify_barrier_arrival(1, 0);
        assert!(core.is_waiting_at_barrier(0));
        core.notify_warp_exit(1);
        assert!(!core.is_waiting_at_barrier(0));
        assert_eq!(core.cta_of(1), None);
    }

    #[test]
    fn exited_warp_never_waits_again() {
        let mut core = core_with_cta(&[0, 1]);
        core.begin_atomic(0);
        core.notify_barrier_arrival(1, 0);
        core.notify_warp_exit(0);
        assert!(!core.is_waiting_at_barrier(0));
        assert!(!core.is_waiting_for_atomics(0));
        core.notify_barrier_arrival(1, 0);
        core.begin_atomic(0);
        core.complete_atomic(0);
        assert!(!core.is_waiting_at_barrier(0));
        assert!(!core.is_waiting_for_atomics(0));
    }

    #[test]
    fn atomics_are_counted_per_warp() {
        let mut core = core_with_cta(&[0, 1]);
        core.begin_atomic(0);
        core.begin_atomic(0);
        assert!(core.is_waiting_for_atomics(0));
        assert!(!core.is_waiting_for_atomics(1));
        core.complete_atomic(0);
        assert!(core.is_waiting_for_atomics(0));
        core.complete_atomic(0);
        assert!(!core.is_waiting_for_atomics(0));
    }

    #[test]
    fn ctas_release_independently() {
        let mut core = FunctionalCore::new(0, DeviceId(0), &CoreConfig::h100());
        core.assign_warp(0, 0);
        core.assign_warp(0, 1);
        core.assign_warp(1, 2);
        core.notify_barrier_arrival(0, 0);
        core.notify_barrier_arrival(1, 2);
        assert!(core.is_waiting_at_barrier(0));
        assert!(!core.is_waiting_at_barrier(2));
    }

    #[test]
    fn callers_see_the_trait_only() {
        let mut core = core_with_cta(&[0]);
        let handle: &mut dyn Core = &mut core;
        handle.notify_barrier_arrival(1, 0);
        assert!(!handle.is_waiting_at_barrier(0));
        assert_eq!(handle.device(), DeviceId(0));
    }

    #[test]
    #[should_panic(expected = "does not belong to")]
    fn arrival_for_foreign_cta_panics() {
        let mut core = core_with_cta(&[0]);
        core.notify_barrier_arrival(2, 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn barrier_query_beyond_core_limit_panics() {
        let core = core_with_cta(&[]);
        core.is_waiting_at_barrier(64);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn atomic_query_beyond_core_limit_panics() {
        let core = core_with_cta(&[]);
        core.is_waiting_for_atomics(64);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn warp_beyond_core_limit_panics() {
        let mut core = core_with_cta(&[]);
        core.begin_atomic(10_000);
    }
}

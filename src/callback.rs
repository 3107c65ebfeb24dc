//! Deferred completion of memory side effects.
//!
//! When a lane issues an atomic read-modify-write, its functional effect must
//! not land until the timing model says the access finished. The memory
//! pipeline parks the effect in a `Completion` and the warp instruction runs
//! it later (see `WarpInstruction::run_atomic_completions`).
//!
//! A completion never owns what it points at. The instruction is owned by the
//! decoder and the thread context by the functional simulator's thread pool;
//! both are held here as `Weak` and must outlive the completion run.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::instruction::Instruction;

/// Functional effect applied to a thread context once the access completes.
pub type CompletionFn<T> = fn(&Instruction, &mut T);

pub struct Completion<T> {
    function: Option<CompletionFn<T>>,
    instruction: Weak<Instruction>,
    thread: Option<Weak<RefCell<T>>>,
}

impl<T> Completion<T> {
    pub fn new(
        function: CompletionFn<T>,
        instruction: &Rc<Instruction>,
        thread: &Rc<RefCell<T>>,
    ) -> Self {
        Completion {
            function: Some(function),
            instruction: Rc::downgrade(instruction),
            thread: Some(Rc::downgrade(thread)),
        }
    }

    /// A function is bound.
    pub fn is_bound(&self) -> bool {
        self.function.is_some()
    }

    pub fn has_thread(&self) -> bool {
        self.thread.is_some()
    }

    /// Apply the deferred effect. Returns false when no thread context is
    /// bound and nothing ran.
    ///
    /// Panics if the instruction or thread context was dropped before the
    /// completion ran.
    pub fn invoke(&self) -> bool {
        let Some(thread) = &self.thread else {
            return false;
        };
        let Some(function) = self.function else {
            return false;
        };
        let Some(thread) = thread.upgrade() else {
            panic!("thread context dropped before its completion ran");
        };
        let Some(instruction) = self.instruction.upgrade() else {
            panic!("instruction dropped before its completion ran");
        };
        function(&instruction, &mut thread.borrow_mut());
        true
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Completion {
            function: None,
            instruction: Weak::new(),
            thread: None,
        }
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Completion {
            function: self.function,
            instruction: self.instruction.clone(),
            thread: self.thread.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("bound", &self.is_bound())
            .field("has_thread", &self.has_thread())
            .finish()
    }
}

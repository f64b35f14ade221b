//! Deferred execution for the in-process network.
//!
//! Every asynchronous step in this crate (data delivery, connect
//! completion, close and error notifications, write-queue flushing) is a
//! task deferred onto a [`Scheduler`]. Tasks never run inside the call that
//! deferred them; they run when the owner drives the scheduler with
//! [`Scheduler::step`] or [`Scheduler::run_until_idle`], strictly in the
//! order they were deferred.
//!
//! ```text
//!   channel.write(..) ──► defer(deliver) ─┐
//!   channel.destroy() ──► defer(close)  ──┤   FIFO   ┌──────────────┐
//!   registry.link(..) ──► defer(accept) ──┴────────► │ run_until_idle│
//!                                                    └──────────────┘
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

type Task = Box<dyn FnOnce()>;

/// Single-threaded FIFO task queue. Clones share the same queue.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    queue: RefCell<VecDeque<Task>>,
    budget: Cell<Option<usize>>,
    executed: Cell<u64>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scheduler whose `run_until_idle` stops after `budget` tasks.
    pub fn with_budget(budget: Option<usize>) -> Self {
        let scheduler = Self::default();
        scheduler.inner.budget.set(budget);
        scheduler
    }

    /// Queues `task` to run after everything already queued.
    pub fn defer<F>(&self, task: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Runs the oldest queued task.
    ///
    /// Returns `false` if the queue was empty.
    pub fn step(&self) -> bool {
        // Release the queue before running so the task can defer more work
        let task = self.inner.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                self.inner.executed.set(self.inner.executed.get() + 1);
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty or the task budget is spent.
    ///
    /// Returns the number of tasks executed.
    pub fn run_until_idle(&self) -> usize {
        let budget = self.inner.budget.get();
        let mut ran = 0;
        while budget.is_none_or(|limit| ran < limit) {
            if !self.step() {
                return ran;
            }
            ran += 1;
        }
        log::warn!(
            "Scheduler task budget of {} exhausted with {} tasks still queued",
            ran,
            self.pending()
        );
        ran
    }

    /// Runs at most `count` tasks, returning how many ran.
    pub fn run_steps(&self, count: usize) -> usize {
        (0..count).take_while(|_| self.step()).count()
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.queue.borrow().is_empty()
    }

    /// Total tasks run over the scheduler's lifetime.
    pub fn executed(&self) -> u64 {
        self.inner.executed.get()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("executed", &self.executed())
            .finish()
    }
}

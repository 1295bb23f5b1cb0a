//! The cooperative scheduler.
//!
//! Single-threaded: one ready-task list, one microtask queue, one timer
//! heap. Promise reactions are microtasks and drain after every task step,
//! in registration order, before any timer callback — the standard
//! microtask discipline. Tasks are futures polled with a no-op waker;
//! settlements bump a generation counter and the loop re-polls pending
//! tasks whenever it may have unblocked one.
//!
//! Timers return opaque handles accepted by `clearTimeout`/`clearInterval`;
//! canceling a pending handle prevents invocation.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;
use std::rc::Rc;
use tracing::trace;

use crate::value::{PromiseData, PromiseStatus, Reaction, Value};
use crate::{Engine, LocalBoxFuture, RtResult};

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    id: u64,
    callback: Value,
    args: Vec<Value>,
    interval: Option<Duration>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

enum Microtask {
    /// Run a user callback against a settlement and settle the derived
    /// promise from its result.
    Reaction {
        callback: Value,
        argument: Value,
        derived: Rc<PromiseData>,
    },
    /// Pure host job.
    Native(Box<dyn FnOnce()>),
}

#[derive(Default)]
pub struct Scheduler {
    tasks: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
    spawned: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
    microtasks: RefCell<VecDeque<Microtask>>,
    timers: RefCell<BinaryHeap<Reverse<TimerEntry>>>,
    cancelled_timers: RefCell<FxHashSet<u64>>,
    next_timer_id: Cell<u64>,
    next_seq: Cell<u64>,
    generation: Cell<u64>,
    rejected: RefCell<Vec<Rc<PromiseData>>>,
}

impl Scheduler {
    pub fn new() -> Rc<Self> {
        Rc::new(Scheduler::default())
    }

    fn bump(&self) {
        self.generation.set(self.generation.get() + 1);
    }

    // =========================================================================
    // Promises
    // =========================================================================

    /// Settle a promise and queue its reactions as microtasks.
    pub fn settle(&self, promise: &Rc<PromiseData>, value: Value, rejected: bool) {
        if !promise.is_pending() {
            return;
        }
        *promise.status.borrow_mut() = if rejected {
            PromiseStatus::Rejected
        } else {
            PromiseStatus::Fulfilled
        };
        *promise.value.borrow_mut() = Some(value.clone());
        if rejected {
            self.rejected.borrow_mut().push(Rc::clone(promise));
        }
        let reactions = std::mem::take(&mut *promise.reactions.borrow_mut());
        for reaction in reactions {
            self.queue_reaction(reaction, value.clone(), rejected);
        }
        self.bump();
    }

    /// Resolve: adopt the state of a promise result, otherwise fulfill.
    pub fn resolve(self: &Rc<Self>, promise: &Rc<PromiseData>, value: Value) {
        if let Value::Promise(inner) = &value {
            let derived = Rc::clone(promise);
            let scheduler = Rc::clone(self);
            self.subscribe_native(
                inner,
                Box::new(move |settled, was_rejected| {
                    scheduler.settle(&derived, settled, was_rejected);
                }),
            );
            return;
        }
        self.settle(promise, value, false);
    }

    fn queue_reaction(&self, reaction: Reaction, value: Value, rejected: bool) {
        match reaction {
            Reaction::CallUser { on_fulfilled, on_rejected, derived } => {
                let callback = if rejected { on_rejected } else { on_fulfilled };
                match callback {
                    Some(callback) => {
                        derived.handled.set(true);
                        self.microtasks.borrow_mut().push_back(Microtask::Reaction {
                            callback,
                            argument: value,
                            derived,
                        });
                    }
                    // No handler for this path: the settlement passes
                    // through unchanged.
                    None => self.settle(&derived, value, rejected),
                }
            }
            Reaction::Native(f) => {
                self.microtasks
                    .borrow_mut()
                    .push_back(Microtask::Native(Box::new(move || f(value, rejected))));
            }
            Reaction::Chain(derived) => {
                self.settle(&derived, value, rejected);
            }
        }
    }

    /// Register a reaction, firing immediately (as a microtask) when the
    /// promise has already settled.
    pub fn subscribe(&self, promise: &Rc<PromiseData>, reaction: Reaction) {
        promise.handled.set(true);
        if promise.is_pending() {
            promise.reactions.borrow_mut().push(reaction);
        } else {
            let value = promise.value.borrow().clone().unwrap_or_default();
            let rejected = *promise.status.borrow() == PromiseStatus::Rejected;
            self.queue_reaction(reaction, value, rejected);
        }
    }

    pub fn subscribe_native(&self, promise: &Rc<PromiseData>, f: Box<dyn FnOnce(Value, bool)>) {
        self.subscribe(promise, Reaction::Native(f));
    }

    /// Queue a bare microtask (`queueMicrotask`).
    pub fn queue_microtask_callback(&self, callback: Value) {
        self.microtasks.borrow_mut().push_back(Microtask::Reaction {
            callback,
            argument: Value::Undefined,
            derived: PromiseData::new(),
        });
    }

    /// Await a promise: ready when it settles; rejections surface as `Err`.
    /// The first poll always suspends, even on a settled promise, so code
    /// after an `await` never runs ahead of the current turn's synchronous
    /// remainder.
    pub fn await_promise(self: &Rc<Self>, promise: Rc<PromiseData>) -> AwaitPromise {
        promise.handled.set(true);
        AwaitPromise {
            promise,
            scheduler: Rc::clone(self),
            polled: Cell::new(false),
        }
    }

    /// Unhandled rejections left over when the loop went idle.
    pub fn unhandled_rejections(&self) -> Vec<Value> {
        self.rejected
            .borrow()
            .iter()
            .filter(|p| !p.handled.get())
            .filter_map(|p| p.value.borrow().clone())
            .collect()
    }

    // =========================================================================
    // Tasks and timers
    // =========================================================================

    /// Spawn a future onto the loop.
    pub fn spawn(&self, future: LocalBoxFuture<'static, ()>) {
        self.spawned.borrow_mut().push(future);
        self.bump();
    }

    pub fn set_timer(&self, callback: Value, args: Vec<Value>, delay_ms: f64, repeat: bool) -> u64 {
        let id = self.next_timer_id.get() + 1;
        self.next_timer_id.set(id);
        let seq = self.next_seq.get() + 1;
        self.next_seq.set(seq);
        let delay = Duration::from_secs_f64((delay_ms.max(0.0)) / 1000.0);
        self.timers.borrow_mut().push(Reverse(TimerEntry {
            deadline: Instant::now() + delay,
            seq,
            id,
            callback,
            args,
            interval: if repeat { Some(delay) } else { None },
        }));
        id
    }

    pub fn clear_timer(&self, id: u64) {
        self.cancelled_timers.borrow_mut().insert(id);
    }

    // =========================================================================
    // The loop
    // =========================================================================

    /// Run until every task, microtask and timer is exhausted. Tasks stuck
    /// on promises that can never settle are dropped, matching host
    /// behavior of exiting with pending promises.
    pub fn run(self: &Rc<Self>, engine: &dyn Engine) {
        loop {
            self.drain_microtasks(engine);
            let before = self.generation.get();
            self.poll_tasks();
            if !self.microtasks.borrow().is_empty() {
                continue;
            }
            if self.fire_due_timer(engine) {
                continue;
            }
            if self.generation.get() != before {
                continue;
            }
            // Idle: sleep until the next timer, or exit.
            let next = self.time_until_next_timer();
            match next {
                Some(wait) => {
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                }
                None => break,
            }
        }
        trace!("scheduler idle");
    }

    fn drain_microtasks(self: &Rc<Self>, engine: &dyn Engine) {
        loop {
            let task = self.microtasks.borrow_mut().pop_front();
            let Some(task) = task else { break };
            match task {
                Microtask::Native(f) => f(),
                Microtask::Reaction { callback, argument, derived } => {
                    self.run_reaction(engine, callback, argument, derived);
                }
            }
        }
    }

    /// Invoke a reaction callback; settle the derived promise from its
    /// result. Callbacks that suspend become tasks.
    fn run_reaction(
        self: &Rc<Self>,
        engine: &dyn Engine,
        callback: Value,
        argument: Value,
        derived: Rc<PromiseData>,
    ) {
        if !callback.is_callable() {
            // Passthrough for non-callable handlers.
            self.settle(&derived, argument, false);
            return;
        }
        self.run_reaction_args(engine, callback, vec![argument], derived);
    }

    fn poll_tasks(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        tasks.extend(std::mem::take(&mut *self.spawned.borrow_mut()));
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        let mut still_pending = Vec::new();
        for mut task in tasks {
            match task.as_mut().poll(&mut cx) {
                Poll::Ready(()) => self.bump(),
                Poll::Pending => still_pending.push(task),
            }
        }
        let mut slot = self.tasks.borrow_mut();
        still_pending.extend(std::mem::take(&mut *slot));
        *slot = still_pending;
    }

    fn fire_due_timer(self: &Rc<Self>, engine: &dyn Engine) -> bool {
        let now = Instant::now();
        loop {
            let due = {
                let mut timers = self.timers.borrow_mut();
                match timers.peek() {
                    Some(Reverse(entry)) if entry.deadline <= now => timers.pop().map(|r| r.0),
                    _ => None,
                }
            };
            let Some(entry) = due else { return false };
            if self.cancelled_timers.borrow().contains(&entry.id) {
                continue;
            }
            if let Some(interval) = entry.interval {
                let seq = self.next_seq.get() + 1;
                self.next_seq.set(seq);
                self.timers.borrow_mut().push(Reverse(TimerEntry {
                    deadline: now + interval,
                    seq,
                    id: entry.id,
                    callback: entry.callback.clone(),
                    args: entry.args.clone(),
                    interval: Some(interval),
                }));
            }
            let derived = PromiseData::new();
            derived.handled.set(true);
            self.run_reaction_args(engine, entry.callback, entry.args, derived);
            return true;
        }
    }

    fn run_reaction_args(
        self: &Rc<Self>,
        engine: &dyn Engine,
        callback: Value,
        args: Vec<Value>,
        derived: Rc<PromiseData>,
    ) {
        if !callback.is_callable() {
            return;
        }
        let mut future = engine.call_value(callback, Value::Undefined, args);
        let mut cx = Context::from_waker(Waker::noop());
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(value)) => self.resolve(&derived, value),
            Poll::Ready(Err(error)) => self.settle(&derived, error, true),
            Poll::Pending => {
                let scheduler = Rc::clone(self);
                self.spawn(Box::pin(async move {
                    let result = future.await;
                    match result {
                        Ok(value) => scheduler.resolve(&derived, value),
                        Err(error) => scheduler.settle(&derived, error, true),
                    }
                }));
            }
        }
    }

    fn time_until_next_timer(&self) -> Option<Duration> {
        let timers = self.timers.borrow();
        let mut best: Option<Instant> = None;
        for Reverse(entry) in timers.iter() {
            if self.cancelled_timers.borrow().contains(&entry.id) {
                continue;
            }
            best = Some(match best {
                Some(current) => current.min(entry.deadline),
                None => entry.deadline,
            });
        }
        best.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Future that resolves when a promise settles.
pub struct AwaitPromise {
    promise: Rc<PromiseData>,
    scheduler: Rc<Scheduler>,
    polled: Cell<bool>,
}

impl Future for AwaitPromise {
    type Output = RtResult<Value>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.polled.get() {
            self.polled.set(true);
            if !self.promise.is_pending() {
                // Settled already: suspend once and ask the loop for an
                // immediate re-poll.
                self.scheduler.bump();
            }
            return Poll::Pending;
        }
        let status = self.promise.status.borrow().clone();
        match status {
            PromiseStatus::Pending => Poll::Pending,
            PromiseStatus::Fulfilled => {
                Poll::Ready(Ok(self.promise.value.borrow().clone().unwrap_or_default()))
            }
            PromiseStatus::Rejected => {
                Poll::Ready(Err(self.promise.value.borrow().clone().unwrap_or_default()))
            }
        }
    }
}

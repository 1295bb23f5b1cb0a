//! Suspension plumbing shared by both backends.
//!
//! A generator body (tree-walked or compiled) suspends through a
//! `GenChannel`: the pending `yield` parks its value there and the next
//! resume delivers the sent value (or a thrown one) back. The driving
//! coroutine polls the body once per resume and reads the channel to
//! distinguish a yield from a genuine await.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::value::{Coroutine, GenResume, GenStep, Value};
use crate::{LocalBoxFuture, RtResult};

#[derive(Debug, Default)]
pub struct GenChannel {
    /// Value delivered by the pending `yield`.
    pub yielded: RefCell<Option<Value>>,
    /// Resume input for the suspended yield: `Ok(sent)` or `Err(thrown)`.
    pub resume: RefCell<Option<RtResult<Value>>>,
}

/// A suspension point: delivers its value to the channel on the first poll
/// and completes with the resume input on the next.
pub struct YieldPoint {
    pub channel: Rc<GenChannel>,
    pub value: RefCell<Option<Value>>,
    pub delivered: Cell<bool>,
}

impl YieldPoint {
    pub fn new(channel: Rc<GenChannel>, value: Value) -> Self {
        YieldPoint {
            channel,
            value: RefCell::new(Some(value)),
            delivered: Cell::new(false),
        }
    }
}

impl Future for YieldPoint {
    type Output = RtResult<Value>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.delivered.get() {
            self.delivered.set(true);
            *self.channel.yielded.borrow_mut() = self.value.borrow_mut().take();
            return Poll::Pending;
        }
        match self.channel.resume.borrow_mut().take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

/// Coroutine over a suspendable body: each resume drives the body future to
/// its next yield, completion, or (async bodies) pending await. Both
/// backends build their generator objects from this.
pub struct BodyCoroutine {
    body: RefCell<LocalBoxFuture<'static, RtResult<Value>>>,
    channel: Rc<GenChannel>,
    started: Cell<bool>,
}

impl BodyCoroutine {
    pub fn new(body: LocalBoxFuture<'static, RtResult<Value>>, channel: Rc<GenChannel>) -> Self {
        BodyCoroutine {
            body: RefCell::new(body),
            channel,
            started: Cell::new(false),
        }
    }
}

impl Coroutine for BodyCoroutine {
    fn resume(self: Rc<Self>, input: GenResume) -> LocalBoxFuture<'static, RtResult<GenStep>> {
        Box::pin(DriveToYield { co: self, input: RefCell::new(Some(input)) })
    }
}

struct DriveToYield {
    co: Rc<BodyCoroutine>,
    input: RefCell<Option<GenResume>>,
}

impl Future for DriveToYield {
    type Output = RtResult<GenStep>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(input) = self.input.borrow_mut().take() {
            match input {
                GenResume::Next(value) => {
                    *self.co.channel.resume.borrow_mut() = Some(Ok(value));
                }
                GenResume::Throw(error) => {
                    if !self.co.started.get() {
                        // Never started: the throw surfaces without
                        // entering the body.
                        return Poll::Ready(Err(error));
                    }
                    *self.co.channel.resume.borrow_mut() = Some(Err(error));
                }
                GenResume::Return(value) => {
                    // Handled by the generator object before resuming.
                    return Poll::Ready(Ok(GenStep::Done(value)));
                }
            }
        }
        self.co.started.set(true);
        let mut body = self.co.body.borrow_mut();
        match body.as_mut().poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(Ok(GenStep::Done(value))),
            Poll::Ready(Err(error)) => Poll::Ready(Err(error)),
            Poll::Pending => match self.co.channel.yielded.borrow_mut().take() {
                Some(value) => Poll::Ready(Ok(GenStep::Yield(value))),
                // A genuine await inside an async generator; the loop
                // re-polls when it unblocks.
                None => Poll::Pending,
            },
        }
    }
}

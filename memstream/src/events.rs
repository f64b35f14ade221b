//! Typed notification plumbing.
//!
//! Each notification kind of a channel or endpoint has its own
//! [`Listeners`] set. Listeners receive the emitting entity as their first
//! argument, so they can call back into it without capturing a clone.
//!
//! The same notifications are also available as a message stream through
//! `events()`, which forwards every emission into an unbounded
//! `futures` channel.

use std::cell::RefCell;
use std::rc::Rc;

use crate::channel::DuplexChannel;
use crate::error::Error;
use crate::payload::Chunk;

type Listener<S, A> = Rc<dyn Fn(&S, &A)>;

/// Ordered set of callbacks for one notification kind.
pub(crate) struct Listeners<S, A> {
    slots: RefCell<Vec<Listener<S, A>>>,
}

impl<S, A> Listeners<S, A> {
    pub(crate) fn new() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn add<F>(&self, listener: F)
    where
        F: Fn(&S, &A) + 'static,
    {
        self.slots.borrow_mut().push(Rc::new(listener));
    }

    /// Calls every listener registered at the moment of emission.
    ///
    /// Listeners added while emitting are first called on the next emission.
    pub(crate) fn emit(&self, source: &S, arg: &A) {
        let snapshot: Vec<Listener<S, A>> = self.slots.borrow().clone();
        for listener in &snapshot {
            listener(source, arg);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.borrow().len()
    }
}

impl<S, A> Default for Listeners<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

/// A channel notification, as delivered by `DuplexChannel::events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Connect,
    Data(Chunk),
    Error(Error),
    Close { had_error: bool },
}

/// An endpoint notification, as delivered by `ListeningEndpoint::events`.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Listening,
    Connection(DuplexChannel),
    Error(Error),
    Close,
}

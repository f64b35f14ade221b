//! Receive side of a channel: decoding and pause/resume flow control.
//!
//! While paused, inbound units are parked in a receive queue. The queue
//! exists only from `pause()` until the backlog has been drained, and its
//! presence (not the `paused` flag) is what diverts new arrivals into it.
//! A resume replays the backlog newest-first, one unit per scheduler turn.

use bytes::Bytes;
use log::trace;

use super::DuplexChannel;
use crate::encoding::{Decoder, Encoding};
use crate::payload::Chunk;

/// Receive-side state of a channel.
#[derive(Debug)]
pub(crate) struct Receiver {
    paused: bool,

    /// Parked units; `None` when nothing is paused or draining.
    queue: Option<Vec<Bytes>>,

    /// Set by `set_encoding`; kept across teardown.
    decoder: Option<Decoder>,
}

impl Receiver {
    pub(crate) fn new() -> Self {
        Self {
            paused: false,
            queue: None,
            decoder: None,
        }
    }

    /// Returns false if already paused.
    fn pause(&mut self) -> bool {
        if self.paused {
            return false;
        }
        self.paused = true;
        // Keep a backlog that is still draining from an earlier resume
        self.queue.get_or_insert_with(Vec::new);
        true
    }

    /// Clears the pause and pops the newest parked unit.
    fn resume(&mut self) -> Option<Bytes> {
        if !self.paused {
            return None;
        }
        self.paused = false;
        self.next_backlog()
    }

    /// Parks `data` if a receive queue exists, handing it back otherwise.
    fn park(&mut self, data: Bytes) -> Option<Bytes> {
        match self.queue.as_mut() {
            Some(queue) => {
                queue.push(data);
                None
            }
            None => Some(data),
        }
    }

    /// Puts back a unit whose replay was interrupted by a new pause.
    fn requeue(&mut self, data: Bytes) {
        self.queue.get_or_insert_with(Vec::new).push(data);
    }

    /// Pops the next unit to replay unless paused; drops the queue once empty.
    fn next_backlog(&mut self) -> Option<Bytes> {
        if self.paused {
            return None;
        }
        let queue = self.queue.as_mut()?;
        let next = queue.pop();
        if queue.is_empty() {
            self.queue = None;
        }
        next
    }

    fn decode(&mut self, data: Bytes) -> Option<Chunk> {
        match self.decoder.as_mut() {
            Some(decoder) => {
                let text = decoder.write(&data);
                (!text.is_empty()).then_some(Chunk::Text(text))
            }
            None => Some(Chunk::Bytes(data)),
        }
    }

    fn queued(&self) -> usize {
        self.queue.as_ref().map_or(0, Vec::len)
    }

    pub(crate) fn reset(&mut self) {
        self.paused = false;
        self.queue = None;
    }
}

impl DuplexChannel {
    /// Stops `data` notifications; arriving units are buffered.
    ///
    /// Pausing a paused channel does nothing.
    pub fn pause(&self) {
        if self.state_mut().receiver.pause() {
            trace!("{} paused", self.id());
        }
    }

    /// Ends a pause and replays buffered units.
    ///
    /// The most recently buffered unit is delivered immediately, the rest
    /// one per scheduler turn in last-in, first-out order. Resuming a
    /// channel that is not paused does nothing.
    pub fn resume(&self) {
        let next = {
            let mut state = self.state_mut();
            let queued = state.receiver.queued();
            let next = state.receiver.resume();
            if next.is_some() || queued > 0 {
                trace!("{} resuming with {} queued", self.id(), queued);
            }
            next
        };
        if let Some(next) = next {
            self.on_unit(next);
        }
    }

    /// Decodes every later delivery as text in `encoding`.
    pub fn set_encoding(&self, encoding: Encoding) {
        self.state_mut().receiver.decoder = Some(Decoder::new(encoding));
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.state()
            .receiver
            .decoder
            .as_ref()
            .map(Decoder::encoding)
    }

    pub fn is_paused(&self) -> bool {
        self.state().receiver.paused
    }

    /// Number of inbound units waiting in the receive queue.
    pub fn queued_inbound(&self) -> usize {
        self.state().receiver.queued()
    }

    /// Entry point for units written by the peer.
    pub(crate) fn receive(&self, data: Bytes) {
        let data = {
            let mut state = self.state_mut();
            if !state.readable {
                trace!("{} dropped {} bytes: not readable", self.id(), data.len());
                return;
            }
            match state.receiver.park(data) {
                Some(data) => data,
                None => return,
            }
        };
        self.on_unit(data);
    }

    fn on_unit(&self, data: Bytes) {
        let chunk = self.state_mut().receiver.decode(data);
        if let Some(chunk) = chunk {
            self.shared.events.data.emit(self, &chunk);
        }

        let next = self.state_mut().receiver.next_backlog();
        if let Some(next) = next {
            let this = self.clone();
            self.scheduler().defer(move || this.replay(next));
        }
    }

    fn replay(&self, data: Bytes) {
        {
            let mut state = self.state_mut();
            if !state.readable {
                return;
            }
            if state.receiver.paused {
                state.receiver.requeue(data);
                return;
            }
        }
        self.on_unit(data);
    }
}

//! Send side of a channel.
//!
//! Writes normally go straight to the scheduler as one deferred delivery
//! each. Once `end()` has queued the end-of-stream marker, outbound items
//! go through the send queue instead, which is flushed one item per
//! scheduler turn so the marker is processed after every earlier write.
//! Writes made while the marker is still queued are appended behind it and
//! delivered in order; once the marker is processed the channel stops
//! being writable.

use std::collections::VecDeque;

use bytes::Bytes;
use log::{debug, trace};

use super::{DuplexChannel, WeakChannel};
use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::payload::Payload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outbound {
    Data(Bytes),
    EndOfStream,
}

/// Send-side state of a channel.
#[derive(Debug)]
pub(crate) struct Sender {
    queue: VecDeque<Outbound>,

    /// A flush step is scheduled.
    flushing: bool,
}

impl Sender {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            flushing: false,
        }
    }

    fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// True once the end-of-stream marker is the last queued item.
    fn is_ending(&self) -> bool {
        self.queue.back() == Some(&Outbound::EndOfStream)
    }

    fn push(&mut self, item: Outbound) {
        self.queue.push_back(item);
    }

    fn pop(&mut self) -> Option<Outbound> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.flushing = false;
    }
}

impl DuplexChannel {
    /// Sends `data` to the peer, encoding text with the registry's default encoding.
    ///
    /// Always returns `Ok(true)`: there is no write-side backpressure.
    /// Fails with [`Error::NotWritable`] when the channel is not connected,
    /// has been destroyed, or its end-of-stream marker has been processed.
    pub fn write(&self, data: impl Into<Payload>) -> Result<bool> {
        let encoding = self.registry().config().default_encoding;
        self.write_encoded(data, encoding)
    }

    /// Sends `data` to the peer, encoding text with `encoding`.
    pub fn write_encoded(&self, data: impl Into<Payload>, encoding: Encoding) -> Result<bool> {
        {
            let state = self.state();
            if !state.writable {
                return Err(Error::NotWritable);
            }
        }
        let payload: Payload = data.into();
        let bytes = payload.into_bytes(encoding)?;

        let peer = {
            let mut state = self.state_mut();
            if state.sender.has_pending() {
                state.sender.push(Outbound::Data(bytes));
                return Ok(true);
            }
            state.peer.clone()
        };
        self.dispatch(peer, bytes);
        Ok(true)
    }

    /// Closes the write half once everything written so far is delivered.
    ///
    /// Does nothing if the channel is not writable or the marker is already
    /// the last queued item.
    pub fn end(&self) -> Result<()> {
        self.finish(None)
    }

    /// Writes `data` and then ends the write half.
    pub fn end_with(&self, data: impl Into<Payload>) -> Result<()> {
        self.finish(Some(data.into()))
    }

    /// Number of outbound items waiting behind the end-of-stream marker.
    pub fn queued_outbound(&self) -> usize {
        self.state().sender.len()
    }

    fn finish(&self, data: Option<Payload>) -> Result<()> {
        {
            let state = self.state();
            if !state.writable || state.sender.is_ending() {
                return Ok(());
            }
        }
        if let Some(data) = data {
            self.write(data)?;
        }
        self.state_mut().sender.push(Outbound::EndOfStream);
        self.flush();
        Ok(())
    }

    fn flush(&self) {
        {
            let mut state = self.state_mut();
            if state.sender.flushing || !state.sender.has_pending() {
                return;
            }
            state.sender.flushing = true;
        }
        let this = self.clone();
        self.scheduler().defer(move || this.flush_step());
    }

    fn flush_step(&self) {
        let (item, peer) = {
            let mut state = self.state_mut();
            (state.sender.pop(), state.peer.clone())
        };

        match item {
            Some(Outbound::Data(bytes)) => deliver(self, peer, bytes),
            Some(Outbound::EndOfStream) => {
                self.state_mut().writable = false;
                debug!("{} write half ended", self.id());
            }
            None => {}
        }

        let more = {
            let mut state = self.state_mut();
            state.sender.flushing = state.sender.has_pending();
            state.sender.flushing
        };
        if more {
            let this = self.clone();
            self.scheduler().defer(move || this.flush_step());
        }
    }

    /// Schedules delivery of one unit to the peer's receive path.
    fn dispatch(&self, peer: Option<WeakChannel>, data: Bytes) {
        trace!("{} scheduling {} bytes", self.id(), data.len());
        let this = self.clone();
        self.scheduler()
            .defer(move || deliver(&this, peer, data));
    }
}

fn deliver(from: &DuplexChannel, peer: Option<WeakChannel>, data: Bytes) {
    match peer.as_ref().and_then(WeakChannel::upgrade) {
        Some(peer) => peer.receive(data),
        None => trace!("{} dropped {} bytes: peer is gone", from.id(), data.len()),
    }
}

//! The socket-shaped duplex channel.
//!
//! A [`DuplexChannel`] is one end of an in-process pipe. Channels are
//! created unconnected by [`AddressRegistry::channel`] and joined to a
//! listening endpoint with [`DuplexChannel::connect`], or spawned already
//! linked by the registry as the server side of a connection.
//!
//! ```text
//!   client channel                         server-side channel
//!   ──────────────                         ───────────────────
//!   write(data) ──► defer(deliver) ──────► receive(data)
//!                                            ├─ paused ─► receive queue
//!                                            └─ else ───► decoder ─► on_data
//!   on_data  ◄──── receive(data) ◄──────── defer(deliver) ◄── write(data)
//! ```
//!
//! The write path lives in `sender`, the receive and flow-control path in
//! `receiver`.

mod receiver;
mod sender;

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::channel::mpsc;
use log::{debug, info, trace, warn};

use crate::address::{Address, ChannelId};
use crate::error::{Error, Result};
use crate::events::{Listeners, StreamEvent};
use crate::payload::Chunk;
use crate::registry::AddressRegistry;
use crate::scheduler::Scheduler;

use receiver::Receiver;
use sender::Sender;

/// Observable connection state, derived from the channel's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Not connected, destroyed, or write half ended.
    Closed,

    /// A connect is in flight.
    Opening,

    /// Connected and both halves usable.
    Open,
}

/// One end of an in-process duplex pipe. Clones are handles to the same channel.
#[derive(Clone)]
pub struct DuplexChannel {
    shared: Rc<Shared>,
}

/// Non-owning reference to a channel, used for the peer relation.
#[derive(Clone)]
pub(crate) struct WeakChannel {
    shared: Weak<Shared>,
}

impl WeakChannel {
    pub(crate) fn upgrade(&self) -> Option<DuplexChannel> {
        self.shared.upgrade().map(|shared| DuplexChannel { shared })
    }
}

struct Shared {
    id: ChannelId,
    registry: AddressRegistry,
    state: RefCell<ChannelState>,
    events: ChannelEvents,
}

#[derive(Default)]
struct ChannelEvents {
    connect: Listeners<DuplexChannel, ()>,
    data: Listeners<DuplexChannel, Chunk>,
    error: Listeners<DuplexChannel, Error>,
    close: Listeners<DuplexChannel, bool>,
}

struct ChannelState {
    /// The other end of the pipe. Cleared on both sides when either is destroyed.
    peer: Option<WeakChannel>,

    /// Id of the channel this one was last linked with.
    ///
    /// Outlives `peer` until this channel is torn down, so a close from
    /// the old peer can still be matched to this link.
    link_id: Option<ChannelId>,

    address: Option<Address>,
    connecting: bool,
    readable: bool,
    writable: bool,
    destroyed: bool,
    receiver: Receiver,
    sender: Sender,
}

impl ChannelState {
    fn idle() -> Self {
        Self {
            peer: None,
            link_id: None,
            address: None,
            connecting: false,
            readable: false,
            writable: false,
            destroyed: false,
            receiver: Receiver::new(),
            sender: Sender::new(),
        }
    }
}

impl DuplexChannel {
    /// Creates an unconnected channel.
    pub(crate) fn new(registry: &AddressRegistry) -> Self {
        Self::with_state(registry, ChannelState::idle())
    }

    /// Creates the server side of a link, already connected to `initiator`.
    pub(crate) fn linked(
        registry: &AddressRegistry,
        address: Address,
        initiator: &DuplexChannel,
    ) -> Self {
        let mut state = ChannelState::idle();
        state.peer = Some(initiator.downgrade());
        state.link_id = Some(initiator.id());
        state.address = Some(address);
        state.readable = true;
        state.writable = true;
        Self::with_state(registry, state)
    }

    fn with_state(registry: &AddressRegistry, state: ChannelState) -> Self {
        let id = ChannelId(registry.next_id());
        trace!("Created channel {}", id);
        Self {
            shared: Rc::new(Shared {
                id,
                registry: registry.clone(),
                state: RefCell::new(state),
                events: ChannelEvents::default(),
            }),
        }
    }

    /// Opens a connection to the endpoint listening on `address`.
    ///
    /// Completion is asynchronous: `connect` listeners fire once the
    /// registry has linked this channel with a server-side peer. If nothing
    /// is listening on `address`, the channel is destroyed and emits
    /// `error` (`AddressNotFound`) followed by `close(true)`; no error is
    /// returned here in that case.
    ///
    /// Fails with [`Error::AlreadyConnected`] if the channel is connected
    /// or already connecting.
    pub fn connect(&self, address: impl Into<Address>) -> Result<()> {
        let address = address.into();
        {
            let mut state = self.state_mut();
            if state.peer.is_some() || state.address.is_some() || state.connecting {
                return Err(Error::AlreadyConnected(address));
            }
            state.destroyed = false;
        }

        let registry = self.registry().clone();
        if !registry.is_bound(&address) {
            warn!("{} cannot connect: nothing is listening on {}", self.id(), address);
            self.teardown(Some(Error::AddressNotFound(address)));
            return Ok(());
        }

        {
            let mut state = self.state_mut();
            state.connecting = true;
            state.address = Some(address.clone());
        }
        debug!("{} connecting to {}", self.id(), address);

        let this = self.downgrade();
        let peer = registry.link(&address, self, move |peer| match this.upgrade() {
            Some(channel) => channel.complete_connect(peer),
            None => peer.destroy(),
        })?;
        self.state_mut().link_id = Some(peer.id());
        Ok(())
    }

    /// Second half of `connect`, run when the registry hands over the peer.
    fn complete_connect(&self, peer: DuplexChannel) {
        let (current, address) = {
            let state = self.state();
            (
                state.connecting && state.link_id == Some(peer.id()),
                state.address.clone(),
            )
        };
        if !current {
            debug!("{} abandoned its link to {}", self.id(), peer.id());
            if let Some(address) = peer.address() {
                self.registry().unlink(&address, &peer);
            }
            return;
        }

        if peer.is_destroyed() {
            let address = address.unwrap_or_else(|| Address::new(""));
            warn!("{} lost {} before the connection was accepted", self.id(), address);
            self.teardown(Some(Error::AddressNotFound(address)));
            return;
        }

        {
            let mut state = self.state_mut();
            state.peer = Some(peer.downgrade());
            state.readable = true;
            state.writable = true;
            state.connecting = false;
        }

        // Closing the peer tears this end down as well
        let this = self.downgrade();
        let peer_id = peer.id();
        peer.shared.events.close.add(move |_, _| {
            if let Some(channel) = this.upgrade() {
                if channel.state().link_id == Some(peer_id) {
                    channel.teardown(None);
                }
            }
        });

        if let Some(address) = &address {
            info!("{} connected to {} (peer {})", self.id(), address, peer_id);
        }
        self.shared.events.connect.emit(self, &());
    }

    /// Closes the channel without an error.
    ///
    /// Emits `close(false)` asynchronously. Destroying an already destroyed
    /// channel does nothing.
    pub fn destroy(&self) {
        self.teardown(None);
    }

    /// Closes the channel because of `error`.
    ///
    /// Emits `error(error)` and then `close(true)` asynchronously.
    pub fn destroy_with_error(&self, error: Error) {
        self.teardown(Some(error));
    }

    fn teardown(&self, error: Option<Error>) {
        let (address, peer) = {
            let mut state = self.state_mut();
            if state.destroyed {
                debug!("{} is already destroyed", self.id());
                return;
            }
            state.destroyed = true;
            state.connecting = false;
            state.readable = false;
            state.writable = false;
            state.link_id = None;
            state.receiver.reset();
            state.sender.clear();
            (state.address.take(), state.peer.take())
        };

        let peer = peer.and_then(|peer| peer.upgrade());
        if let Some(peer) = &peer {
            peer.forget_peer(self.id());
        }
        if let Some(address) = &address {
            let registry = self.registry();
            if let Some(peer) = &peer {
                registry.unlink(address, peer);
            }
            registry.detach(address, self.id());
        }

        match &error {
            Some(err) => warn!("{} destroyed: {}", self.id(), err),
            None => debug!("{} destroyed", self.id()),
        }

        let this = self.clone();
        self.scheduler().defer(move || {
            let had_error = error.is_some();
            if let Some(err) = &error {
                this.shared.events.error.emit(&this, err);
            }
            this.shared.events.close.emit(&this, &had_error);
        });
    }

    /// True unless this channel was torn down or moved on since `link` spawned `peer_id`.
    pub(crate) fn expects_link(&self, peer_id: ChannelId) -> bool {
        let state = self.state();
        !state.destroyed && state.link_id.is_none_or(|id| id == peer_id)
    }

    /// Drops the back-reference to `peer_id`, keeping `link_id` for close matching.
    fn forget_peer(&self, peer_id: ChannelId) {
        let mut state = self.state_mut();
        if state.link_id == Some(peer_id) {
            state.peer = None;
        }
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    /// Address this channel connected to, or was spawned under.
    pub fn address(&self) -> Option<Address> {
        self.state().address.clone()
    }

    /// The other end of the pipe, while linked.
    pub fn peer(&self) -> Option<DuplexChannel> {
        self.state().peer.as_ref().and_then(WeakChannel::upgrade)
    }

    pub fn ready_state(&self) -> ReadyState {
        let state = self.state();
        if state.connecting {
            ReadyState::Opening
        } else if state.readable && state.writable {
            ReadyState::Open
        } else {
            ReadyState::Closed
        }
    }

    pub fn is_readable(&self) -> bool {
        self.state().readable
    }

    pub fn is_writable(&self) -> bool {
        self.state().writable
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }

    /// Always `"mem"`.
    pub fn stream_type(&self) -> &'static str {
        crate::STREAM_TYPE
    }

    pub fn registry(&self) -> &AddressRegistry {
        &self.shared.registry
    }

    /// Accepted for socket compatibility; has no effect.
    pub fn set_no_delay(&self, no_delay: bool) {
        trace!("{} ignoring set_no_delay({})", self.id(), no_delay);
    }

    /// Accepted for socket compatibility; has no effect.
    pub fn set_keep_alive(&self, enable: bool, initial_delay: Option<Duration>) {
        trace!(
            "{} ignoring set_keep_alive({}, {:?})",
            self.id(),
            enable,
            initial_delay
        );
    }

    /// Accepted for socket compatibility; has no effect.
    pub fn set_timeout(&self, timeout: Duration) {
        trace!("{} ignoring set_timeout({:?})", self.id(), timeout);
    }

    pub fn on_connect<F>(&self, listener: F)
    where
        F: Fn(&DuplexChannel) + 'static,
    {
        self.shared.events.connect.add(move |channel, _| listener(channel));
    }

    /// Registers a listener for delivered units.
    ///
    /// Without an encoding the listener sees [`Chunk::Bytes`]; after
    /// [`set_encoding`](Self::set_encoding) it sees [`Chunk::Text`].
    pub fn on_data<F>(&self, listener: F)
    where
        F: Fn(&DuplexChannel, &Chunk) + 'static,
    {
        self.shared.events.data.add(listener);
    }

    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&DuplexChannel, &Error) + 'static,
    {
        self.shared.events.error.add(listener);
    }

    /// Registers a listener for teardown; the flag tells whether an error caused it.
    pub fn on_close<F>(&self, listener: F)
    where
        F: Fn(&DuplexChannel, bool) + 'static,
    {
        self.shared
            .events
            .close
            .add(move |channel, had_error| listener(channel, *had_error));
    }

    /// Streams every notification of this channel from now on.
    pub fn events(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded();
        {
            let tx = tx.clone();
            self.on_connect(move |_| {
                let _ = tx.unbounded_send(StreamEvent::Connect);
            });
        }
        {
            let tx = tx.clone();
            self.on_data(move |_, chunk| {
                let _ = tx.unbounded_send(StreamEvent::Data(chunk.clone()));
            });
        }
        {
            let tx = tx.clone();
            self.on_error(move |_, err| {
                let _ = tx.unbounded_send(StreamEvent::Error(err.clone()));
            });
        }
        self.on_close(move |_, had_error| {
            let _ = tx.unbounded_send(StreamEvent::Close { had_error });
        });
        rx
    }

    pub(crate) fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            shared: Rc::downgrade(&self.shared),
        }
    }

    fn scheduler(&self) -> &Scheduler {
        self.shared.registry.scheduler()
    }

    fn state(&self) -> Ref<'_, ChannelState> {
        self.shared.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, ChannelState> {
        self.shared.state.borrow_mut()
    }
}

impl PartialEq for DuplexChannel {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for DuplexChannel {}

impl fmt::Debug for DuplexChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("DuplexChannel")
            .field("id", &self.shared.id)
            .field("address", &state.address)
            .field("connecting", &state.connecting)
            .field("readable", &state.readable)
            .field("writable", &state.writable)
            .finish()
    }
}

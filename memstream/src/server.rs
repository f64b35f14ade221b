//! Listening endpoints.
//!
//! A [`ListeningEndpoint`] is the server-socket half of the rendezvous. It
//! binds one address in its registry and surfaces every linked channel
//! through its `connection` notification.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use futures::channel::mpsc;
use log::{debug, info, warn};

use crate::address::{Address, EndpointId};
use crate::channel::DuplexChannel;
use crate::error::{Error, Result};
use crate::events::{Listeners, ServerEvent};
use crate::registry::AddressRegistry;

/// Accepts inbound connections on one address. Clones share the endpoint.
#[derive(Clone)]
pub struct ListeningEndpoint {
    shared: Rc<EndpointShared>,
}

struct EndpointShared {
    id: EndpointId,
    registry: AddressRegistry,

    /// Address passed to the last successful `listen`, until `close`.
    address: RefCell<Option<Address>>,
    events: EndpointEvents,
}

#[derive(Default)]
struct EndpointEvents {
    listening: Listeners<ListeningEndpoint, ()>,
    connection: Listeners<ListeningEndpoint, DuplexChannel>,
    error: Listeners<ListeningEndpoint, Error>,
    close: Listeners<ListeningEndpoint, ()>,
}

impl ListeningEndpoint {
    pub(crate) fn new(registry: &AddressRegistry) -> Self {
        Self {
            shared: Rc::new(EndpointShared {
                id: EndpointId(registry.next_id()),
                registry: registry.clone(),
                address: RefCell::new(None),
                events: EndpointEvents::default(),
            }),
        }
    }

    pub fn id(&self) -> EndpointId {
        self.shared.id
    }

    /// Address recorded by `listen`.
    ///
    /// Set even when the registry refused the binding; see
    /// [`is_listening`](Self::is_listening) for the registry's view.
    pub fn address(&self) -> Option<Address> {
        self.shared.address.borrow().clone()
    }

    /// True while this endpoint owns its address in the registry.
    pub fn is_listening(&self) -> bool {
        match self.address_ref().as_ref() {
            Some(address) => self.shared.registry.owner(address) == Some(self.id()),
            None => false,
        }
    }

    /// Binds `address` and starts accepting connections.
    ///
    /// `listening` fires before this returns. If another endpoint already
    /// holds `address`, the address is still recorded here but nothing is
    /// bound, and `error` (`AddressInUse`) fires on the next turn.
    ///
    /// Fails with [`Error::AlreadyListening`] if an address is already recorded.
    pub fn listen(&self, address: impl Into<Address>) -> Result<()> {
        let address = address.into();
        if let Some(current) = self.address() {
            return Err(Error::AlreadyListening(current));
        }
        *self.shared.address.borrow_mut() = Some(address.clone());

        let registry = &self.shared.registry;
        if registry.is_bound(&address) {
            warn!("{} cannot listen: {} is already bound", self.id(), address);
            let this = self.clone();
            registry.scheduler().defer(move || {
                this.shared
                    .events
                    .error
                    .emit(&this, &Error::AddressInUse(address));
            });
            return Ok(());
        }

        // The binding keeps the endpoint alive until the address is unbound
        let this = self.clone();
        registry.bind(address.clone(), self.id(), move |channel| {
            debug!("{} accepted {}", this.id(), channel.id());
            this.shared.events.connection.emit(&this, &channel);
        })?;

        info!("{} listening on {}", self.id(), address);
        self.shared.events.listening.emit(self, &());
        Ok(())
    }

    /// [`listen`](Self::listen) with a `listening` listener registered first.
    pub fn listen_with<F>(&self, address: impl Into<Address>, on_ready: F) -> Result<()>
    where
        F: Fn(&ListeningEndpoint) + 'static,
    {
        self.on_listening(on_ready);
        self.listen(address)
    }

    /// Stops listening and destroys every channel linked under the address.
    ///
    /// The endpoint may listen again afterwards. Fails with
    /// [`Error::NotRunning`] if no address is recorded.
    pub fn close(&self) -> Result<()> {
        let address = self
            .shared
            .address
            .borrow_mut()
            .take()
            .ok_or(Error::NotRunning)?;

        let registry = &self.shared.registry;
        if registry.owner(&address) == Some(self.id()) {
            registry.unbind(&address);
        } else {
            debug!("{} never owned {}, nothing to unbind", self.id(), address);
        }
        info!("{} closed {}", self.id(), address);
        self.shared.events.close.emit(self, &());
        Ok(())
    }

    pub fn on_listening<F>(&self, listener: F)
    where
        F: Fn(&ListeningEndpoint) + 'static,
    {
        self.shared
            .events
            .listening
            .add(move |endpoint, _| listener(endpoint));
    }

    /// Registers a listener for server-side channels of new connections.
    pub fn on_connection<F>(&self, listener: F)
    where
        F: Fn(&ListeningEndpoint, &DuplexChannel) + 'static,
    {
        self.shared.events.connection.add(listener);
    }

    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&ListeningEndpoint, &Error) + 'static,
    {
        self.shared.events.error.add(listener);
    }

    pub fn on_close<F>(&self, listener: F)
    where
        F: Fn(&ListeningEndpoint) + 'static,
    {
        self.shared
            .events
            .close
            .add(move |endpoint, _| listener(endpoint));
    }

    /// Streams every notification of this endpoint from now on.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded();
        {
            let tx = tx.clone();
            self.on_listening(move |_| {
                let _ = tx.unbounded_send(ServerEvent::Listening);
            });
        }
        {
            let tx = tx.clone();
            self.on_connection(move |_, channel| {
                let _ = tx.unbounded_send(ServerEvent::Connection(channel.clone()));
            });
        }
        {
            let tx = tx.clone();
            self.on_error(move |_, err| {
                let _ = tx.unbounded_send(ServerEvent::Error(err.clone()));
            });
        }
        self.on_close(move |_| {
            let _ = tx.unbounded_send(ServerEvent::Close);
        });
        rx
    }

    fn address_ref(&self) -> Ref<'_, Option<Address>> {
        self.shared.address.borrow()
    }
}

impl PartialEq for ListeningEndpoint {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for ListeningEndpoint {}

impl fmt::Debug for ListeningEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListeningEndpoint")
            .field("id", &self.shared.id)
            .field("address", &*self.address_ref())
            .finish()
    }
}

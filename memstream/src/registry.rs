//! The address registry and the rendezvous between channels and endpoints.
//!
//! An [`AddressRegistry`] is the whole in-process "network": it maps each
//! bound address to a binding (the listening endpoint's inbound handler
//! plus every server-side channel spawned under that address) and owns
//! the [`Scheduler`] that drives all deferred work. Independent registries
//! share nothing, so tests can run side by side.
//!
//! # Rendezvous
//!
//! ```text
//!   client.connect(addr)
//!        │
//!        ▼
//!   registry.link(addr, client) ── spawn server-side channel, add to links
//!        │
//!        └─ defer ─► binding handler(server-side)   // endpoint "connection"
//!                    continuation(server-side)       // client "connect"
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use log::{debug, info, trace};

use crate::address::{Address, ChannelId, EndpointId};
use crate::channel::DuplexChannel;
use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use crate::server::ListeningEndpoint;

type InboundHandler = Rc<dyn Fn(DuplexChannel)>;

struct Binding {
    owner: EndpointId,
    on_inbound: InboundHandler,

    /// Server-side channels spawned under this address, oldest first.
    links: Vec<DuplexChannel>,
}

/// Process-local address space for channels and listening endpoints.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct AddressRegistry {
    inner: Rc<RegistryInner>,
}

struct RegistryInner {
    config: RegistryConfig,
    scheduler: Scheduler,
    bindings: RefCell<HashMap<Address, Binding>>,
    next_id: Cell<u64>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                config,
                scheduler: Scheduler::with_budget(config.task_budget),
                bindings: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Shorthand for `scheduler().run_until_idle()`.
    pub fn run_until_idle(&self) -> usize {
        self.inner.scheduler.run_until_idle()
    }

    /// Creates an unconnected channel.
    pub fn channel(&self) -> DuplexChannel {
        DuplexChannel::new(self)
    }

    /// Creates a channel and starts connecting it to `address`.
    pub fn connect(&self, address: impl Into<Address>) -> Result<DuplexChannel> {
        let channel = self.channel();
        channel.connect(address)?;
        Ok(channel)
    }

    /// Creates an endpoint that is not yet listening.
    pub fn endpoint(&self) -> ListeningEndpoint {
        ListeningEndpoint::new(self)
    }

    pub fn is_bound(&self, address: &Address) -> bool {
        self.inner.bindings.borrow().contains_key(address)
    }

    /// Endpoint currently holding `address`.
    pub fn owner(&self, address: &Address) -> Option<EndpointId> {
        self.inner.bindings.borrow().get(address).map(|b| b.owner)
    }

    /// Every bound address, sorted.
    pub fn bound_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.inner.bindings.borrow().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Number of live server-side channels under `address`.
    pub fn link_count(&self, address: &Address) -> usize {
        self.inner
            .bindings
            .borrow()
            .get(address)
            .map_or(0, |b| b.links.len())
    }

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    /// Binds `address` to `owner`, routing inbound connections to `on_inbound`.
    ///
    /// Fails with [`Error::AddressInUse`] if the address is already bound.
    pub fn bind<F>(&self, address: Address, owner: EndpointId, on_inbound: F) -> Result<()>
    where
        F: Fn(DuplexChannel) + 'static,
    {
        let mut bindings = self.inner.bindings.borrow_mut();
        if bindings.contains_key(&address) {
            return Err(Error::AddressInUse(address));
        }
        debug!("Bound {} to {}", address, owner);
        bindings.insert(
            address,
            Binding {
                owner,
                on_inbound: Rc::new(on_inbound),
                links: Vec::new(),
            },
        );
        Ok(())
    }

    /// Removes the binding for `address` and destroys every linked channel.
    ///
    /// Returns false if the address was not bound.
    pub fn unbind(&self, address: &Address) -> bool {
        let binding = self.inner.bindings.borrow_mut().remove(address);
        let Some(binding) = binding else {
            return false;
        };
        info!(
            "Unbound {} from {}, closing {} linked channels",
            address,
            binding.owner,
            binding.links.len()
        );
        for channel in binding.links.iter().rev() {
            channel.destroy();
        }
        true
    }

    /// Joins `initiator` with the endpoint bound on `address`.
    ///
    /// Spawns the server-side channel and records it under the binding.
    /// On the next turn the binding's inbound handler and then `on_linked`
    /// both receive the spawned channel. The inbound handler is skipped if
    /// `initiator` was destroyed or reconnected elsewhere in the meantime.
    pub fn link<F>(
        &self,
        address: &Address,
        initiator: &DuplexChannel,
        on_linked: F,
    ) -> Result<DuplexChannel>
    where
        F: FnOnce(DuplexChannel) + 'static,
    {
        let spawned = {
            let mut bindings = self.inner.bindings.borrow_mut();
            let binding = bindings
                .get_mut(address)
                .ok_or_else(|| Error::AddressNotFound(address.clone()))?;
            let spawned = DuplexChannel::linked(self, address.clone(), initiator);
            binding.links.push(spawned.clone());
            spawned
        };
        debug!(
            "Linked {} to {} on {}",
            spawned.id(),
            initiator.id(),
            address
        );

        let registry = self.clone();
        let address = address.clone();
        let accepted = spawned.clone();
        self.inner.scheduler.defer(move || {
            let wanted = accepted
                .peer()
                .is_some_and(|initiator| initiator.expects_link(accepted.id()));
            let handler = registry
                .inner
                .bindings
                .borrow()
                .get(&address)
                .map(|b| b.on_inbound.clone());
            match handler {
                Some(_) if !wanted => {
                    debug!("{} was abandoned before it was accepted", accepted.id())
                }
                Some(handler) => handler(accepted.clone()),
                None => debug!("{} was unbound before {} was accepted", address, accepted.id()),
            }
            on_linked(accepted);
        });
        Ok(spawned)
    }

    /// Removes `channel` from the links of `address` and destroys it.
    ///
    /// Returns false, doing nothing, if the channel is not linked there.
    pub fn unlink(&self, address: &Address, channel: &DuplexChannel) -> bool {
        match self.take_link(address, channel.id()) {
            Some(linked) => {
                trace!("Unlinked {} from {}", linked.id(), address);
                linked.destroy();
                true
            }
            None => false,
        }
    }

    /// Removes a channel from the links of `address` without destroying it.
    pub(crate) fn detach(&self, address: &Address, id: ChannelId) -> bool {
        self.take_link(address, id).is_some()
    }

    fn take_link(&self, address: &Address, id: ChannelId) -> Option<DuplexChannel> {
        let mut bindings = self.inner.bindings.borrow_mut();
        let links = &mut bindings.get_mut(address)?.links;
        let index = links.iter().position(|c| c.id() == id)?;
        Some(links.remove(index))
    }
}

impl Default for AddressRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AddressRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressRegistry")
            .field("bound", &self.bound_addresses())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

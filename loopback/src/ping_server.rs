use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use log::*;
use memstream::{Address, AddressRegistry, DuplexChannel, ListeningEndpoint, Result};

use crate::{PING, PONG};

/// Counters shared by every connection the server accepts.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections: Cell<u32>,
    pub pings: Cell<u32>,
    pub bulk_bytes: Cell<usize>,
}

pub struct PingServer {
    address: Address,
    stats: Rc<ServerStats>,
}

impl PingServer {
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            stats: Rc::new(ServerStats::default()),
        }
    }

    pub fn stats(&self) -> Rc<ServerStats> {
        self.stats.clone()
    }

    /// Binds the server's address and answers every connection.
    pub fn start(&self, registry: &AddressRegistry) -> Result<ListeningEndpoint> {
        let endpoint = registry.endpoint();
        endpoint.on_listening(|endpoint| {
            if let Some(address) = endpoint.address() {
                info!("Server listening on {}", address);
            }
        });
        endpoint.on_error(|_, e| error!("Server error: {}", e));
        endpoint.on_close(|_| info!("Server closed"));

        let stats = self.stats.clone();
        endpoint.on_connection(move |_, channel| {
            stats.connections.set(stats.connections.get() + 1);
            info!("Accepted connection {}", channel.id());
            Self::handle_connection(channel, stats.clone());
        });

        endpoint.listen(self.address.clone())?;
        Ok(endpoint)
    }

    /// Answers `ping` with `pong` and echoes any other unit as a block of the same size.
    fn handle_connection(channel: &DuplexChannel, stats: Rc<ServerStats>) {
        let started = Instant::now();
        channel.on_data(move |channel, chunk| {
            let reply = if chunk.as_bytes() == PING {
                stats.pings.set(stats.pings.get() + 1);
                PONG.to_vec()
            } else {
                stats.bulk_bytes.set(stats.bulk_bytes.get() + chunk.len());
                info!("[{}] Received bulk unit of {} KB", channel.id(), chunk.len() / 1024);
                vec![0xCD; chunk.len()]
            };
            if let Err(e) = channel.write(reply) {
                warn!("[{}] Reply dropped: {}", channel.id(), e);
            }
        });
        channel.on_close(move |channel, had_error| {
            let elapsed = started.elapsed();
            info!(
                "[{}] Connection closed after {:.2} ms (error: {})",
                channel.id(),
                elapsed.as_secs_f64() * 1000.0,
                had_error
            );
        });
    }
}

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

use log::*;
use memstream::{Address, AddressRegistry, DuplexChannel, Result};

use crate::{PING, PONG};

/// What one client run observed.
#[derive(Debug, Default)]
pub struct ClientReport {
    pub pongs: Cell<u32>,
    pub bulk_received: Cell<usize>,
    pub bulk_matched: Cell<bool>,
    pub closed: Cell<Option<bool>>,
    started: RefCell<Option<Instant>>,
}

pub struct PingClient {
    target: Address,
    rounds: u32,
    bulk_size: usize,
    channel: RefCell<Option<DuplexChannel>>,
}

impl PingClient {
    pub fn new(target: impl Into<Address>, rounds: u32, bulk_size: usize) -> Self {
        Self {
            target: target.into(),
            rounds,
            bulk_size,
            channel: RefCell::new(None),
        }
    }

    /// Connects and plays `rounds` ping/pong exchanges followed by one bulk transfer.
    ///
    /// The exchange only makes progress while the registry's scheduler is
    /// driven, and the client must outlive it.
    pub fn start(&self, registry: &AddressRegistry) -> Result<Rc<ClientReport>> {
        info!("Connecting to target: {}", self.target);
        let report = Rc::new(ClientReport::default());
        let channel = registry.channel();

        {
            let report = report.clone();
            channel.on_connect(move |channel| {
                info!("[{}] Connected", channel.id());
                *report.started.borrow_mut() = Some(Instant::now());
                Self::send(channel, PING);
            });
        }
        {
            let (report, rounds, bulk_size) = (report.clone(), self.rounds, self.bulk_size);
            channel.on_data(move |channel, chunk| {
                if chunk.as_bytes() == PONG {
                    let pongs = report.pongs.get() + 1;
                    report.pongs.set(pongs);
                    if pongs < rounds {
                        Self::send(channel, PING);
                    } else {
                        Self::log_speed("Ping rounds", pongs as usize * PING.len(), &report);
                        info!("Sending {} KB bulk unit...", bulk_size / 1024);
                        Self::send(channel, &vec![0xAB; bulk_size]);
                    }
                    return;
                }

                report.bulk_received.set(chunk.len());
                report
                    .bulk_matched
                    .set(chunk.len() == bulk_size && chunk.as_bytes().iter().all(|&b| b == 0xCD));
                Self::log_speed("Bulk exchange", chunk.len() * 2, &report);
                channel.destroy();
            });
        }
        {
            let report = report.clone();
            channel.on_close(move |channel, had_error| {
                info!("[{}] Connection closed", channel.id());
                report.closed.set(Some(had_error));
            });
        }
        channel.on_error(|channel, e| error!("[{}] Connection error: {}", channel.id(), e));

        channel.connect(self.target.clone())?;
        *self.channel.borrow_mut() = Some(channel);
        Ok(report)
    }

    fn send(channel: &DuplexChannel, data: &[u8]) {
        if let Err(e) = channel.write(data) {
            error!("[{}] Failed to send: {}", channel.id(), e);
            channel.destroy_with_error(e);
        }
    }

    fn log_speed(label: &str, bytes: usize, report: &ClientReport) {
        let Some(started) = *report.started.borrow() else {
            return;
        };
        let elapsed = started.elapsed();
        let speed = (bytes as f64 / 1024.0) / elapsed.as_secs_f64().max(f64::EPSILON);
        info!("=== {} Complete ===", label);
        info!("Total: {} KB", bytes / 1024);
        info!("Time: {:.2} ms", elapsed.as_secs_f64() * 1000.0);
        info!("Speed: {:.2} KB/s", speed);
    }
}

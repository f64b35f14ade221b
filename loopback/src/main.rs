mod ping_client;
mod ping_server;

use std::error::Error;

use log::*;
use memstream::{AddressRegistry, RegistryConfig};

use ping_client::PingClient;
use ping_server::PingServer;

pub(crate) const PING: &[u8] = b"ping";
pub(crate) const PONG: &[u8] = b"pong";

const DEFAULT_ADDRESS: &str = "loopback";
const DEFAULT_ROUNDS: u32 = 1000;
const DATA_SIZE: usize = 200 * 1024; // 200 KB

// Ping rounds need a few tasks each; anything beyond this is a runaway exchange
const TASK_BUDGET: usize = 1_000_000;

/// Usage: `loopback [address] [rounds] [bulk-bytes]`
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
    let rounds = match args.next() {
        Some(arg) => arg.parse()?,
        None => DEFAULT_ROUNDS,
    };
    let bulk_size = match args.next() {
        Some(arg) => arg.parse()?,
        None => DATA_SIZE,
    };

    run(&address, rounds, bulk_size)
}

fn run(address: &str, rounds: u32, bulk_size: usize) -> Result<(), Box<dyn Error>> {
    let registry = AddressRegistry::with_config(RegistryConfig::new().with_task_budget(TASK_BUDGET));

    let server = PingServer::new(address);
    let endpoint = server.start(&registry)?;

    let client = PingClient::new(address, rounds, bulk_size);
    let report = client.start(&registry)?;

    let ran = registry.run_until_idle();
    info!("Scheduler ran {} tasks", ran);

    let stats = server.stats();
    info!("=== Loopback Complete ===");
    info!("Connections accepted: {}", stats.connections.get());
    info!("Pings answered: {}", stats.pings.get());
    info!("Pongs received: {}", report.pongs.get());
    info!("Bulk echoed: {} KB", stats.bulk_bytes.get() / 1024);

    endpoint.close()?;
    registry.run_until_idle();

    if report.pongs.get() != rounds || !report.bulk_matched.get() {
        return Err(format!(
            "exchange incomplete: {}/{} pongs, bulk reply {} bytes",
            report.pongs.get(),
            rounds,
            report.bulk_received.get()
        )
        .into());
    }
    if report.closed.get() != Some(false) {
        warn!("Client did not close cleanly: {:?}", report.closed.get());
    }
    Ok(())
}

//! # memstream - in-process duplex channels
//!
//! memstream provides socket-shaped channels that never touch a kernel
//! network stack:
//!
//! - **Addressable rendezvous**: endpoints listen on named addresses, channels connect to them
//! - **Duplex delivery**: every write becomes one opaque unit delivered to the peer
//! - **Receive-side flow control**: `pause`/`resume` buffer and replay inbound units
//! - **Deterministic asynchrony**: all deferred work runs on an explicit FIFO scheduler
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Application Layer                     │
//! ├─────────────────────────────────────────────────────────┤
//! │   DuplexChannel              ListeningEndpoint           │
//! │  ┌────────┐ ┌──────────┐    ┌─────────────────────┐     │
//! │  │ Sender │ │ Receiver │    │ listening/connection│     │
//! │  └────────┘ └──────────┘    └─────────────────────┘     │
//! ├─────────────────────────────────────────────────────────┤
//! │                    AddressRegistry                       │
//! │  ┌─────────────────────┐  ┌─────────────────────────┐   │
//! │  │ bindings + links    │  │ Scheduler (FIFO turns)  │   │
//! │  └─────────────────────┘  └─────────────────────────┘   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use memstream::{AddressRegistry, Encoding};
//!
//! let registry = AddressRegistry::new();
//!
//! let server = registry.endpoint();
//! server.on_connection(|_, channel| {
//!     channel.set_encoding(Encoding::Utf8);
//!     channel.on_data(|channel, chunk| {
//!         if chunk.as_text() == Some("ping") {
//!             channel.write("pong").unwrap();
//!         }
//!     });
//! });
//! server.listen("svc").unwrap();
//!
//! let client = registry.connect("svc").unwrap();
//! client.on_connect(|channel| {
//!     channel.write("ping").unwrap();
//! });
//! client.on_data(|_, chunk| assert_eq!(chunk.as_bytes(), b"pong"));
//!
//! registry.run_until_idle();
//! ```

#![deny(unsafe_code)]

pub mod address;
pub mod channel;
pub mod config;
pub mod encoding;
pub mod error;
pub mod events;
pub mod payload;
pub mod registry;
pub mod scheduler;
pub mod server;

// Re-export commonly used types
pub use address::{Address, ChannelId, EndpointId};
pub use channel::{DuplexChannel, ReadyState};
pub use config::RegistryConfig;
pub use encoding::{Decoder, Encoding};
pub use error::{Error, ErrorKind, Result};
pub use events::{ServerEvent, StreamEvent};
pub use payload::{Chunk, Payload};
pub use registry::AddressRegistry;
pub use scheduler::Scheduler;
pub use server::ListeningEndpoint;

/// Value reported by [`DuplexChannel::stream_type`].
pub const STREAM_TYPE: &str = "mem";

//! Client library for a text-line, subject-addressed pub/sub message
//! broker.
//!
//! The client keeps one logical connection alive across a rotating list of
//! broker endpoints: publishes made while the link is down are buffered and
//! flushed after the next handshake, subscriptions survive reconnects, and
//! request/reply is layered on private inbox subjects with a timeout.
//!
//! ```no_run
//! use std::time::Duration;
//! use linebus::bus_client::{BusClient, ClientOptions};
//!
//! # async fn run() -> Result<(), linebus::bus_client::ClientError> {
//! let client = BusClient::connect(
//!     ClientOptions::builder()
//!         .host("127.0.0.1:4222")
//!         .reconnect_wait(Duration::from_secs(1))
//!         .build(),
//! )?;
//!
//! client.subscribe("orders.created", |msg| {
//!     println!("received: {}", msg.body_str());
//! })?;
//! client.publish("orders.created", "order 42")?;
//! # Ok(())
//! # }
//! ```

pub mod bus_client;
pub mod bus_wire;

pub use bus_client::{BusClient, ClientError, ClientOptions, ConnectionState, Message};

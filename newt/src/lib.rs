//! `newt` is a tick-driven CoAP (RFC 7252) client/server engine with
//! RFC 7641 observe support, plus an auxiliary MQTT 3.1/3.1.1 client
//! engine that shares its transport abstractions. It targets
//! resource-constrained nodes speaking UDP (optionally wrapped in
//! DTLS) over IPv6, but runs happily anywhere `std` does.
//!
//! ## Shape
//! Everything CoAP hangs off one [`engine::Engine`] value: the
//! retransmit queue, the resource tree, the observer tables and the
//! transport mux. Everything MQTT hangs off one [`mqtt::Clients`]
//! value. Neither spawns threads or blocks: ingress is driven by
//! feeding received bytes in, timing by calling `tick` at a fixed
//! cadence of your choosing.
//!
//! ```no_run
//! use std::net::UdpSocket;
//!
//! use newt::config::Config;
//! use newt::engine::Engine;
//!
//! fn main() -> Result<(), newt::Error> {
//!   let socket = UdpSocket::bind("[::]:5683").expect("bind");
//!
//!   let mut coap = Engine::new(Config::default());
//!   coap.add_port(5683, socket)?;
//!
//!   loop {
//!     coap.poll();
//!     coap.tick(); // in a real node, once per timer period
//!   }
//! }
//! ```
//!
//! The wire format lives in the sibling crate `newt-msg`.

// style
#![allow(clippy::unused_unit)]
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]

#[cfg(test)]
pub(crate) mod test;

/// configuring runtime behavior
pub mod config;

/// top-level CoAP ingress, egress and timing
pub mod engine;

/// the closed set of error kinds
pub mod error;

/// MQTT 3.1 / 3.1.1 client engine
pub mod mqtt;

/// network abstractions
pub mod net;

/// observer (server) and observation (client) tables
pub mod observe;

/// the retransmit queue
pub mod queue;

/// the resource tree
pub mod resource;

/// the transport mux and its DTLS session table
pub mod transport;

pub use engine::Engine;
pub use error::Error;

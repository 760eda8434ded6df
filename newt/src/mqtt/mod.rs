//! MQTT 3.1 / 3.1.1 client engine.
//!
//! A fixed-capacity table of client state machines ([`Clients`]) over
//! a byte-stream transport the application provides. Nothing here
//! opens sockets: the application connects its TCP (or serial, or
//! test) stream, tells the engine when the connect completed, feeds
//! received bytes in with [`Clients::receive`], and calls
//! [`Clients::tick`] at a fixed cadence for keep-alive and deferred
//! sends. Secure clients wrap the same stream in a TLS session
//! internally.

use crate::error::Error;

/// Per-client state machines and the public client API
pub mod client;

// Packet construction: length-prefixed strings, remaining-length
// varints, back-filled fixed headers.
pub(crate) mod encode;

// Packet consumption: frame splitting and field unpacking.
pub(crate) mod decode;

pub use client::{ClientHandle, Clients, ConnectOptions, Stream};

/// Delivery guarantee requested for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QoS {
  /// Fire and forget
  AtMostOnce = 0,
  /// Acknowledged with PUBACK
  AtLeastOnce = 1,
  /// Four-way handshake. The decoder recognizes the packet types but
  /// this engine does not enforce the PUBREC/PUBREL/PUBCOMP ordering.
  ExactlyOnce = 2,
}

impl QoS {
  /// Parse the 2-bit QoS field
  pub fn from_bits(bits: u8) -> Option<QoS> {
    match bits {
      | 0 => Some(QoS::AtMostOnce),
      | 1 => Some(QoS::AtLeastOnce),
      | 2 => Some(QoS::ExactlyOnce),
      | _ => None,
    }
  }
}

/// Which revision of the protocol a client speaks.
///
/// Selected per client at connect time, so clients of both versions
/// can coexist in one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
  /// MQTT 3.1: protocol descriptor "MQIsdp", level 3, CONNECT sent
  /// at QoS 1
  V3_1,
  /// MQTT 3.1.1: protocol descriptor "MQTT", level 4, CONNECT sent
  /// at QoS 0
  V3_1_1,
}

impl ProtocolVersion {
  pub(crate) fn descriptor(&self) -> &'static str {
    match self {
      | ProtocolVersion::V3_1 => "MQIsdp",
      | ProtocolVersion::V3_1_1 => "MQTT",
    }
  }

  pub(crate) fn level(&self) -> u8 {
    match self {
      | ProtocolVersion::V3_1 => 3,
      | ProtocolVersion::V3_1_1 => 4,
    }
  }

  pub(crate) fn connect_qos(&self) -> u8 {
    match self {
      | ProtocolVersion::V3_1 => 1,
      | ProtocolVersion::V3_1_1 => 0,
    }
  }
}

/// Last-will message registered at connect time and published by the
/// broker if the connection dies without a DISCONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
  /// Topic the will is published to
  pub topic: String,
  /// Will payload; zero-length is legal
  pub message: Vec<u8>,
  /// QoS the broker should publish the will with
  pub qos: QoS,
  /// Whether the broker should retain the will
  pub retain: bool,
}

/// An inbound application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
  /// Topic the message was published on
  pub topic: String,
  /// Message payload, everything after the variable header
  pub payload: Vec<u8>,
  /// Delivery guarantee the sender asked for
  pub qos: QoS,
  /// Present iff `qos` > 0; acknowledge QoS 1 deliveries by passing
  /// this to [`Clients::publish_ack`] (the engine does not auto-ack)
  pub message_id: Option<u16>,
  /// Redelivery flag
  pub dup: bool,
  /// Retained-message flag
  pub retain: bool,
}

/// Why a client was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
  /// Orderly shutdown (ours via `disconnect`, or the broker's
  /// DISCONNECT)
  Normal,
  /// The transport reported an error or close
  TransportClosed,
  /// The application called `abort`
  Aborted,
}

/// Events delivered to a client's event handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// Outcome of the connection procedure (transport + CONNECT +
  /// CONNACK). After an `Err` the client slot is free again.
  Connect(Result<(), Error>),
  /// The client was torn down; the handle is no longer valid
  Disconnect(DisconnectReason),
  /// A message was published on a subscribed topic
  Publish(Publish),
  /// PUBACK for a QoS 1 publish
  PubAck(u16),
  /// PUBREC (recognized, not sequenced)
  PubRec(u16),
  /// PUBREL (recognized, not sequenced)
  PubRel(u16),
  /// PUBCOMP (recognized, not sequenced)
  PubComp(u16),
  /// SUBACK for a subscribe request
  SubAck(u16),
  /// UNSUBACK for an unsubscribe request
  UnsubAck(u16),
}

// Control packet types, high nibble of the fixed header's first byte.
// SUBSCRIBE and UNSUBSCRIBE carry their mandatory QoS 1 bit.
pub(crate) const PKT_CONNECT: u8 = 0x10;
pub(crate) const PKT_CONNACK: u8 = 0x20;
pub(crate) const PKT_PUBLISH: u8 = 0x30;
pub(crate) const PKT_PUBACK: u8 = 0x40;
pub(crate) const PKT_PUBREC: u8 = 0x50;
pub(crate) const PKT_PUBREL: u8 = 0x60;
pub(crate) const PKT_PUBCOMP: u8 = 0x70;
pub(crate) const PKT_SUBSCRIBE: u8 = 0x82;
pub(crate) const PKT_SUBACK: u8 = 0x90;
pub(crate) const PKT_UNSUBSCRIBE: u8 = 0xA2;
pub(crate) const PKT_UNSUBACK: u8 = 0xB0;
pub(crate) const PKT_PINGREQ: u8 = 0xC0;
pub(crate) const PKT_PINGRSP: u8 = 0xD0;
pub(crate) const PKT_DISCONNECT: u8 = 0xE0;

// CONNECT flag bit positions
pub(crate) const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;
pub(crate) const CONNECT_FLAG_WILL: u8 = 0x04;
pub(crate) const CONNECT_FLAG_WILL_RETAIN: u8 = 0x20;
pub(crate) const CONNECT_FLAG_PASSWORD: u8 = 0x40;
pub(crate) const CONNECT_FLAG_USERNAME: u8 = 0x80;

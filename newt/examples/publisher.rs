//! An MQTT publisher that toggles a value on `led/state` once a
//! second, at QoS 1, and logs the broker's acknowledgements.
//!
//! The engine never owns sockets, so this example drives a plain
//! `TcpStream` by hand: connect, report the outcome, pump received
//! bytes in, and tick.

use std::cell::Cell;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use newt::mqtt::{Clients, ConnectOptions, Event, QoS, Stream};

struct Tcp(TcpStream);

impl Stream for Tcp {
  type Error = std::io::Error;

  fn write(&mut self, bytes: &[u8]) -> nb::Result<(), Self::Error> {
    match self.0.write_all(bytes) {
      | Ok(()) => Ok(()),
      | Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(nb::Error::WouldBlock),
      | Err(e) => Err(nb::Error::Other(e)),
    }
  }
}

fn main() {
  simple_logger::init_with_level(log::Level::Info).expect("logger");

  let broker = std::env::args().nth(1)
                               .unwrap_or_else(|| "[::1]:1883".into());

  let socket = TcpStream::connect(&broker).expect("broker unreachable");
  socket.set_nonblocking(true).expect("nonblocking");
  let mut rx = socket.try_clone().expect("clone");

  let connected = Rc::new(Cell::new(false));
  let up = connected.clone();

  let mut mqtt = Clients::new(1);
  let client =
    mqtt.connect(ConnectOptions { client_id: "newt-publisher".into(),
                                  ..ConnectOptions::default() },
                 Tcp(socket),
                 Box::new(move |_, _, evt| match evt {
                   | Event::Connect(Ok(())) => {
                     log::info!("session up");
                     up.set(true);
                   },
                   | Event::Connect(Err(e)) => log::error!("connect failed: {:?}", e),
                   | Event::PubAck(mid) => log::info!("puback for {}", mid),
                   | Event::Disconnect(reason) => {
                     log::info!("disconnected: {:?}", reason);
                     up.set(false);
                   },
                   | evt => log::debug!("event: {:?}", evt),
                 }))
        .expect("client slot");

  // the TcpStream is already connected when `connect` returns
  mqtt.transport_connected(client).expect("connect packet");

  let mut buf = [0u8; 1024];
  let mut mid = 0u16;
  let mut state = false;

  loop {
    match rx.read(&mut buf) {
      | Ok(0) => {
        mqtt.transport_closed(client);
        return;
      },
      | Ok(n) => {
        let _ = mqtt.receive(client, &buf[..n]);
      },
      | Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {},
      | Err(e) => {
        log::error!("read failed: {}", e);
        mqtt.transport_closed(client);
        return;
      },
    }

    if connected.get() {
      mid = mid.wrapping_add(1);
      state = !state;

      let payload = if state { b"1" } else { b"0" };
      match mqtt.publish(client, "led/state", payload, QoS::AtLeastOnce, mid) {
        | Ok(()) => log::info!("published {} as message {}", state as u8, mid),
        | Err(e) => log::warn!("publish deferred: {:?}", e),
      }
    }

    mqtt.tick();
    thread::sleep(Duration::from_secs(1));
  }
}

//! A small observable CoAP server:
//!
//! ```text
//! GET    /lights/led3           -> current state
//! GET    /lights/led3 Observe:0 -> current state + notifications
//! PUT    /lights/led3 "0"/"1"   -> change state, notify observers
//! GET    /.well-known/core      -> resource directory
//! ```
//!
//! Try it with any CoAP client, e.g.:
//! `coap-client -m get -s 30 "coap://[::1]/lights/led3"`

use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use newt::config::Config;
use newt::engine::{response_for, Engine};
use newt::resource::{CtMask, Permission};
use newt_msg::observe::Action;
use newt_msg::{Code, ContentFormat, Payload, Type};

const PORT: u16 = 5683;

type Udp = Engine<UdpSocket>;

fn serve_led3(engine: &mut Udp, rid: newt::resource::ResourceId, req: &newt::net::Addrd<newt_msg::Message>) {
  match req.data().code {
    | Code::GET => {
      let mut resp = response_for(req);
      resp.data_mut().code = Code::CONTENT;

      if req.data().observe() == Some(Action::Register) {
        match engine.observer_register(PORT, req, rid) {
          | Ok(grant) => {
            resp.data_mut().set_observe_seq(grant.seq);
            resp.data_mut().set_max_age(grant.max_age);
            resp.data_mut().set_content_format(grant.ct);
            log::info!("{} is now watching led3", req.addr());
          },
          | Err(e) => {
            log::warn!("observe registration refused: {:?}", e);
            return;
          },
        }
      }

      let value = engine.resources()
                        .get(rid)
                        .map(|node| node.value.clone())
                        .unwrap_or_default();
      resp.data_mut().payload = Payload(value);

      if let Err(e) = engine.send(PORT, resp, None) {
        log::error!("reply failed: {:?}", e);
      }
    },
    | Code::PUT => {
      if let Some(node) = engine.resources_mut().get_mut(rid) {
        node.value = req.data().payload.as_bytes().to_vec();
      }
      log::info!("led3 set to {:?}", req.data().payload.as_bytes());

      let mut resp = response_for(req);
      resp.data_mut().code = Code::CHANGED;
      if let Err(e) = engine.send(PORT, resp, None) {
        log::error!("reply failed: {:?}", e);
      }

      if let Err(e) = engine.notify(PORT, rid, Type::Non) {
        log::error!("notify failed: {:?}", e);
      }
    },
    | _ => {},
  }
}

fn serve_well_known(engine: &mut Udp, _: newt::resource::ResourceId, req: &newt::net::Addrd<newt_msg::Message>) {
  let mut resp = response_for(req);

  match engine.well_known_core(512) {
    | Ok(body) => {
      resp.data_mut().code = Code::CONTENT;
      resp.data_mut().set_content_format(ContentFormat::LinkFormat);
      resp.data_mut().payload = Payload(body.into_bytes());
    },
    | Err(_) => {
      resp.data_mut().code = Code::INTERNAL_SERVER_ERROR;
    },
  }

  if let Err(e) = engine.send(PORT, resp, None) {
    log::error!("reply failed: {:?}", e);
  }
}

fn main() -> Result<(), newt::Error> {
  simple_logger::init_with_level(log::Level::Debug).expect("logger");

  let socket = UdpSocket::bind(("::", PORT)).expect("bind");

  let mut coap = Udp::new(Config { auto_mode: true,
                                   server_port: PORT,
                                   ..Config::default() });
  coap.add_port(PORT, socket)?;

  let rs = coap.resources_mut();
  let root = rs.create("")?;

  let lights = rs.create("lights")?;
  rs.child_add(root, lights)?;

  let led3 = rs.create("led3")?;
  rs.child_add(lights, led3)?;
  if let Some(node) = rs.get_mut(led3) {
    node.permission = Permission::GET | Permission::PUT | Permission::OBSERVE;
    node.ct_mask = CtMask::of(&[ContentFormat::Text]);
    node.max_age = 15;
    node.expire_time = 15;
    node.value = b"0".to_vec();
    node.callback = Some(Box::new(serve_led3));
  }

  let well_known = rs.create(".well-known")?;
  rs.child_add(root, well_known)?;
  let core = rs.create("core")?;
  rs.child_add(well_known, core)?;
  if let Some(node) = rs.get_mut(core) {
    node.permission = Permission::GET;
    node.ct_mask = CtMask::of(&[ContentFormat::LinkFormat]);
    node.callback = Some(Box::new(serve_well_known));
  }

  log::info!("listening on [::]:{}", PORT);

  // poll fast, tick once a second
  let mut polls = 0u32;
  loop {
    coap.poll();

    polls += 1;
    if polls % 10 == 0 {
      coap.tick();
    }

    thread::sleep(Duration::from_millis(100));
  }
}

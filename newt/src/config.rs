/// A number of attempts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

/// Configuration options related to outbound CON messages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Con {
  /// Ticks to wait for an ACK before the first retransmission.
  ///
  /// Defaults to 2.
  /// ```
  /// use newt::config::Con;
  ///
  /// assert_eq!(Con::default().ack_timeout, 2);
  /// ```
  pub ack_timeout: u32,
  /// Randomization factor applied to `ack_timeout`; the initial
  /// timeout of each queued CON message is drawn uniformly from
  /// `[ack_timeout, ack_timeout * ack_random_factor]`.
  ///
  /// Set to 1.0 to disable jitter.
  ///
  /// Defaults to 1.5.
  /// ```
  /// use newt::config::Con;
  ///
  /// assert_eq!(Con::default().ack_random_factor, 1.5);
  /// ```
  pub ack_random_factor: f64,
  /// Number of times we are allowed to resend a CON message
  /// before erroring.
  ///
  /// Defaults to 4 attempts.
  /// ```
  /// use newt::config::{Attempts, Con};
  ///
  /// assert_eq!(Con::default().max_retransmit, Attempts(4));
  /// ```
  pub max_retransmit: Attempts,
}

impl Default for Con {
  fn default() -> Self {
    Con { ack_timeout: 2,
          ack_random_factor: 1.5,
          max_retransmit: Attempts(4) }
  }
}

/// Runtime config
///
/// All countdowns are expressed in whole tick units; the wall-clock
/// meaning of a tick is the caller's contract with
/// [`crate::engine::Engine::tick`] and is not encoded anywhere in the
/// engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
  /// See [`Con`]
  pub con: Con,

  /// Ticks after which any queued message is abandoned, no matter how
  /// many retransmissions remain. Non-confirmable messages are
  /// enqueued with this as their whole timeout so they expire exactly
  /// once without retransmission.
  ///
  /// Defaults to 45.
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().max_transmission_span, 45);
  /// ```
  pub max_transmission_span: u32,

  /// Number of slots in the retransmit queue.
  ///
  /// Defaults to 8.
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().queue_capacity, 8);
  /// ```
  pub queue_capacity: usize,

  /// Seed used for the retransmit jitter and any other engine
  /// randomness, customizable so that swarms of identical devices
  /// don't retransmit in lock-step.
  ///
  /// The default value is 0, although it is best practice to set this
  /// to something else (random integer, machine identifier).
  pub token_seed: u64,

  /// When true, the engine answers truncated requests with 4.13 on its
  /// own and drives observe notifications from the tick. When false,
  /// truncation is surfaced to the error callback and notification is
  /// application-driven.
  ///
  /// Defaults to false.
  pub auto_mode: bool,

  /// Local port auto-mode notifications are sent from.
  ///
  /// Defaults to 5683, the CoAP default port.
  pub server_port: u16,

  /// When an observable resource's `expire_time` countdown comes
  /// within this many ticks of zero, auto mode resets it to `max_age`
  /// and notifies every observer.
  ///
  /// Defaults to 2.
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().observe_notify_delta_max_age, 2);
  /// ```
  pub observe_notify_delta_max_age: u32,

  /// Largest request entity we are willing to receive; advertised in
  /// the Size1 option of 4.13 replies to truncated requests.
  ///
  /// Defaults to 1024.
  pub max_request_entity_size: u16,
}

impl Default for Config {
  fn default() -> Self {
    Config { con: Con::default(),
             max_transmission_span: 45,
             queue_capacity: 8,
             token_seed: 0,
             auto_mode: false,
             server_port: 5683,
             observe_notify_delta_max_age: 2,
             max_request_entity_size: 1024 }
  }
}

impl Config {
  /// Upper bound of the jittered initial CON timeout, in ticks.
  pub(crate) fn initial_timeout_max(&self) -> u32 {
    (self.con.ack_timeout as f64 * self.con.ack_random_factor).round() as u32
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn initial_timeout_range() {
    let cfg = Config::default();
    assert_eq!(cfg.initial_timeout_max(), 3);

    let cfg = Config { con: Con { ack_random_factor: 1.0,
                                  ..Con::default() },
                       ..Config::default() };
    assert_eq!(cfg.initial_timeout_max(), 2);
  }
}

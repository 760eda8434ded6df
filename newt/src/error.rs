use newt_msg::{MessageParseError, MessageToBytesError};

/// The closed set of error kinds this engine reports.
///
/// Local allocation failures and parameter-validation failures are
/// returned to the caller synchronously. Failures observed on the
/// network (timeout, peer reset) are delivered to the per-exchange
/// callback registered at send time; if the exchange is untracked the
/// error travels to the process-wide error callback.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Error {
  /// A confirmable message exhausted its retransmissions without
  /// being acknowledged.
  TransmissionTimeout,
  /// The peer answered a confirmable message with Reset.
  TransmissionResetByPeer,
  /// Establishing a connection (MQTT) failed.
  ConnectionFailed,
  /// An established connection (MQTT) was closed by the transport.
  ConnectionClosed,
  /// No resource matched the request path.
  NotFound,
  /// The resource exists but its permission bit for the request
  /// method is clear.
  MethodNotAllowed,
  /// The request could not be processed.
  BadRequest,
  /// A fixed-capacity table (queue, client table, session table) is full.
  NoMemory,
  /// A previous operation has not completed (e.g. an MQTT write is
  /// still pending).
  Busy,
  /// A parameter failed validation.
  InvalidParameter,
  /// The operation does not apply to the current state.
  InvalidState,
  /// A buffer or name exceeded its size bound.
  DataSize,
}

impl From<MessageParseError> for Error {
  fn from(_: MessageParseError) -> Self {
    Error::BadRequest
  }
}

impl From<MessageToBytesError> for Error {
  fn from(_: MessageToBytesError) -> Self {
    Error::DataSize
  }
}

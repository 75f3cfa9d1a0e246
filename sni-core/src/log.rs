//! Channel-delivered log messages, independent of any particular sink.
//!
//! Mirrors the teacher's `project-karpacz-common::log::LogMessage`: a plain
//! struct carried over an `async_channel`, so library code never needs to
//! know whether the other end is a file, stderr, or a syslog forwarder.

/// A single log line plus its severity.
#[derive(Debug, Clone)]
pub struct LogMessage {
  is_error: bool,
  message: String,
}

impl LogMessage {
  /// Creates a new log message.
  pub fn new(message: String, is_error: bool) -> Self {
    Self { is_error, message }
  }

  /// Consumes the message, returning its text and error flag.
  pub fn get_message(self) -> (String, bool) {
    (self.message, self.is_error)
  }

  pub fn is_error(&self) -> bool {
    self.is_error
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

/// Sends an informational message, swallowing send errors (no receiver is
/// not a reason to fail the caller's real work).
pub async fn log_info(sender: &Option<async_channel::Sender<LogMessage>>, message: impl Into<String>) {
  if let Some(sender) = sender {
    sender.send(LogMessage::new(message.into(), false)).await.unwrap_or_default();
  }
}

/// Sends an error message, same fire-and-forget contract as [`log_info`].
pub async fn log_error(sender: &Option<async_channel::Sender<LogMessage>>, message: impl Into<String>) {
  if let Some(sender) = sender {
    sender.send(LogMessage::new(message.into(), true)).await.unwrap_or_default();
  }
}

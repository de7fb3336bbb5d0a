use sortline_core::{DeviceKind, MessageKind, Result};
use sortline_protocol::DeviceMessage;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Interface every device controller exposes to the dispatch path.
///
/// One method per message kind. Errors are returned rather than raised; the
/// actor running the controller logs them and keeps going.
pub trait DeviceController: Send + 'static {
    fn device(&self) -> DeviceKind;

    fn handle_event(&mut self, payload: &str) -> Result<()>;

    /// Commands injected from the external command channel.
    fn handle_command(&mut self, payload: &str) -> Result<()>;

    fn handle_response(&mut self, payload: &str) -> Result<()> {
        debug!(device = %self.device(), payload, "Unhandled response");
        Ok(())
    }

    fn handle_error(&mut self, payload: &str) -> Result<()> {
        warn!(device = %self.device(), payload, "Device reported an error");
        Ok(())
    }

    /// Earliest armed timer, if any.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    /// Called once `next_deadline` has passed.
    fn on_deadline(&mut self, _now: Instant) -> Result<()> {
        Ok(())
    }

    fn handle_message(&mut self, message: &DeviceMessage) -> Result<()> {
        match message.kind {
            MessageKind::Event => self.handle_event(&message.payload),
            MessageKind::Command => self.handle_command(&message.payload),
            MessageKind::Response => self.handle_response(&message.payload),
            MessageKind::Error => self.handle_error(&message.payload),
        }
    }
}

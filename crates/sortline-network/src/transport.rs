use sortline_core::DeviceKind;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Outbound half of a device link.
///
/// `send` wraps `payload` in a command frame for `device`. It returns whether
/// the line was handed to the link, not whether the device received it.
pub trait DeviceTransport: Send + Sync {
    fn send(&self, device: DeviceKind, payload: &str) -> bool;

    fn is_connected(&self, device: DeviceKind) -> bool;
}

/// Sends each device's commands over the transport that owns that device.
#[derive(Default, Clone)]
pub struct RoutedTransport {
    routes: HashMap<DeviceKind, Arc<dyn DeviceTransport>>,
}

impl RoutedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, device: DeviceKind, transport: Arc<dyn DeviceTransport>) -> Self {
        self.routes.insert(device, transport);
        self
    }
}

impl DeviceTransport for RoutedTransport {
    fn send(&self, device: DeviceKind, payload: &str) -> bool {
        match self.routes.get(&device) {
            Some(transport) => transport.send(device, payload),
            None => {
                debug!(device = %device, "No transport routed for device");
                false
            }
        }
    }

    fn is_connected(&self, device: DeviceKind) -> bool {
        self.routes
            .get(&device)
            .is_some_and(|transport| transport.is_connected(device))
    }
}

use sortline_core::{DeviceKind, MessageKind};
use sortline_protocol::DeviceMessage;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace};

type Handler = Arc<dyn Fn(DeviceMessage) + Send + Sync>;

/// Routing table from `(device, kind)` to a message handler.
///
/// Cloning is cheap and every clone shares the same table, so one table can
/// be handed to each transport and to the code that registers controllers.
/// Handlers run on the transport's read loop and must return quickly.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: Arc<RwLock<HashMap<(DeviceKind, MessageKind), Handler>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for one `(device, kind)` pair, replacing any previous one.
    pub fn on_message<F>(&self, device: DeviceKind, kind: MessageKind, handler: F)
    where
        F: Fn(DeviceMessage) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.insert((device, kind), Arc::new(handler)).is_some() {
            debug!(device = %device, kind = %kind, "Replaced message handler");
        }
    }

    pub fn has_handler(&self, device: DeviceKind, kind: MessageKind) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(device, kind))
    }

    /// Invoke the handler registered for the message. Returns `false` when none is.
    pub fn dispatch(&self, message: DeviceMessage) -> bool {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(message.device, message.kind))
            .cloned();

        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => {
                trace!(message = %message, "No handler registered");
                false
            }
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<_> = handlers.keys().collect();
        keys.sort();
        f.debug_struct("HandlerTable").field("routes", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_dispatch_by_device_and_kind() {
        let table = HandlerTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        table.on_message(DeviceKind::Sorter, MessageKind::Event, move |msg| {
            sink.lock().unwrap().push(msg.payload);
        });

        assert!(table.dispatch(DeviceMessage::event(DeviceKind::Sorter, "ir1")));
        assert!(!table.dispatch(DeviceMessage::event(DeviceKind::Gate, "id1;2")));
        assert!(!table.dispatch(DeviceMessage::command(DeviceKind::Sorter, "st")));

        assert_eq!(*seen.lock().unwrap(), vec!["ir1".to_string()]);
    }

    #[test]
    fn test_clones_share_routes() {
        let table = HandlerTable::new();
        let clone = table.clone();
        clone.on_message(DeviceKind::Gate, MessageKind::Response, |_| {});
        assert!(table.has_handler(DeviceKind::Gate, MessageKind::Response));
    }

    #[test]
    fn test_handler_may_register_while_dispatching() {
        let table = HandlerTable::new();
        let inner = table.clone();
        table.on_message(DeviceKind::Sorter, MessageKind::Event, move |_| {
            inner.on_message(DeviceKind::Sorter, MessageKind::Error, |_| {});
        });

        assert!(table.dispatch(DeviceMessage::event(DeviceKind::Sorter, "ir1")));
        assert!(table.has_handler(DeviceKind::Sorter, MessageKind::Error));
    }
}

//! Actor runtime for controllers.
//!
//! Each controller is owned by exactly one task. Transports feed it through
//! a bounded inbox registered in the [`HandlerTable`]; callers outside the
//! dispatch path (the command channel, diagnostics) reach it with
//! [`ControllerHandle::call`]. State is never shared, so there is no lock
//! around controller state.
//!
//! ```text
//! ┌───────────┐  try_send  ┌────────┐
//! │ transport │───────────►│        │
//! └───────────┘            │ inbox  │──► controller task ──► handle_message()
//! ┌───────────┐   call()   │ (mpsc) │          │
//! │ commands  │───────────►│        │          └── sleep_until(next_deadline) ──► on_deadline()
//! └───────────┘            └────────┘
//! ```

use sortline_core::constants::CONTROLLER_INBOX_CAPACITY;
use sortline_core::{DeviceKind, Error, MessageKind, Result};
use sortline_network::HandlerTable;
use sortline_protocol::DeviceMessage;
use std::future::pending;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::DeviceController;

type Call<C> = Box<dyn FnOnce(&mut C) + Send>;

enum ControllerInput<C> {
    Message(DeviceMessage),
    Call(Call<C>),
}

/// Cloneable address of a running controller.
pub struct ControllerHandle<C> {
    device: DeviceKind,
    inbox: mpsc::Sender<ControllerInput<C>>,
}

impl<C> Clone for ControllerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            device: self.device,
            inbox: self.inbox.clone(),
        }
    }
}

impl<C: DeviceController> ControllerHandle<C> {
    pub fn device(&self) -> DeviceKind {
        self.device
    }

    /// Queue a device message without blocking. Returns `false` if the inbox
    /// is full or the controller has stopped.
    pub fn deliver(&self, message: DeviceMessage) -> bool {
        match self.inbox.try_send(ControllerInput::Message(message)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(ControllerInput::Message(message))) => {
                warn!(
                    device = %self.device,
                    message = %message,
                    "Controller inbox full; dropping message"
                );
                false
            }
            Err(_) => {
                debug!(device = %self.device, "Controller stopped; dropping message");
                false
            }
        }
    }

    /// Route every `(device, kind)` pair of this controller's device into its inbox.
    pub fn register(&self, handlers: &HandlerTable) {
        for kind in MessageKind::ALL {
            let handle = self.clone();
            handlers.on_message(self.device, kind, move |message| {
                handle.deliver(message);
            });
        }
    }

    /// Run `f` on the controller's task and return its result.
    ///
    /// # Errors
    ///
    /// Returns `Error::Communication` if the controller has stopped.
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut C) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let call: Call<C> = Box::new(move |controller| {
            let _ = tx.send(f(controller));
        });
        self.inbox
            .send(ControllerInput::Call(call))
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> Error {
        Error::Communication(format!("{} controller stopped", self.device))
    }
}

/// Owns the controller tasks and stops them together.
pub struct ControllerRuntime {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl ControllerRuntime {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Tie the runtime to an existing shutdown token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: JoinSet::new(),
        }
    }

    /// Move `controller` onto its own task and return its handle.
    pub fn spawn<C: DeviceController>(&mut self, controller: C) -> ControllerHandle<C> {
        let device = controller.device();
        let (tx, rx) = mpsc::channel(CONTROLLER_INBOX_CAPACITY);
        self.tasks.spawn(run(controller, rx, self.cancel.child_token()));
        info!(device = %device, "Controller started");
        ControllerHandle { device, inbox: tx }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every controller and wait for its task to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "Controller task panicked");
                }
            }
        }
        info!("Controllers stopped");
    }
}

impl Default for ControllerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

async fn run<C: DeviceController>(
    mut controller: C,
    mut inbox: mpsc::Receiver<ControllerInput<C>>,
    cancel: CancellationToken,
) {
    let device = controller.device();
    loop {
        let deadline = controller.next_deadline();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            input = inbox.recv() => match input {
                Some(ControllerInput::Message(message)) => {
                    report(device, controller.handle_message(&message));
                }
                Some(ControllerInput::Call(call)) => call(&mut controller),
                None => break,
            },
            _ = wait_for(deadline) => {
                report(device, controller.on_deadline(Instant::now()));
            }
        }
    }
    debug!(device = %device, "Controller task exiting");
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

fn report(device: DeviceKind, outcome: Result<()>) {
    if let Err(e) = outcome {
        if e.is_recoverable() {
            warn!(device = %device, error = %e, "Controller rejected message");
        } else {
            error!(device = %device, error = %e, "Controller failed to handle message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Counts messages and fires a single deadline.
    struct Counter {
        events: Vec<String>,
        deadline: Option<Instant>,
        fired: u32,
    }

    impl DeviceController for Counter {
        fn device(&self) -> DeviceKind {
            DeviceKind::Sorter
        }

        fn handle_event(&mut self, payload: &str) -> Result<()> {
            self.events.push(payload.to_string());
            Ok(())
        }

        fn handle_command(&mut self, payload: &str) -> Result<()> {
            Err(Error::validation(format!("no commands: {payload}")))
        }

        fn next_deadline(&self) -> Option<Instant> {
            self.deadline
        }

        fn on_deadline(&mut self, _now: Instant) -> Result<()> {
            self.deadline = None;
            self.fired += 1;
            Ok(())
        }
    }

    fn counter(deadline: Option<Instant>) -> Counter {
        Counter {
            events: Vec::new(),
            deadline,
            fired: 0,
        }
    }

    #[tokio::test]
    async fn test_messages_through_handler_table() {
        let mut runtime = ControllerRuntime::new();
        let handle = runtime.spawn(counter(None));
        let table = HandlerTable::new();
        handle.register(&table);

        assert!(table.dispatch(DeviceMessage::event(DeviceKind::Sorter, "ir1")));
        assert!(table.dispatch(DeviceMessage::command(DeviceKind::Sorter, "st")));

        let events = handle.call(|p| p.events.clone()).await.unwrap();
        assert_eq!(events, vec!["ir1".to_string()]);
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_once() {
        let mut runtime = ControllerRuntime::new();
        let handle = runtime.spawn(counter(Some(Instant::now() + Duration::from_secs(5))));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(handle.call(|p| p.fired).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.call(|p| p.fired).await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(handle.call(|p| p.fired).await.unwrap(), 1);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_call_after_shutdown_fails() {
        let mut runtime = ControllerRuntime::new();
        let handle = runtime.spawn(counter(None));
        runtime.shutdown().await;

        assert!(handle.call(|p| p.fired).await.is_err());
        assert!(!handle.deliver(DeviceMessage::event(DeviceKind::Sorter, "ir1")));
    }
}

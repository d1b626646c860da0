//! Lifecycle events and their delivery

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::types::{FailReason, NetworkCredential, NetworkType};

const SUBSCRIBER_CAPACITY: usize = 64;

/// Events emitted by the provisioning manager, in lifecycle order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvEvent {
    /// Manager initialized
    Init,
    /// Provisioning session started
    Start,
    /// Credentials received and handed to the network stack
    CredentialReceived(NetworkCredential),
    /// Network stack failed to connect with the received credentials
    CredentialFailed(FailReason),
    /// Network stack connected with the received credentials
    CredentialSuccess(NetworkType),
    /// Provisioning session stopped
    End,
    /// Manager de-initialized
    Deinit,
}

impl ProvEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProvEvent::Init => "init",
            ProvEvent::Start => "start",
            ProvEvent::CredentialReceived(NetworkCredential::Wifi(_)) => "wifi_cred_recv",
            ProvEvent::CredentialReceived(NetworkCredential::Thread(_)) => "thread_dataset_recv",
            ProvEvent::CredentialFailed(FailReason::Wifi(_)) => "wifi_cred_fail",
            ProvEvent::CredentialFailed(FailReason::Thread(_)) => "thread_dataset_fail",
            ProvEvent::CredentialSuccess(NetworkType::Wifi) => "wifi_cred_success",
            ProvEvent::CredentialSuccess(NetworkType::Thread) => "thread_dataset_success",
            ProvEvent::End => "end",
            ProvEvent::Deinit => "deinit",
        }
    }
}

/// Listener for provisioning events
///
/// Called synchronously while the manager holds its state lock, so
/// implementations must not block. To drive the manager from an event
/// (e.g. stop after success), spawn a task.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &ProvEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&ProvEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProvEvent) {
        self(event)
    }
}

/// Single authoritative emitter
///
/// Delivers every event to the scheme handler, then the application
/// handler, then the async subscribers.
pub(crate) struct EventEmitter {
    scheme_handler: Option<Arc<dyn EventHandler>>,
    app_handler: Option<Arc<dyn EventHandler>>,
    subscribers: broadcast::Sender<ProvEvent>,
}

impl EventEmitter {
    pub(crate) fn new(
        scheme_handler: Option<Arc<dyn EventHandler>>,
        app_handler: Option<Arc<dyn EventHandler>>,
    ) -> Self {
        let (subscribers, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            scheme_handler,
            app_handler,
            subscribers,
        }
    }

    pub(crate) fn emit(&self, event: ProvEvent) {
        debug!(event = event.name(), "Emitting provisioning event");

        if let Some(handler) = &self.scheme_handler {
            handler.on_event(&event);
        }
        if let Some(handler) = &self.app_handler {
            handler.on_event(&event);
        }
        // No subscribers is fine
        let _ = self.subscribers.send(event);
    }

    pub(crate) fn subscribers(&self) -> broadcast::Sender<ProvEvent> {
        self.subscribers.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::types::{WifiConfig, WifiFailReason};
    use std::sync::Mutex;

    /// Handler recording every event it sees
    #[derive(Default)]
    pub(crate) struct RecordingHandler {
        events: Mutex<Vec<ProvEvent>>,
    }

    impl RecordingHandler {
        pub(crate) fn events(&self) -> Vec<ProvEvent> {
            self.events.lock().unwrap().clone()
        }

        pub(crate) fn names(&self) -> Vec<&'static str> {
            self.events().iter().map(ProvEvent::name).collect()
        }

        pub(crate) fn count(&self, name: &str) -> usize {
            self.names().iter().filter(|n| **n == name).count()
        }
    }

    impl EventHandler for RecordingHandler {
        fn on_event(&self, event: &ProvEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_event_names() {
        let recv = ProvEvent::CredentialReceived(NetworkCredential::Wifi(WifiConfig::new(
            "Net", "password",
        )));
        assert_eq!(recv.name(), "wifi_cred_recv");
        assert_eq!(
            ProvEvent::CredentialFailed(FailReason::Wifi(WifiFailReason::AuthError)).name(),
            "wifi_cred_fail"
        );
        assert_eq!(
            ProvEvent::CredentialSuccess(NetworkType::Thread).name(),
            "thread_dataset_success"
        );
    }

    #[tokio::test]
    async fn test_emitter_delivers_to_all_listeners_in_order() {
        let scheme = Arc::new(RecordingHandler::default());
        let app = Arc::new(RecordingHandler::default());
        let emitter = EventEmitter::new(Some(scheme.clone()), Some(app.clone()));
        let mut rx = emitter.subscribers().subscribe();

        emitter.emit(ProvEvent::Init);
        emitter.emit(ProvEvent::Start);

        assert_eq!(scheme.names(), vec!["init", "start"]);
        assert_eq!(app.names(), vec!["init", "start"]);
        assert_eq!(rx.recv().await.unwrap(), ProvEvent::Init);
        assert_eq!(rx.recv().await.unwrap(), ProvEvent::Start);
    }

    #[test]
    fn test_closure_handler() {
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        let emitter = EventEmitter::new(
            None,
            Some(Arc::new(move |_event: &ProvEvent| {
                *counter.lock().unwrap() += 1;
            })),
        );

        emitter.emit(ProvEvent::Init);
        emitter.emit(ProvEvent::Deinit);
        assert_eq!(*seen.lock().unwrap(), 2);
    }
}

//! Event delivery from sessions to the front-end.
//!
//! Each session has at most one subscriber, attached when `connect` is
//! called. Events for a session without a live subscriber follow the
//! configured [`FallbackMode`]: they are dropped, or sent to a single
//! default subscriber.

mod event;

pub use event::{SessionEvent, StatusPayload};

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::FallbackMode;

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

#[derive(Debug)]
struct Subscriber {
    token: Uuid,
    sender: EventSender,
}

/// Routes session events to per-session subscribers
#[derive(Debug)]
pub struct EventRelay {
    subscribers: RwLock<HashMap<String, Subscriber>>,
    default_subscriber: RwLock<Option<EventSender>>,
    fallback: FallbackMode,
}

impl Default for EventRelay {
    fn default() -> Self {
        Self::new(FallbackMode::Drop)
    }
}

impl EventRelay {
    pub fn new(fallback: FallbackMode) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            default_subscriber: RwLock::new(None),
            fallback,
        }
    }

    pub fn fallback(&self) -> FallbackMode {
        self.fallback
    }

    /// Attach `sender` as the subscriber for `session_id`, replacing any
    /// previous one. The returned token detaches exactly this attachment.
    pub fn attach(&self, session_id: &str, sender: EventSender) -> Uuid {
        let token = Uuid::new_v4();
        self.subscribers
            .write()
            .insert(session_id.to_string(), Subscriber { token, sender });
        token
    }

    /// Create a channel and attach its sending half
    pub fn subscribe(&self, session_id: &str) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(session_id, tx);
        rx
    }

    /// Detach the subscriber for `session_id` if it is still the attachment
    /// identified by `token`.
    ///
    /// A session that reconnected under the same id keeps its new
    /// subscriber, even when both attachments share one channel.
    pub fn detach(&self, session_id: &str, token: Uuid) {
        let mut subscribers = self.subscribers.write();
        if subscribers
            .get(session_id)
            .is_some_and(|current| current.token == token)
        {
            subscribers.remove(session_id);
        }
    }

    pub fn has_subscriber(&self, session_id: &str) -> bool {
        self.subscribers
            .read()
            .get(session_id)
            .is_some_and(|subscriber| !subscriber.sender.is_closed())
    }

    /// Install the catch-all subscriber used by [`FallbackMode::DefaultSubscriber`]
    pub fn set_default_subscriber(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.default_subscriber.write() = Some(tx);
        rx
    }

    /// Deliver an event. Returns false if it was dropped.
    pub fn emit(&self, session_id: &str, event: SessionEvent) -> bool {
        let event = {
            let subscribers = self.subscribers.read();
            match subscribers.get(session_id) {
                Some(subscriber) => match subscriber.sender.send(event) {
                    Ok(()) => return true,
                    Err(mpsc::error::SendError(event)) => event,
                },
                None => event,
            }
        };

        match self.fallback {
            FallbackMode::Drop => {
                tracing::debug!("Dropping {} event for session {}", event.kind(), session_id);
                false
            }
            FallbackMode::DefaultSubscriber => {
                let default = self.default_subscriber.read();
                match default.as_ref() {
                    Some(tx) => tx.send(event).is_ok(),
                    None => {
                        tracing::debug!(
                            "No default subscriber for {} event of session {}",
                            event.kind(),
                            session_id
                        );
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthType, SessionIdentity, SessionStatus};

    fn output(session_id: &str, data: &[u8]) -> SessionEvent {
        SessionEvent::Output {
            session_id: session_id.to_string(),
            data: data.to_vec(),
        }
    }

    #[test]
    fn delivers_to_attached_subscriber_in_order() {
        let relay = EventRelay::default();
        let mut rx = relay.subscribe("s1");

        assert!(relay.emit("s1", output("s1", b"a")));
        assert!(relay.emit("s1", output("s1", b"b")));

        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Output { data, .. }) if data == b"a"));
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Output { data, .. }) if data == b"b"));
    }

    #[test]
    fn drop_policy_discards_unrouted_events() {
        let relay = EventRelay::new(FallbackMode::Drop);
        let mut default_rx = relay.set_default_subscriber();

        assert!(!relay.emit("nobody", output("nobody", b"x")));
        assert!(default_rx.try_recv().is_err());
    }

    #[test]
    fn default_subscriber_receives_unrouted_events() {
        let relay = EventRelay::new(FallbackMode::DefaultSubscriber);
        let mut default_rx = relay.set_default_subscriber();

        let event = SessionEvent::StatusChange {
            session_id: "s9".into(),
            payload: StatusPayload {
                status: SessionStatus::Disconnected,
                identity: SessionIdentity::new("h", 22, "u", AuthType::Password),
                message: None,
            },
        };
        assert!(relay.emit("s9", event));
        assert!(matches!(
            default_rx.try_recv(),
            Ok(SessionEvent::StatusChange { session_id, .. }) if session_id == "s9"
        ));
    }

    #[test]
    fn closed_subscriber_falls_back() {
        let relay = EventRelay::new(FallbackMode::DefaultSubscriber);
        let mut default_rx = relay.set_default_subscriber();
        let rx = relay.subscribe("s1");
        drop(rx);

        assert!(!relay.has_subscriber("s1"));
        assert!(relay.emit("s1", output("s1", b"late")));
        assert!(default_rx.try_recv().is_ok());
    }

    #[test]
    fn detach_keeps_replacement_subscriber() {
        let relay = EventRelay::default();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let old = relay.attach("s1", old_tx);
        let mut new_rx = relay.subscribe("s1");

        relay.detach("s1", old);

        assert!(relay.has_subscriber("s1"));
        assert!(relay.emit("s1", output("s1", b"still here")));
        assert!(new_rx.try_recv().is_ok());
    }

    #[test]
    fn detach_distinguishes_attachments_sharing_a_channel() {
        let relay = EventRelay::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = relay.attach("s1", tx.clone());
        let second = relay.attach("s1", tx);

        relay.detach("s1", first);
        assert!(relay.emit("s1", output("s1", b"kept")));
        assert!(rx.try_recv().is_ok());

        relay.detach("s1", second);
        assert!(!relay.has_subscriber("s1"));
    }
}

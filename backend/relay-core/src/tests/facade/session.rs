use crate::facade::{EventSink, InboundMessage, Session};
use crate::settings::Settings;

use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<InboundMessage>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<InboundMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn on_message(&self, message: InboundMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

fn message(data: &str) -> InboundMessage {
    InboundMessage {
        from_notification: false,
        data: data.to_string(),
    }
}

/// **VALUE**: Before the UI is ready only the latest message is kept, and it
/// is delivered exactly once when the UI becomes ready.
///
/// **BUG THIS CATCHES**: Queueing every message (a replay the app does not
/// expect) or dropping the parked one on ready.
#[test]
fn given_messages_before_ready_when_marked_ready_then_only_latest_delivered() {
    // GIVEN
    let sink = Arc::new(RecordingSink::default());
    let session = Session::new(Settings::new("Acme"), sink.clone());
    session.deliver(message("first"));
    session.deliver(message("second"));
    assert!(sink.messages().is_empty());

    // WHEN
    session.mark_api_ready();
    session.mark_api_ready();

    // THEN
    assert_eq!(sink.messages(), vec![message("second")]);
}

#[test]
fn given_ready_session_when_message_delivered_then_forwarded_immediately() {
    // GIVEN
    let sink = Arc::new(RecordingSink::default());
    let session = Session::new(Settings::new("Acme"), sink.clone());
    session.mark_api_ready();

    // WHEN
    session.deliver(message("a"));
    session.deliver(message("b"));

    // THEN
    assert_eq!(sink.messages(), vec![message("a"), message("b")]);
}

#[tokio::test]
async fn given_session_when_updated_then_readers_see_change() {
    // GIVEN
    let session = Session::new(Settings::new("Acme"), Arc::new(RecordingSink::default()));

    // WHEN
    let returned = session.update(|s| s.port = 9).await;

    // THEN
    assert_eq!(returned.port, 9);
    assert_eq!(session.settings().await.port, 9);
}

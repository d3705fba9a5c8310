//! Where upstream messages go once the worker has them.
//!
//! Tried in order: the controller pipe, the app window, a toast. The
//! `reconnect` edge signal is only meaningful to a running app, so it is
//! never turned into a toast.

use crate::connection::LocalDelivery;
use crate::handshake::WorkerHandshake;
use crate::notify::{Notification, NotificationSink};
use crate::protocol::{ProtocolMessage, RECONNECT_SIGNAL};

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, trace, warn};
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Queues messages for a single routing task so relay order matches
/// arrival order.
pub struct WorkerDelivery {
    queue: mpsc::UnboundedSender<String>,
}

impl WorkerDelivery {
    pub fn spawn(
        handshake: Arc<WorkerHandshake>,
        notifier: Arc<dyn NotificationSink>,
    ) -> (Self, JoinHandle<()>) {
        let (queue, mut pending) = mpsc::unbounded_channel::<String>();

        let router = TokioSpawn(async move {
            while let Some(message) = pending.recv().await {
                route(&handshake, notifier.as_ref(), message).await;
            }
        });

        (Self { queue }, router)
    }
}

impl LocalDelivery for WorkerDelivery {
    fn deliver(&self, message: String) {
        if self.queue.send(message).is_err() {
            debug!("Delivery router stopped, message dropped");
        }
    }
}

async fn route(handshake: &WorkerHandshake, notifier: &dyn NotificationSink, message: String) {
    match handshake.send(&ProtocolMessage::socket_message(&message)).await {
        Ok(()) => trace!("Relayed upstream message to foreground"),
        Err(e) => {
            debug!("No foreground for upstream message: {e}");

            if message == RECONNECT_SIGNAL {
                return;
            }

            match Notification::parse(&message) {
                Some(notification) => {
                    let argument = BASE64.encode(message.as_bytes());
                    if !notifier.show(&notification.title, &notification.display_body(), &argument) {
                        warn!("Notification sink rejected \"{}\"", notification.title);
                    }
                }
                None => debug!("Upstream message is not a notification, dropped"),
            }
        }
    }
}

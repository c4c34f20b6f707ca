//! Client protocol handling
//!
//! Turns one inbound text frame into the replies the server owes the client.
//! `ack` and `pong` produce no reply; malformed frames produce an `error`
//! reply and leave the connection open.

use std::sync::Arc;

use tracing::{debug, warn};
use vigil_domain::{ClientMessage, Result, ServerMessage, SubscriptionAction};

use super::broadcaster::EventBroadcaster;
use crate::ports::OutboundFrame;

/// Handles client messages against a shared broadcaster
#[derive(Clone)]
pub struct ProtocolHandler {
    broadcaster: Arc<EventBroadcaster>,
}

impl ProtocolHandler {
    pub fn new(broadcaster: Arc<EventBroadcaster>) -> Self {
        Self { broadcaster }
    }

    /// Replies for one inbound frame, in send order
    pub fn handle(&self, connection_id: &str, text: &str) -> Result<Vec<String>> {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection_id, error = %e, "Rejecting client message");
                return Ok(vec![ServerMessage::Error { message: e.to_string() }.to_json()?]);
            }
        };

        match message {
            ClientMessage::Subscribe { events } => {
                let accepted = self.broadcaster.subscriptions().subscribe(connection_id, &events)?;
                let reply = ServerMessage::Subscription {
                    action: SubscriptionAction::Subscribed,
                    events: accepted,
                };
                Ok(vec![reply.to_json()?])
            }
            ClientMessage::Unsubscribe { events } => {
                let removed =
                    self.broadcaster.subscriptions().unsubscribe(connection_id, events.as_deref())?;
                let reply = ServerMessage::Subscription {
                    action: SubscriptionAction::Unsubscribed,
                    events: removed,
                };
                Ok(vec![reply.to_json()?])
            }
            ClientMessage::Resync { channel, last_sequence } => {
                let replayed = self.broadcaster.get_messages_since(last_sequence, true);
                debug!(connection_id, last_sequence, count = replayed.len(), "Resync requested");

                let ack = ServerMessage::ResyncAck { channel, last_sequence, count: replayed.len() };
                let mut replies = Vec::with_capacity(replayed.len() + 1);
                replies.push(ack.to_json()?);
                replies.extend(replayed.iter().map(|message| message.to_string()));
                Ok(replies)
            }
            ClientMessage::Ack { sequence } => {
                self.broadcaster.record_ack(connection_id, sequence);
                Ok(Vec::new())
            }
            ClientMessage::Pong => Ok(Vec::new()),
        }
    }

    /// Handle a frame and send the replies to the connection
    ///
    /// Stops at the first failed send; the broadcaster has already dropped
    /// the connection by then.
    pub async fn respond(&self, connection_id: &str, text: &str) -> Result<usize> {
        let replies = self.handle(connection_id, text)?;
        let count = replies.len();
        for reply in replies {
            if let Err(e) = self.broadcaster.send_to(connection_id, OutboundFrame::Text(reply)).await {
                warn!(connection_id, error = %e, "Failed to send protocol reply");
                return Err(e);
            }
        }
        Ok(count)
    }
}

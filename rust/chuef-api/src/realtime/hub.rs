//! In-process fan-out of new chat messages.

use tokio::sync::broadcast;

use crate::database::ChatMessageView;

/// Broadcasts every stored chat message to live subscribers.
#[derive(Debug, Clone)]
pub struct ChatHub {
    sender: broadcast::Sender<ChatMessageView>,
}

impl ChatHub {
    /// `capacity` messages are buffered per subscriber before it lags.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a message. Returns how many subscribers received it.
    pub fn publish(&self, message: ChatMessageView) -> usize {
        // Err only means nobody is listening.
        self.sender.send(message).unwrap_or(0)
    }

    /// Subscribe to the messages of one room.
    #[must_use]
    pub fn subscribe(&self, room: impl Into<String>) -> RoomSubscription {
        RoomSubscription {
            room: room.into(),
            receiver: self.sender.subscribe(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A live feed of one room's messages.
#[derive(Debug)]
pub struct RoomSubscription {
    room: String,
    receiver: broadcast::Receiver<ChatMessageView>,
}

impl RoomSubscription {
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Next message of the room. Messages missed while lagging are skipped.
    /// `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<ChatMessageView> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if message.room == self.room => return Some(message),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(room = %self.room, skipped, "Chat subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

//! Realtime chat: the server-side broadcast hub and the client-side
//! timeline reconciliation it feeds.

pub mod hub;
pub mod timeline;

pub use hub::{ChatHub, RoomSubscription};
pub use timeline::{ChatTimeline, CooldownGate, LocalAuthor};

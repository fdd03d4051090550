//! `chatdock`: realtime presence and direct-messaging core.
//!
//! Tracks which contacts are online, keeps the open chat windows and their
//! conversations in sync with a persistent store and a server-push change
//! feed, and maintains unread counters across reconnects.

pub mod bus;
pub mod chat;
pub mod clock;
pub mod config;
pub mod events;
pub mod notify;
pub mod presence;
pub mod scope;
pub mod session;
pub mod store;
pub mod unread;

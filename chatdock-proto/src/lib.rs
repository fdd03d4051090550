//! Shared data types for `chatdock`: contacts, conversation keys, messages,
//! and the change-feed wire format.

pub mod codec;
pub mod contact;
pub mod event;
pub mod key;
pub mod message;

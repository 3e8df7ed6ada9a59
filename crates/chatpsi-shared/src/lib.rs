//! # chatpsi-shared
//!
//! Types shared by the ChatPsi gateway, store and client: the canonical
//! [`Message`](message::Message) shape, identifiers, the JSON wire protocol
//! spoken between them and the signed access credential.

pub mod constants;
pub mod credential;
pub mod error;
pub mod message;
pub mod protocol;
pub mod types;

pub use message::{Media, Message, MessageBody};
pub use types::{AttachmentKind, ClientRef, MessageId, MessageKind, Sender, ThreadId, UserId};

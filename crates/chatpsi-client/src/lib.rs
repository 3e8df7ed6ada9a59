//! # chatpsi-client
//!
//! Client side of ChatPsi: the chat session controller that keeps a local
//! timeline consistent with the server, the attachment uploader, and the
//! HTTP and websocket implementations of the collaborators it talks to.
//!
//! ```text
//! SessionHandle ──commands──▶ session actor ──▶ DispatchGateway / MessageHistory
//!       ▲                         │    ▲
//!       └──snapshots, notices─────┘    └── Subscription (RealtimeNotifier)
//! ```

pub mod backend;
pub mod config;
pub mod draft;
pub mod error;
pub mod events;
pub mod realtime;
pub mod scroll;
pub mod seams;
pub mod session;
pub mod timeline;
pub mod timers;
pub mod uploader;

pub use backend::HttpBackend;
pub use config::{ClientConfig, SessionConfig};
pub use draft::Draft;
pub use error::{ClientError, SendError, UploadError};
pub use events::{ConnectionState, SessionNotice};
pub use realtime::WsNotifier;
pub use scroll::{ScrollAction, ScrollState, Viewport};
pub use seams::{RealtimeEvent, SessionDeps, Subscription};
pub use session::{ChatSession, SessionHandle, SessionSnapshot};
pub use timeline::{DeliveryStatus, EntryId, Timeline, TimelineEntry};
pub use uploader::{AttachmentUploader, FileUpload, UploadedFile};

use tracing_subscriber::{fmt, EnvFilter};

/// Install a `tracing` subscriber for applications embedding the client.
/// `RUST_LOG` wins over the built-in filter.  Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chatpsi_client=debug,chatpsi_media=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

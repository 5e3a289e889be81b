//! WhatsApp Cloud API plumbing.
//!
//! - **Payload** (`payload`) - webhook envelope model and sub-event splitting
//! - **Signature** (`signature`) - `X-Hub-Signature-256` verification
//! - **Interactive** (`interactive`) - outbound message JSON rendering
//! - **Transport** (`transport`) - `MessageTransport` trait and the Graph API client
//!
//! ```text
//! POST /webhook → signature::verify → payload::parse → split → SubEvent[]
//!                                                         ↓
//! MessageTransport::send_* ← interactive::render ← orchestrator reply
//! ```

pub mod interactive;
pub mod payload;
pub mod signature;
pub mod transport;

pub use payload::{InboundMessage, PayloadError, StatusReport, SubEvent, WebhookPayload};
pub use signature::{SignatureError, SIGNATURE_HEADER};
pub use transport::{
    CloudApiTransport, MediaKind, MessageTransport, OutboundMedia, RecordingTransport, SentMessage,
    TransportError,
};

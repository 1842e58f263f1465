//! Webhook handling for GitHub events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA1, HMAC-SHA256)
//! - Typed parsing of the `ping`, `status` and `push` events
//! - Routing of parsed events to the build they start

pub mod events;
pub mod parser;
pub mod route;
pub mod signature;

pub use events::{GitHubEvent, PushEvent, PushTarget, Repository, StatusEvent, StatusState};
pub use parser::{ParseError, parse_webhook};
pub use route::{BUMP_VERSION_MARKER, build_for_event};
pub use signature::{
    HEADER_SIGNATURE_SHA1, HEADER_SIGNATURE_SHA256, SignatureAlgorithm, compute_signature,
    format_signature_header, parse_signature_header, verify_delivery, verify_signature,
};

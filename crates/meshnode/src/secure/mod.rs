//! Authentication and integrity checks for peer payloads.

mod access_log;
mod verifier;

pub use access_log::{AccessLog, RequestMeta};
pub use verifier::{ChecksumMode, Verifier, generate_checksum};

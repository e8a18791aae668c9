//! Chat-history compression for Google AI Studio.
//!
//! The crate observes the host's RPC traffic, captures the conversation sent
//! alongside a compression prompt, distills the model's answer into a
//! summary plus a bounded tail of recent turns, and splices that shorter
//! history into a freshly branched thread by serving and rewriting the
//! requests that load it. Browser-side pieces (the page, its request
//! interfaces, the settings surface) are traits implemented by the embedder.

pub mod compressor;
pub mod error;

pub use compressor::{Compressor, Pipeline};
pub use error::{CompressorError, ErrorCode};

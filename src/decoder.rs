//! Message text decoding seam
//!
//! Free-text ACARS payloads can often be decoded into structured fields
//! (position reports, OOOI events, ...). Decoding is delegated to an external
//! library behind [`TextDecoder`]; the aircraft only ever stores what the
//! decoder returns and never lets a decoding error escape.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::message::CanonicalMessage;

/// One decoded field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedItem {
    pub label: String,
    pub value: String,
}

/// Structured result of decoding a message text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedText {
    /// Name of the decoder that produced this result
    pub decoder: String,
    pub description: String,
    pub items: Vec<DecodedItem>,
}

/// Decodes message text into structured fields.
///
/// Returns `Ok(None)` when the message is not something the decoder
/// understands.
pub trait TextDecoder: Send + Sync {
    fn decode(&self, message: &CanonicalMessage) -> Result<Option<DecodedText>>;
}

/// Decoder used when no decoding library is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDecoder;

impl TextDecoder for NoopDecoder {
    fn decode(&self, _message: &CanonicalMessage) -> Result<Option<DecodedText>> {
        Ok(None)
    }
}

//! Encoder lifecycle and similarity thresholds.
//!
//! The encoder is an explicit resource: create one [`EncoderHandle`] per
//! process and pass it into build and match calls.

mod encoder;

pub use encoder::{DEFAULT_LOAD_TIMEOUT, EncoderConfig, EncoderHandle};

/// Similarity threshold recommendations for multilingual sentence encoders
pub mod thresholds {
    /// Same text up to punctuation or spacing noise
    pub const NEAR_EXACT: f32 = 0.99;

    /// Same meaning, light rewording
    pub const PARAPHRASE: f32 = 0.90;

    /// Related phrasing; review before shipping
    pub const SIMILAR: f32 = 0.80;

    /// Default acceptance threshold for transfer
    pub const DEFAULT: f32 = NEAR_EXACT;
}

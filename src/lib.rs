//! Semantic translation transfer.
//!
//! Builds a dictionary of previously translated strings from reference
//! tables and reuses those translations for new source text by embedding
//! similarity. Placeholder codes (`{ItemID}`, `%s`, `<b>`) are stripped before
//! embedding and put back into the reused translation.
//!
//! The usual flow: load [`Settings`], read reference files with
//! [`io::load_references`], publish a generation through
//! [`DictionaryStore::rebuild`], then create a [`Matcher`] over the active
//! generation and call [`Matcher::match_batch`].

pub mod batch;
pub mod config;
pub mod dictionary;
pub mod display;
pub mod error;
pub mod io;
pub mod matching;
pub mod normalize;
pub mod semantic;
pub mod storage;
pub mod vector;

// Explicit exports for better API clarity
pub use batch::{CancellationFlag, NoProgress, ProgressSink, Stage};
pub use config::Settings;
pub use dictionary::{
    BuildOptions, BuildReport, ConflictPolicy, Dictionary, DictionaryBuilder, DictionaryEntry,
    Granularity, SourceFileId,
};
pub use error::{TransferError, TransferResult};
pub use io::{ReferenceSource, Table};
pub use matching::{MatchMode, MatchOptions, MatchResult, MatchStatus, Matcher, UnmatchedPolicy};
pub use normalize::{CodeMap, Normalized, denormalize, normalize};
pub use semantic::{EncoderConfig, EncoderHandle};
pub use storage::DictionaryStore;
pub use vector::{EmbeddingGenerator, HashEmbeddingGenerator};

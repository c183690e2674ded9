//! Persistence of dictionary generations.

pub mod artifact;
pub mod metadata;
pub mod store;

pub use artifact::{load_artifact, save_artifact};
pub use metadata::ArtifactMetadata;
pub use store::{DictionaryStore, RebuildOutcome, generation_name};

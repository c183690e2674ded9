//! Configuration module for the translation transfer engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.transmem/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TRANSMEM_` and use double
//! underscores to separate nested levels:
//! - `TRANSMEM_MATCHING__THRESHOLD=0.95` sets `matching.threshold`
//! - `TRANSMEM_ENCODER__MODEL=hash` sets `encoder.model`
//! - `TRANSMEM_BUILD__KEEP_GENERATIONS=3` sets `build.keep_generations`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dictionary::{BuildOptions, ConflictPolicy};
use crate::error::{TransferError, TransferResult};
use crate::matching::{MatchMode, MatchOptions, UnmatchedPolicy};
use crate::semantic::EncoderConfig;
use crate::vector::{DEFAULT_FLAT_THRESHOLD, DEFAULT_N_PROBE, IndexParams, parse_embedding_model};

/// Directory holding settings and, by default, the dictionary.
pub const CONFIG_DIR: &str = ".transmem";

const ENV_PREFIX: &str = "TRANSMEM_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Root directory of the dictionary store
    #[serde(default = "default_dictionary_path")]
    pub dictionary_path: PathBuf,

    /// Workspace root directory (where .transmem is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    #[serde(default)]
    pub encoder: EncoderSettings,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub build: BuildConfig,

    /// Column mapping for reference and input tables
    #[serde(default)]
    pub columns: ColumnsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EncoderSettings {
    /// Embedding model name, or "hash" for the offline encoder
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Model download directory (defaults to the user cache dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Upper bound on model initialization, in seconds
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,

    /// Show a progress bar while downloading model files
    #[serde(default = "default_true")]
    pub show_download_progress: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MatchingConfig {
    /// Minimum similarity for accepting a match (0.0 to 1.0)
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default)]
    pub mode: MatchMode,

    /// What to write for rows without an accepted match
    #[serde(default)]
    pub unmatched: UnmatchedPolicy,

    /// Rows per encoder call
    #[serde(default = "default_match_chunk_size")]
    pub chunk_size: usize,

    /// Candidates retrieved per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Reshape whole-mode translations to the input's line count
    #[serde(default = "default_false")]
    pub adapt_newlines: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BuildConfig {
    /// Which file wins when reference files disagree
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Texts per encoder call
    #[serde(default = "default_build_chunk_size")]
    pub chunk_size: usize,

    /// Published generations kept on disk, the active one included
    #[serde(default = "default_keep_generations")]
    pub keep_generations: usize,

    /// Partitions smaller than this are searched exhaustively
    #[serde(default = "default_flat_threshold")]
    pub flat_threshold: usize,

    /// IVF clusters probed per query
    #[serde(default = "default_n_probe")]
    pub n_probe: usize,

    /// Number of parallel threads for normalization and matching
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,
}

/// Source/target/id column names for one sheet.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source: String,
    pub target: String,
    /// Optional identifier column carried through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            source: "source".to_string(),
            target: "target".to_string(),
            id: None,
        }
    }
}

/// Per-sheet overrides for one file.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
pub struct FileColumns {
    #[serde(default)]
    pub sheets: BTreeMap<String, ColumnMapping>,
}

/// `{file name -> {sheet -> mapping}}` with a fallback.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
pub struct ColumnsConfig {
    #[serde(default)]
    pub default: ColumnMapping,

    #[serde(default)]
    pub files: BTreeMap<String, FileColumns>,
}

impl ColumnsConfig {
    /// Sheet name used for delimited text files.
    pub const DEFAULT_SHEET: &'static str = "default";

    /// Mapping for `sheet` of the file named `file_name`.
    #[must_use]
    pub fn resolve(&self, file_name: &str, sheet: &str) -> &ColumnMapping {
        self.files
            .get(file_name)
            .and_then(|file| file.sheets.get(sheet))
            .unwrap_or(&self.default)
    }

    fn mappings(&self) -> impl Iterator<Item = (String, &ColumnMapping)> {
        std::iter::once(("columns.default".to_string(), &self.default)).chain(
            self.files.iter().flat_map(|(file, columns)| {
                columns
                    .sheets
                    .iter()
                    .map(move |(sheet, mapping)| (format!("columns.files.{file}.{sheet}"), mapping))
            }),
        )
    }
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_dictionary_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("dictionary")
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_embedding_model() -> String {
    crate::vector::DEFAULT_MODEL_NAME.to_string()
}
fn default_load_timeout_secs() -> u64 {
    300
}
fn default_threshold() -> f32 {
    crate::semantic::thresholds::DEFAULT
}
fn default_match_chunk_size() -> usize {
    64
}
fn default_top_k() -> usize {
    1
}
fn default_build_chunk_size() -> usize {
    256
}
fn default_keep_generations() -> usize {
    2
}
fn default_flat_threshold() -> usize {
    DEFAULT_FLAT_THRESHOLD
}
fn default_n_probe() -> usize {
    DEFAULT_N_PROBE
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            dictionary_path: default_dictionary_path(),
            workspace_root: None,
            debug: false,
            encoder: EncoderSettings::default(),
            matching: MatchingConfig::default(),
            build: BuildConfig::default(),
            columns: ColumnsConfig::default(),
        }
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            cache_dir: None,
            load_timeout_secs: default_load_timeout_secs(),
            show_download_progress: true,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            mode: MatchMode::default(),
            unmatched: UnmatchedPolicy::default(),
            chunk_size: default_match_chunk_size(),
            top_k: default_top_k(),
            adapt_newlines: false,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            chunk_size: default_build_chunk_size(),
            keep_generations: default_keep_generations(),
            flat_threshold: default_flat_threshold(),
            n_probe: default_n_probe(),
            parallel_threads: default_parallel_threads(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    ///
    /// The settings file is found by walking up from the current directory.
    pub fn load() -> TransferResult<Self> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        let mut settings = Self::figment(&config_path).extract::<Settings>().map_err(|e| {
            TransferError::ConfigError {
                reason: e.to_string(),
            }
        })?;

        if settings.workspace_root.is_none() {
            settings.workspace_root = Self::workspace_root();
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> TransferResult<Self> {
        let settings = Self::figment(path.as_ref())
            .extract::<Settings>()
            .map_err(|e| TransferError::ConfigError {
                reason: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels; single underscore
            // remains as is within field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the settings file by looking for a .transmem directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .transmem is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Dictionary path, resolved against the workspace root when relative
    #[must_use]
    pub fn resolved_dictionary_path(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) if self.dictionary_path.is_relative() => root.join(&self.dictionary_path),
            _ => self.dictionary_path.clone(),
        }
    }

    /// Check value ranges and column mappings
    pub fn validate(&self) -> TransferResult<()> {
        let invalid = |reason: String| Err(TransferError::ConfigError { reason });

        if !(0.0..=1.0).contains(&self.matching.threshold) {
            return invalid(format!(
                "matching.threshold must be between 0 and 1, got {}",
                self.matching.threshold
            ));
        }
        if self.matching.chunk_size == 0 || self.build.chunk_size == 0 {
            return invalid("chunk_size must be at least 1".to_string());
        }
        if self.matching.top_k == 0 {
            return invalid("matching.top_k must be at least 1".to_string());
        }
        if self.build.keep_generations == 0 {
            return invalid("build.keep_generations must be at least 1".to_string());
        }
        if self.build.n_probe == 0 {
            return invalid("build.n_probe must be at least 1".to_string());
        }
        if self.encoder.load_timeout_secs == 0 {
            return invalid("encoder.load_timeout_secs must be at least 1".to_string());
        }
        if let Err(e) = parse_embedding_model(&self.encoder.model) {
            return invalid(format!("encoder.model: {e}"));
        }

        for (key, mapping) in self.columns.mappings() {
            if mapping.source.trim().is_empty() || mapping.target.trim().is_empty() {
                return invalid(format!("{key}: column names must not be empty"));
            }
            if mapping.source == mapping.target {
                return invalid(format!(
                    "{key}: source and target both use column '{}'",
                    mapping.source
                ));
            }
            if mapping.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
                return invalid(format!("{key}: id column name must not be empty"));
            }
        }

        Ok(())
    }

    /// Encoder construction parameters
    #[must_use]
    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            model: self.encoder.model.clone(),
            cache_dir: self.encoder.cache_dir.clone(),
            load_timeout: Duration::from_secs(self.encoder.load_timeout_secs),
            show_download_progress: self.encoder.show_download_progress,
        }
    }

    /// Match options from the `[matching]` section
    #[must_use]
    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            threshold: self.matching.threshold,
            mode: self.matching.mode,
            unmatched: self.matching.unmatched,
            top_k: self.matching.top_k,
            chunk_size: self.matching.chunk_size,
            adapt_newlines: self.matching.adapt_newlines,
        }
    }

    /// Build options from the `[build]` section
    #[must_use]
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            conflict_policy: self.build.conflict_policy,
            chunk_size: self.build.chunk_size,
            index: IndexParams {
                flat_threshold: self.build.flat_threshold,
                n_probe: self.build.n_probe,
                ..IndexParams::default()
            },
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        Self::init_config_file_in(Path::new("."), force)
    }

    /// Create the settings file under `root/.transmem/`
    pub fn init_config_file_in(
        root: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.join(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# transmem configuration

# Version of the configuration schema
version = 1

# Dictionary store (relative to the workspace root)
dictionary_path = ".transmem/dictionary"

# Global debug mode
debug = false

[encoder]
# Multilingual sentence encoder. Accepted: ParaphraseMLMiniLML12V2,
# MultilingualE5Small, MultilingualE5Base, AllMiniLML6V2, hash
model = "{model}"

# Fail instead of hanging if the model does not load in time
load_timeout_secs = {timeout}

show_download_progress = true

[matching]
# Minimum similarity for a reused translation (0.0 to 1.0)
threshold = {threshold}

# "whole" matches entire cells, "split" matches line by line
mode = "whole"

# "blank" leaves unmatched cells empty, "keep_original" copies the source
unmatched = "blank"

chunk_size = {match_chunk}
top_k = 1

# Join or pad whole-cell translations to the input's line count
adapt_newlines = false

[build]
# "last_file_wins" or "first_file_wins" when reference files disagree
conflict_policy = "last_file_wins"

chunk_size = {build_chunk}

# Generations kept on disk, the active one included
keep_generations = 2

# Exact search below this many entries, IVF above
flat_threshold = {flat}
n_probe = {probe}

# parallel_threads = {threads}

[columns.default]
source = "source"
target = "target"
# id = "id"

# Per-file, per-sheet overrides. Delimited text files have one sheet
# called "default".
# [columns.files."ui_strings.tsv".sheets.default]
# source = "ko"
# target = "en"
"#,
            model = default_embedding_model(),
            timeout = default_load_timeout_secs(),
            threshold = default_threshold(),
            match_chunk = default_match_chunk_size(),
            build_chunk = default_build_chunk_size(),
            flat = default_flat_threshold(),
            probe = default_n_probe(),
            threads = num_cpus::get(),
        );

        std::fs::write(&config_path, template)?;

        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(
            settings.dictionary_path,
            PathBuf::from(".transmem/dictionary")
        );
        assert!((settings.matching.threshold - 0.99).abs() < f32::EPSILON);
        assert_eq!(settings.matching.mode, MatchMode::Whole);
        assert_eq!(settings.build.conflict_policy, ConflictPolicy::LastFileWins);
        assert!(settings.build.parallel_threads > 0);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[encoder]
model = "hash"

[matching]
threshold = 0.9
mode = "split"
unmatched = "keep_original"

[build]
conflict_policy = "first_file_wins"

[columns.default]
source = "ko"
target = "en"

[columns.files."ui.tsv".sheets.default]
source = "kr"
target = "fr"
id = "key"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.encoder.model, "hash");
        assert_eq!(settings.matching.mode, MatchMode::Split);
        assert_eq!(settings.matching.unmatched, UnmatchedPolicy::KeepOriginal);
        assert_eq!(settings.build.conflict_policy, ConflictPolicy::FirstFileWins);

        let ui = settings.columns.resolve("ui.tsv", ColumnsConfig::DEFAULT_SHEET);
        assert_eq!(ui.source, "kr");
        assert_eq!(ui.id.as_deref(), Some("key"));
        let other = settings.columns.resolve("other.tsv", ColumnsConfig::DEFAULT_SHEET);
        assert_eq!(other.source, "ko");
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[matching]\nchunk_size = 8\n").unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.matching.chunk_size, 8);
        assert_eq!(settings.matching.top_k, 1);
        assert_eq!(settings.build.keep_generations, 2);
        assert_eq!(settings.columns.default, ColumnMapping::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[build]\nn_probe = 4\n").unwrap();

        unsafe {
            std::env::set_var("TRANSMEM_BUILD__N_PROBE", "12");
        }
        let settings = Settings::load_from(&config_path);
        unsafe {
            std::env::remove_var("TRANSMEM_BUILD__N_PROBE");
        }

        assert_eq!(settings.unwrap().build.n_probe, 12);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.matching.threshold = 1.5;
        assert!(matches!(
            settings.validate(),
            Err(TransferError::ConfigError { .. })
        ));

        let mut settings = Settings::default();
        settings.columns.default.target = "source".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.matching.top_k = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.encoder.model = "NotAModel".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_file_fails_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[matching]\nthreshold = -0.2\n").unwrap();
        assert!(Settings::load_from(&config_path).is_err());
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.matching.top_k = 3;
        settings.columns.files.insert(
            "menu.tsv".to_string(),
            FileColumns {
                sheets: BTreeMap::from([(
                    "default".to_string(),
                    ColumnMapping {
                        source: "a".to_string(),
                        target: "b".to_string(),
                        id: None,
                    },
                )]),
            },
        );

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.matching.top_k, 3);
        assert_eq!(loaded.columns.resolve("menu.tsv", "default").source, "a");
    }

    #[test]
    fn test_init_template_parses() {
        let temp_dir = TempDir::new().unwrap();
        let path = Settings::init_config_file_in(temp_dir.path(), false).unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.matching.mode, MatchMode::Whole);

        assert!(Settings::init_config_file_in(temp_dir.path(), false).is_err());
        assert!(Settings::init_config_file_in(temp_dir.path(), true).is_ok());
    }

    #[test]
    fn test_resolved_dictionary_path() {
        let mut settings = Settings::default();
        settings.workspace_root = Some(PathBuf::from("/work"));
        assert_eq!(
            settings.resolved_dictionary_path(),
            PathBuf::from("/work/.transmem/dictionary")
        );
        settings.dictionary_path = PathBuf::from("/abs/dict");
        assert_eq!(settings.resolved_dictionary_path(), PathBuf::from("/abs/dict"));
    }
}

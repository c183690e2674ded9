//! Terminal presentation for the CLI.
//!
//! Styled tables, progress bars and help text. Nothing in the library core
//! depends on this module; it only renders what the core returns.

pub mod help;
pub mod progress;
pub mod tables;
pub mod theme;

pub use help::{create_help_text, format_help_section};
pub use progress::{BarProgress, create_progress_bar, create_spinner, with_spinner};
pub use tables::{
    TableBuilder, create_build_table, create_conflict_table, create_info_table,
    create_newline_table, create_query_table, create_transfer_table, preview,
};
pub use theme::{THEME, Theme};

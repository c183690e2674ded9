//! Cancellation and progress plumbing shared by build and transfer.

mod cancel;
mod progress;

pub use cancel::CancellationFlag;
pub use progress::{LogProgress, NoProgress, ProgressSink, Stage};

pub mod batches;
pub mod lines;
pub mod writer;

use indicatif::ProgressBar;
use tracing::debug;

use crate::config::Settings;
use crate::error::Result;
use crate::source::LineSource;
pub use batches::{Batcher, Phase, SplitReport};
pub use writer::{FsTree, NullTree, OutputTree};

/// Pull every line from `source` through the batcher into `tree`.
pub fn split<S, T>(
    source: &mut S,
    tree: T,
    settings: &Settings,
    progress: ProgressBar,
) -> Result<SplitReport>
where
    S: LineSource,
    T: OutputTree,
{
    let mut batcher = Batcher::new(tree, settings.rows_per_batch).with_progress(progress);

    while let Some(line) = source.next_line()? {
        batcher.feed(&line)?;
        if settings.stop_at_boundary && batcher.phase() == Phase::Drained {
            debug!(line = source.line_number(), "stopping at boundary");
            break;
        }
    }

    batcher.finish()
}

use indicatif::ProgressBar;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::lines::{self, LineKind};
use super::writer::{BatchWriter, FileKind, OutputTree, WrittenFile};
use crate::error::Result;

const MAX_RECORDED_WARNINGS: usize = 1000;
const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AwaitingStructure,
    WritingStructure,
    WritingData,
    Drained,
}

/// Problems that are reported but never stop a run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    #[error("line {line}: unexpected line in data section, passed through: {text}")]
    MalformedLine { line: usize, text: String },

    #[error("line {line}: value row before any INSERT INTO statement")]
    RowWithoutTemplate { line: usize },

    #[error("line {line}: another table starts here, the rest of the input is ignored")]
    ExtraTable { line: usize },

    #[error("input ended while {}, the dump may be incomplete", describe(*phase))]
    PrematureEndOfInput { phase: Phase },
}

fn describe(phase: Phase) -> &'static str {
    match phase {
        Phase::AwaitingStructure => "waiting for a table structure marker",
        Phase::WritingStructure => "writing the table structure",
        Phase::WritingData => "writing data",
        Phase::Drained => "draining",
    }
}

/// Totals handed back once the input is exhausted.
#[derive(Debug, Serialize)]
pub struct SplitReport {
    pub files: Vec<WrittenFile>,
    pub rows: u64,
    pub lines_read: usize,
    pub lines_skipped: u64,
    pub final_phase: Phase,
    pub warnings: Vec<Warning>,
    pub warnings_suppressed: usize,
}

impl SplitReport {
    pub fn data_files(&self) -> impl Iterator<Item = &WrittenFile> {
        self.files.iter().filter(|f| f.kind == FileKind::Data)
    }

    pub fn structure_files(&self) -> impl Iterator<Item = &WrittenFile> {
        self.files.iter().filter(|f| f.kind == FileKind::Structure)
    }
}

/// The chunking state machine.
///
/// Lines go in one at a time through [`Batcher::feed`]; the batcher classifies
/// each one and drives the [`BatchWriter`]. All run state lives here: the
/// phase, the cached insert template and the batch sequence.
pub struct Batcher<T: OutputTree> {
    writer: BatchWriter<T>,
    phase: Phase,
    rows_per_batch: usize,
    structure_marker: Option<Vec<u8>>,
    template: Option<Vec<u8>>,
    // Passed-through lines seen before the first batch opened.
    pending: Vec<Vec<u8>>,
    next_batch: usize,
    line_no: usize,
    rows: u64,
    skipped: u64,
    warnings: Vec<Warning>,
    warnings_suppressed: usize,
    progress: ProgressBar,
}

impl<T: OutputTree> Batcher<T> {
    pub fn new(tree: T, rows_per_batch: usize) -> Self {
        debug_assert!(rows_per_batch > 0, "rows_per_batch is validated by Settings");
        Self {
            writer: BatchWriter::new(tree),
            phase: Phase::AwaitingStructure,
            rows_per_batch,
            structure_marker: None,
            template: None,
            pending: Vec::new(),
            next_batch: 1,
            line_no: 0,
            rows: 0,
            skipped: 0,
            warnings: Vec::new(),
            warnings_suppressed: 0,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn feed(&mut self, line: &[u8]) -> Result<()> {
        self.line_no += 1;
        let kind = lines::classify(line);

        match (self.phase, kind) {
            // ── Structure section ──
            (Phase::AwaitingStructure, LineKind::Structure) => self.enter_structure(line),
            (Phase::WritingStructure, LineKind::Content) => self.write_structure(line)?,
            (Phase::WritingStructure, LineKind::Data) => self.enter_data()?,

            // ── Data section: a value spanning lines swallows blanks and comments ──
            (Phase::WritingData, LineKind::Content | LineKind::Noise)
                if self.writer.row_is_open() =>
            {
                self.writer.extend_row(line)?
            }
            (Phase::WritingData, LineKind::Content) => self.write_data(line)?,

            // ── End of data ──
            (Phase::WritingData, LineKind::Boundary) => self.drain()?,
            (Phase::WritingData, LineKind::Structure) => {
                self.warn(Warning::ExtraTable { line: self.line_no });
                self.drain()?;
            }
            _ => self.skipped += 1,
        }
        Ok(())
    }

    /// End of input: finalize whatever is open and hand back the totals.
    pub fn finish(mut self) -> Result<SplitReport> {
        match self.phase {
            Phase::AwaitingStructure | Phase::WritingStructure => {
                self.writer.close()?;
                self.warn(Warning::PrematureEndOfInput { phase: self.phase });
            }
            Phase::WritingData => {
                self.commit_batch()?;
                self.drop_pending();
            }
            Phase::Drained => {}
        }
        self.progress.finish_and_clear();

        Ok(SplitReport {
            files: self.writer.into_files(),
            rows: self.rows,
            lines_read: self.line_no,
            lines_skipped: self.skipped,
            final_phase: self.phase,
            warnings: self.warnings,
            warnings_suppressed: self.warnings_suppressed,
        })
    }

    fn enter_structure(&mut self, marker: &[u8]) {
        info!(line = self.line_no, "detected table structure");
        self.structure_marker = Some(marker.to_vec());
        self.phase = Phase::WritingStructure;
        self.progress.set_message("writing structure");
    }

    fn write_structure(&mut self, line: &[u8]) -> Result<()> {
        if !self.writer.is_open() {
            let path = self.writer.open(FileKind::Structure, 1)?;
            info!(path = %path.display(), "creating structure file");
            if let Some(marker) = &self.structure_marker {
                self.writer.write(marker)?;
            }
        }
        self.writer.write(line)
    }

    fn enter_data(&mut self) -> Result<()> {
        if let Some(done) = self.writer.close()? {
            info!(path = %done.path.display(), lines = done.lines, "finished writing structure");
        }
        info!(line = self.line_no, "detected data");
        self.phase = Phase::WritingData;
        Ok(())
    }

    fn write_data(&mut self, line: &[u8]) -> Result<()> {
        // ── Insert statement: cache the template, keep any row on the same line ──
        if lines::is_insert_start(line) {
            let (template, rest) = lines::split_insert(line);
            if self.template.as_deref() != Some(template) {
                debug!(line = self.line_no, "caching insert statement");
                self.template = Some(template.to_vec());
            }
            if let Some(row) = rest {
                self.write_row(row)?;
            }
            return Ok(());
        }

        // ── Value row ──
        if lines::is_value_tuple(line) {
            return self.write_row(line);
        }

        // ── Anything else passes through ──
        self.warn(Warning::MalformedLine {
            line: self.line_no,
            text: preview(line),
        });
        if self.writer.is_open() {
            self.writer.pass_through(line)
        } else {
            self.pending.push(line.to_vec());
            Ok(())
        }
    }

    /// A full batch stays open until the next row, so trailing lines such as
    /// `UNLOCK TABLES` land before its `COMMIT`.
    fn write_row(&mut self, row: &[u8]) -> Result<()> {
        if self.writer.is_open() {
            if self.writer.template() != self.template.as_deref() {
                debug!(line = self.line_no, "insert template changed, closing batch");
                self.commit_batch()?;
            } else if self.writer.rows() >= self.rows_per_batch {
                self.commit_batch()?;
            }
        }
        if !self.writer.is_open() {
            self.open_batch()?;
        }
        self.writer.push_row(row)?;
        self.rows += 1;
        self.progress.inc(1);
        Ok(())
    }

    fn open_batch(&mut self) -> Result<()> {
        if self.template.is_none() {
            self.warn(Warning::RowWithoutTemplate { line: self.line_no });
        }
        let path = self.writer.open_data(self.next_batch, self.template.as_deref())?;
        info!(path = %path.display(), "creating new batch file");
        self.progress.set_message(path.display().to_string());
        for line in std::mem::take(&mut self.pending) {
            self.writer.pass_through(&line)?;
        }
        Ok(())
    }

    /// Lines held for a batch that never opened.
    fn drop_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!(lines = self.pending.len(), "no rows followed, dropping held lines");
            self.skipped += self.pending.len() as u64;
            self.pending.clear();
        }
    }

    fn commit_batch(&mut self) -> Result<()> {
        if let Some(done) = self.writer.commit_and_close()? {
            info!(
                path = %done.path.display(),
                rows = done.rows,
                batch = done.seq,
                "finished batch file"
            );
            self.next_batch += 1;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.commit_batch()?;
        self.drop_pending();
        info!(line = self.line_no, "found end of data dump, ignoring the rest of the input");
        self.phase = Phase::Drained;
        self.progress.set_message("draining input");
        Ok(())
    }

    fn warn(&mut self, warning: Warning) {
        warn!("{warning}");
        if self.warnings.len() < MAX_RECORDED_WARNINGS {
            self.warnings.push(warning);
        } else {
            self.warnings_suppressed += 1;
        }
    }
}

fn preview(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

//! One acquisition run: list, select, authenticate, fetch, hand off.
//!
//! The pipeline is generic over the archive so the sequencing and failure
//! policy can be exercised without a network. Frames are handed to a
//! `FrameSink` (the rendering side) one at a time, in selection order.
//!
//! Failure policy:
//! - listing or session failures end the run before any fetch
//! - a fetch/decode failure is counted against that file and the loop continues
//! - an authentication failure during the loop drops the session and ends the run
//! - the cancel token is checked before every fetch

use crate::collections::Collection;
use crate::ingest::listing::Listing;
use crate::logging::{self, Stage};
use crate::model::{ArrayGrid, Credentials, FileRef, IngestError, SelectionWindow};
use crate::select::select_files;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// The remote side of a run.
pub trait Archive {
    type Session;

    fn list_files(&self, collection: &Collection, year: i32) -> Result<Listing, IngestError>;

    fn obtain_session(&self, probe_path: &str, credentials: &Credentials) -> Result<Self::Session, IngestError>;

    fn fetch_grid(&self, session: &Self::Session, file_ref: &FileRef, variable: &str) -> Result<ArrayGrid, IngestError>;
}

/// One decoded file ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Zero-based, sequential over the frames delivered in one run.
    pub index: usize,
    pub file_ref: FileRef,
    pub grid: ArrayGrid,
    pub date_label: String,
}

/// Everything the renderer needs to draw one frame.
///
/// Built fresh for each frame; nothing about a frame's appearance lives in
/// shared state.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    pub title: String,
    /// File name the frame should be written under, ordered for animation.
    pub output_name: String,
    pub colorbar_label: String,
    pub colorbar_format: String,
    pub size_inches: (f64, f64),
    pub dpi: u32,
}

impl RenderContext {
    pub fn for_frame(collection: &Collection, index: usize, date_label: &str) -> Self {
        Self {
            title: format!("{}\n{}", collection.title, date_label),
            output_name: format!("{}_.jpeg", index),
            colorbar_label: collection.variable.clone(),
            colorbar_format: "%.2e".to_string(),
            size_inches: (8.0, 6.0),
            dpi: 200,
        }
    }
}

/// Receives frames; implemented by the rendering side.
pub trait FrameSink {
    fn accept(&mut self, frame: Frame, context: &RenderContext) -> Result<(), Box<dyn std::error::Error>>;
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared flag an external owner sets to stop a run between fetches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Summary and state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameFailure {
    pub path: String,
    pub error: String,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub year: i32,
    pub month: u32,
    pub collection: String,
    pub raw_anchors: usize,
    pub listed: usize,
    pub malformed: usize,
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<FrameFailure>,
    /// Set when the run completed without selecting anything.
    pub zero_result_reason: Option<String>,
}

impl RunSummary {
    fn record_failure(&mut self, path: &str, err: &dyn std::fmt::Display) {
        self.failed += 1;
        self.failures.push(FrameFailure {
            path: path.to_string(),
            error: err.to_string(),
        });
    }
}

/// A run that ended on a fatal error.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("run aborted: {cause}")]
pub struct Aborted {
    pub cause: IngestError,
    /// Counters up to the point of abort.
    pub progress: RunSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Idle,
    Running,
    Completed(RunSummary),
    Aborted(Aborted),
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline<A: Archive> {
    archive: A,
    collection: Collection,
    state: RunState,
}

impl<A: Archive> Pipeline<A> {
    pub fn new(archive: A, collection: Collection) -> Self {
        Self {
            archive,
            collection,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Runs one (year, month) request to completion.
    ///
    /// Returns the summary when the run completes, even if individual files
    /// failed; returns `Aborted` on a fatal error or cancellation.
    pub fn run(
        &mut self,
        window: &SelectionWindow,
        credentials: &Credentials,
        sink: &mut dyn FrameSink,
        cancel: &CancelToken,
    ) -> Result<RunSummary, Aborted> {
        self.state = RunState::Running;
        let result = self.execute(window, credentials, sink, cancel);
        self.state = match &result {
            Ok(summary) => RunState::Completed(summary.clone()),
            Err(aborted) => {
                logging::error(Stage::Run, None, &aborted.to_string());
                RunState::Aborted(aborted.clone())
            }
        };
        result
    }

    fn execute(
        &self,
        window: &SelectionWindow,
        credentials: &Credentials,
        sink: &mut dyn FrameSink,
        cancel: &CancelToken,
    ) -> Result<RunSummary, Aborted> {
        let mut summary = RunSummary {
            year: window.year,
            month: window.month,
            collection: self.collection.id.clone(),
            ..RunSummary::default()
        };

        let listing = match self.archive.list_files(&self.collection, window.year) {
            Ok(l) => l,
            Err(cause) => return Err(Aborted { cause, progress: summary }),
        };
        summary.raw_anchors = listing.raw_anchor_count;
        summary.listed = listing.entries.len();

        if let Some(err) = listing.parse_error() {
            summary.zero_result_reason = Some(err.to_string());
            logging::log_run_summary(0, 0, 0);
            return Ok(summary);
        }

        let selection = select_files(&listing.entries, window, &self.collection);
        summary.malformed = selection.malformed;
        summary.selected = selection.file_refs.len();

        if selection.is_empty() {
            summary.zero_result_reason = Some(format!(
                "no {} files for {:04}-{:02} among {} listed",
                self.collection.id, window.year, window.month, summary.listed
            ));
            logging::log_run_summary(0, 0, 0);
            return Ok(summary);
        }

        if cancel.is_cancelled() {
            return Err(Aborted { cause: IngestError::Cancelled, progress: summary });
        }

        let probe_path = &selection.file_refs[0].archive_relative_path;
        let session = match self.archive.obtain_session(probe_path, credentials) {
            Ok(s) => s,
            Err(cause) => return Err(Aborted { cause, progress: summary }),
        };

        let mut next_index = 0usize;
        for file_ref in selection.file_refs {
            if cancel.is_cancelled() {
                logging::warn(Stage::Run, None, "cancelled between fetches");
                return Err(Aborted { cause: IngestError::Cancelled, progress: summary });
            }

            let path = file_ref.archive_relative_path.clone();
            let grid = match self.archive.fetch_grid(&session, &file_ref, &self.collection.variable) {
                Ok(g) => g,
                Err(e) if e.is_fatal() => {
                    // the session is dead; it is dropped with the early return
                    return Err(Aborted { cause: e, progress: summary });
                }
                Err(e) => {
                    logging::log_fetch_failure(&path, "fetch", &e);
                    summary.record_failure(&path, &e);
                    continue;
                }
            };

            let date_label = file_ref.date_label();
            let context = RenderContext::for_frame(&self.collection, next_index, &date_label);
            let frame = Frame {
                index: next_index,
                file_ref,
                grid,
                date_label,
            };

            match sink.accept(frame, &context) {
                Ok(()) => {
                    logging::debug(Stage::Fetch, Some(&path), &format!("frame {} delivered", next_index));
                    summary.succeeded += 1;
                    next_index += 1;
                }
                Err(e) => {
                    logging::warn(Stage::Fetch, Some(&path), &format!("renderer rejected frame: {}", e));
                    summary.record_failure(&path, &format!("render: {}", e));
                }
            }
        }

        logging::log_run_summary(summary.selected, summary.succeeded, summary.failed);
        Ok(summary)
    }
}

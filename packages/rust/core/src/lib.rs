//! Harvest orchestration for ReportHarvest.
//!
//! This crate ties the fetcher, transcoder, output store and archive together:
//! - [`gate`]: the concurrency gate bounding in-flight item pipelines
//! - [`input`]: work-list loading
//! - [`resume`]: which items still lack an output
//! - [`item`]: the per-item fetch, transcode, write pipeline
//! - [`pipeline`]: initial and retry passes, archive, progress reporting

pub mod gate;
pub mod input;
pub mod item;
pub mod pipeline;
pub mod resume;

pub use gate::{ConcurrencyGate, GatePermit};
pub use pipeline::{
    FailedItem, HarvestReport, Harvester, PassReport, ProgressReporter, RunReport,
    SilentProgress, fetch_one, harvest, pack,
};
pub use resume::ResumeSnapshot;

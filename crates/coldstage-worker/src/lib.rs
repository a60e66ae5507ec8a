//! # coldstage-worker
//!
//! Retrieval worker and housekeeping for coldstage.
//!
//! The worker claims submitted jobs from the store, stages each archive from
//! tape (or reuses an already staged copy), issues the download token, and
//! notifies the requester. Housekeeping reclaims staging space from expired
//! artifacts and reconciles token and job state.

pub mod housekeeping;
pub mod notify;
pub mod retrieval;
pub mod staging;
pub mod worker;

pub use housekeeping::{sweep, SweepStats};
pub use notify::LogNotifier;
pub use retrieval::TapeRetriever;
pub use staging::StagingArea;
pub use worker::RetrievalWorker;

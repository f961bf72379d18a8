//! Generation pipeline orchestration for kanjigen.
//!
//! This crate ties the backend, the response extractor and the job store
//! together: [`RetryController`] handles one item, [`Dispatcher`] drives all
//! pending items concurrently and commits each result as it lands.

pub mod dispatcher;
pub mod prompt;
pub mod retry;

pub use dispatcher::{
    DispatchProgress, Dispatcher, RunOptions, RunSummary, SilentProgress, validate_identity,
};
pub use prompt::PromptTemplate;
pub use retry::{AttemptOutcome, FailureKind, RetryController, RetryPolicy};

pub mod job;
pub mod loaders;
pub mod outcome;
pub mod roster;

pub use job::{AttemptRecord, Job};
pub use loaders::{discover_jobs, natural_cmp};
pub use outcome::{Classification, ExtractionOutcome, FailureKind, TokenUsage};
pub use roster::ModelRoster;

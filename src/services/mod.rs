pub mod completion_client;
pub mod rate_gate;
pub mod result_store;
pub mod retry_policy;
pub mod summary_reporter;

pub use completion_client::CompletionClient;
pub use rate_gate::RateGate;
pub use result_store::{PersistStatus, ResultStore, TerminalRecord};
pub use retry_policy::{classify, Decision, RetryPolicy};
pub use summary_reporter::{FailedItem, Summary, SummaryReporter};

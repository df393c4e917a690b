//! 流程层（Workflow Layer）
//!
//! 定义"一张图在一轮里"怎么处理，以及流程对外发出的进度事件。

pub mod events;
pub mod extract_flow;

pub use events::{CollectingObserver, ProgressEvent, ProgressObserver, TracingObserver};
pub use extract_flow::{ExtractFlow, RoundVerdict};

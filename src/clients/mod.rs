pub mod scripted;
pub mod transport;
pub mod wire;

pub use scripted::ScriptedTransport;
pub use transport::{FaultKind, HttpTransport, TransportFault, TransportReply, VisionTransport};
pub use wire::{ChatRequest, ChatResponse};

pub mod delay;
pub mod encoder;
pub mod stop_signal;

pub use delay::{Delay, RecordingDelay, TokioDelay};
pub use encoder::{encode_asset, EncodedAsset};
pub use stop_signal::{StopReason, StopSignal};

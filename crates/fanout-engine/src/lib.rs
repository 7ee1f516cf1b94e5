pub mod buffer;
pub mod decode;
pub mod device;
pub mod engine;
pub mod session;

pub use buffer::AudioBuffer;
pub use device::AudioDevice;
pub use engine::{EngineError, PlaybackEngine};
pub use session::SessionState;

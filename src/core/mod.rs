pub mod frame;
pub mod sample_buffer;

pub use frame::{DeviceInfo, Frame, FrameHeader, SampleRate};
pub use sample_buffer::{Nanos, SampleBuffer};

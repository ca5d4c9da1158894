//! Acquisition stack for a multi-channel biosignal amplifier: wire
//! protocol parsing, device lifecycle with frame fan-out, and OBF
//! recordings.

pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod recorder;
pub mod storage;

pub use config::StreamConfig;
pub use crate::core::{DeviceInfo, Frame, FrameHeader, Nanos, SampleBuffer, SampleRate};
pub use device::{Device, DeviceController, DeviceRegistry, DeviceStatus, Subscription};
pub use error::{Error, Result};
pub use protocol::{FrameError, FrameReader};
pub use recorder::{RecordError, Recorder, RecorderStats, RecorderStatus, RecordingSession};
pub use storage::{FsRepository, ObfHeader, ObfReader, ObfWriter, Repository};

pub mod avatar;
pub mod controller;
pub mod mock;
pub mod registry;
pub mod state;
pub mod traits;

pub use avatar::{AvatarDevice, Connector};
pub use controller::{DeviceController, Subscription};
pub use mock::{MockSettings, SyntheticSource};
pub use registry::DeviceRegistry;
pub use state::DeviceStatus;
pub use traits::{Control, Device};

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    #[error("device {0} is already engaged")]
    AlreadyEngaged(String),
    #[error("subscriber {0:?} already exists")]
    SubscriberExists(String),
    #[error("device info was already sent for this engagement")]
    InfoAlreadySent,
    #[error("frame sent before device info")]
    InfoNotSent,
    #[error("no device info within {0:?}")]
    InfoTimeout(Duration),
    #[error("stream loop exited before reporting device info")]
    NoDeviceInfo,
    #[error("stream loop failed: {0:#}")]
    Stream(anyhow::Error),
    #[error("device driver error: {0:#}")]
    Driver(anyhow::Error),
    #[error("unknown device kind {0:?}")]
    UnknownKind(String),
}

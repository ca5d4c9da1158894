use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::{DeviceController, DeviceError};
use crate::core::{DeviceInfo, Frame};
use crate::storage::Repository;

/// Trait implemented by concrete acquisition devices.
///
/// The controller owns the lifecycle: it calls [`engage`](Device::engage),
/// runs [`stream`](Device::stream) on a blocking worker, and calls
/// [`disengage`](Device::disengage) when the engagement ends.
#[async_trait]
pub trait Device: Send + Sync {
    /// Unique device name (e.g., "avatar-0", "mock")
    fn name(&self) -> &str;

    /// Repository recordings of this device are stored in
    fn repository(&self) -> Arc<dyn Repository>;

    /// Open the low-level connection
    async fn engage(&self) -> Result<()>;

    /// Close the low-level connection. Called once per engagement, possibly
    /// while the stream loop is still winding down.
    async fn disengage(&self) -> Result<()>;

    /// Blocking stream loop.
    ///
    /// Must call [`Control::send_info`] before the first [`Control::send`],
    /// poll [`Control::should_terminate`] every iteration and return `Ok`
    /// once it is set. Must not close the low-level connection. An error
    /// ends the engagement.
    fn stream(&self, control: Control) -> Result<()>;
}

/// Handle given to a running stream loop.
pub struct Control {
    info_tx: Option<oneshot::Sender<DeviceInfo>>,
    controller: DeviceController,
    terminate: Arc<AtomicBool>,
}

impl Control {
    pub(crate) fn new(
        info_tx: oneshot::Sender<DeviceInfo>,
        controller: DeviceController,
        terminate: Arc<AtomicBool>,
    ) -> Self {
        Self {
            info_tx: Some(info_tx),
            controller,
            terminate,
        }
    }

    /// Report stream parameters. Allowed once per engagement.
    pub fn send_info(&mut self, info: DeviceInfo) -> Result<(), DeviceError> {
        let tx = self.info_tx.take().ok_or(DeviceError::InfoAlreadySent)?;
        // A closed receiver means the engagement already gave up waiting;
        // the terminate flag is set in that case.
        let _ = tx.send(info);
        Ok(())
    }

    /// Publish a frame to every subscriber, blocking while any subscriber
    /// is full. Frames sent after termination was requested are dropped.
    pub fn send(&self, frame: Frame) -> Result<(), DeviceError> {
        if self.info_tx.is_some() {
            return Err(DeviceError::InfoNotSent);
        }
        if self.should_terminate() {
            return Ok(());
        }
        self.controller.publish(Arc::new(frame));
        Ok(())
    }

    pub fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }
}

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{Control, Device};
use crate::core::DeviceInfo;
use crate::protocol::FrameReader;
use crate::storage::Repository;

/// Opens the byte source of one engagement.
pub type Connector = Box<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

enum Link {
    Closed,
    Idle(Box<dyn Read + Send>),
    /// Taken by the stream loop of the given session.
    Streaming(u64),
}

/// Avatar EEG amplifier speaking the framed serial protocol.
pub struct AvatarDevice {
    name: String,
    repository: Arc<dyn Repository>,
    connector: Connector,
    link: Mutex<Link>,
    sessions: AtomicU64,
}

impl AvatarDevice {
    pub fn with_connector(
        name: impl Into<String>,
        repository: Arc<dyn Repository>,
        connector: Connector,
    ) -> Self {
        Self {
            name: name.into(),
            repository,
            connector,
            link: Mutex::new(Link::Closed),
            sessions: AtomicU64::new(0),
        }
    }

    /// Device attached to the serial port at `path`.
    #[cfg(feature = "serial")]
    pub fn serial(
        name: impl Into<String>,
        repository: Arc<dyn Repository>,
        path: impl Into<String>,
        baud_rate: u32,
    ) -> Self {
        let path = path.into();
        Self::with_connector(
            name,
            repository,
            Box::new(move || {
                let port = serialport::new(&path, baud_rate)
                    .timeout(std::time::Duration::from_secs(2))
                    .open()
                    .map_err(io::Error::from)?;
                Ok(Box::new(port) as Box<dyn Read + Send>)
            }),
        )
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Device for AvatarDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn repository(&self) -> Arc<dyn Repository> {
        self.repository.clone()
    }

    async fn engage(&self) -> Result<()> {
        let source = (self.connector)()
            .with_context(|| format!("failed to open byte source for {}", self.name))?;
        *self.link() = Link::Idle(source);
        Ok(())
    }

    async fn disengage(&self) -> Result<()> {
        // A streaming source is dropped by the stream loop once it sees the
        // closed link.
        *self.link() = Link::Closed;
        Ok(())
    }

    fn stream(&self, mut control: Control) -> Result<()> {
        let session = self.sessions.fetch_add(1, Ordering::Relaxed);
        let source = {
            let mut link = self.link();
            match std::mem::replace(&mut *link, Link::Streaming(session)) {
                Link::Idle(source) => source,
                Link::Closed => {
                    *link = Link::Closed;
                    return Err(anyhow!("{} is not connected", self.name));
                }
                Link::Streaming(other) => {
                    *link = Link::Streaming(other);
                    return Err(anyhow!("{} is already streaming", self.name));
                }
            }
        };

        let mut reader = FrameReader::new(source);
        let mut info: Option<DeviceInfo> = None;
        let result = loop {
            if control.should_terminate() {
                break Ok(());
            }

            let frame = match reader.read_frame() {
                Ok(frame) => frame,
                // The port's read timeout only bounds how long we go
                // without checking for termination.
                Err(err) if err.is_timeout() => continue,
                Err(err) if err.is_recoverable() => {
                    warn!(device = %self.name, error = %err, "dropping frame");
                    continue;
                }
                Err(err) if control.should_terminate() => {
                    debug!(device = %self.name, error = %err, "read failed during shutdown");
                    break Ok(());
                }
                Err(err) => break Err(anyhow::Error::new(err).context("device stream read failed")),
            };

            let frame_info = frame.device_info();
            match info {
                None => {
                    control.send_info(frame_info)?;
                    info = Some(frame_info);
                    info!(
                        device = %self.name,
                        channels = frame_info.channels,
                        sample_rate = frame_info.sample_rate,
                        "stream parameters discovered"
                    );
                }
                Some(expected) if expected != frame_info => {
                    warn!(
                        device = %self.name,
                        expected = ?expected,
                        got = ?frame_info,
                        "stream parameters changed mid-engagement, dropping frame"
                    );
                    continue;
                }
                Some(_) => {}
            }
            control.send(frame)?;
        };

        debug!(device = %self.name, stats = ?reader.stats(), "stream loop finished");
        // Hand the source back for disengage to close, unless a newer
        // engagement owns the link by now.
        let mut link = self.link();
        if matches!(*link, Link::Streaming(current) if current == session) {
            *link = Link::Idle(reader.into_inner());
        }
        result
    }
}

//! Accumulates a device's frames in memory and commits them to the
//! repository as a combined-mode OBF file.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{Frame, Nanos};
use crate::device::{DeviceController, DeviceError};
use crate::storage::{
    encode_parallel, relative_millis, Endianness, ObfError, ObfHeader, ObfReader, ObfWriter,
    Repository, RepositoryError, StorageMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecorderStatus {
    #[default]
    Idle,
    Recording,
    Committing,
    Done,
    RolledBack,
    /// A frame could not be added; the recording cannot be committed.
    Failed,
}

#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    #[error("recorder is {0:?}, not recording")]
    NotRecording(RecorderStatus),
    #[error("nothing was recorded")]
    Empty,
    #[error("frame has {actual} channels, recording has {expected}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("frame sample rate {actual} Hz differs from recording rate {expected} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },
    #[error("{0} channels do not fit an OBF header")]
    TooManyChannels(usize),
    #[error("recording exceeds {} samples", u32::MAX)]
    TooManySamples,
    #[error("failed to write {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Obf(#[from] ObfError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("recorder task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecorderStats {
    pub status: RecorderStatus,
    pub frames: u64,
    pub samples: u64,
    pub first_timestamp: Option<Nanos>,
    pub last_timestamp: Option<Nanos>,
}

#[derive(Default)]
struct State {
    status: RecorderStatus,
    frames: u64,
    samples: u64,
    /// Timestamp of the first recorded sample; stored timestamps are
    /// relative to it.
    origin: Option<Nanos>,
    last: Option<Nanos>,
    channels: usize,
    sample_rate: u32,
    /// Parallel-encoded payload.
    data: Vec<u8>,
}

impl State {
    fn append(&mut self, frame: &Frame) -> Result<(), RecordError> {
        let buffer = &frame.buffer;
        let Some(first) = buffer.first_timestamp() else {
            return Ok(());
        };
        let channels = buffer.channels();
        let sample_rate = frame.header.sample_rate.hz();

        let origin = match self.origin {
            None => {
                if channels > u8::MAX as usize {
                    return Err(RecordError::TooManyChannels(channels));
                }
                self.channels = channels;
                self.sample_rate = sample_rate;
                first
            }
            Some(origin) => {
                if channels != self.channels {
                    return Err(RecordError::ChannelMismatch {
                        expected: self.channels,
                        actual: channels,
                    });
                }
                if sample_rate != self.sample_rate {
                    return Err(RecordError::SampleRateMismatch {
                        expected: self.sample_rate,
                        actual: sample_rate,
                    });
                }
                origin
            }
        };

        let samples = self.samples + buffer.len() as u64;
        if samples > u32::MAX as u64 {
            return Err(RecordError::TooManySamples);
        }
        self.data
            .extend(encode_parallel(buffer, Endianness::Big, relative_millis(origin)));
        self.origin = Some(origin);
        self.samples = samples;
        self.frames += 1;
        self.last = buffer.last_timestamp();
        Ok(())
    }

    fn header(&self) -> ObfHeader {
        ObfHeader::new(
            self.channels as u8,
            self.samples as u32,
            self.sample_rate as u16,
            StorageMode::Combined,
        )
    }
}

/// Frame accumulator committing to a [`Repository`].
///
/// Lifecycle: `Idle -> Recording -> Committing -> Done | RolledBack`.
pub struct Recorder {
    repository: Arc<dyn Repository>,
    state: Mutex<State>,
    open_file: OpenFile,
}

impl Recorder {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            state: Mutex::new(State::default()),
            open_file: create_new,
        }
    }

    /// Discard anything accumulated and start a new recording.
    pub fn init(&self) {
        let mut state = self.state();
        *state = State {
            status: RecorderStatus::Recording,
            ..State::default()
        };
    }

    /// Append a frame's samples. The first frame fixes the time origin,
    /// channel count and sample rate; a frame that disagrees with them fails
    /// the recording.
    pub fn record_frame(&self, frame: &Frame) -> Result<(), RecordError> {
        let mut state = self.state();
        if state.status != RecorderStatus::Recording {
            return Err(RecordError::NotRecording(state.status));
        }
        let result = state.append(frame);
        if let Err(err) = &result {
            warn!(error = %err, "recording failed");
            state.status = RecorderStatus::Failed;
        }
        result
    }

    pub fn stats(&self) -> RecorderStats {
        let state = self.state();
        RecorderStats {
            status: state.status,
            frames: state.frames,
            samples: state.samples,
            first_timestamp: state.origin,
            last_timestamp: state.last,
        }
    }

    /// Write the recording to a new repository resource and return its id.
    ///
    /// The file holds the parallel section followed by a sequential copy
    /// decoded back from it. A write failure removes the partial file.
    pub fn stop(&self) -> Result<Uuid, RecordError> {
        let (header, data) = {
            let mut state = self.state();
            if state.status != RecorderStatus::Recording {
                return Err(RecordError::NotRecording(state.status));
            }
            if state.frames == 0 {
                state.status = RecorderStatus::RolledBack;
                return Err(RecordError::Empty);
            }
            state.status = RecorderStatus::Committing;
            (state.header(), std::mem::take(&mut state.data))
        };

        let result = self
            .repository
            .new_resource_id()
            .map_err(RecordError::from)
            .and_then(|(id, path)| commit(self.open_file, &path, header, &data).map(|()| (id, path)));

        let mut state = self.state();
        match result {
            Ok((id, path)) => {
                state.status = RecorderStatus::Done;
                info!(
                    resource = %id,
                    path = ?path,
                    frames = state.frames,
                    samples = state.samples,
                    "recording committed"
                );
                Ok(id)
            }
            Err(err) => {
                state.status = RecorderStatus::RolledBack;
                warn!(error = %err, "recording rolled back");
                Err(err)
            }
        }
    }

    /// Subscribe to `controller` and record every frame it publishes until
    /// [`RecordingSession::stop`].
    pub fn start(self: &Arc<Self>, controller: &DeviceController) -> Result<RecordingSession, RecordError> {
        self.init();
        let subscriber = format!("recorder-{}", Uuid::new_v4());
        let subscription = controller.subscribe(&subscriber)?;

        let recorder = Arc::clone(self);
        let drain = tokio::task::spawn_blocking(move || {
            for frame in subscription.iter() {
                if recorder.record_frame(&frame).is_err() {
                    // Dropping the subscription lets the publisher skip us.
                    break;
                }
            }
            debug!(subscriber = subscription.name(), "recording drain finished");
        });

        info!(device = %controller.name(), subscriber = %subscriber, "recording started");
        Ok(RecordingSession {
            recorder: Arc::clone(self),
            controller: controller.clone(),
            subscriber,
            drain,
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// File operations a commit needs besides reading, writing and seeking.
trait CommitFile: Read + Write + Seek {
    fn set_len(&self, len: u64) -> io::Result<()>;
    fn sync_all(&self) -> io::Result<()>;
}

impl CommitFile for File {
    fn set_len(&self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_all(&self) -> io::Result<()> {
        File::sync_all(self)
    }
}

impl<F: CommitFile + ?Sized> CommitFile for Box<F> {
    fn set_len(&self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }

    fn sync_all(&self) -> io::Result<()> {
        (**self).sync_all()
    }
}

type OpenFile = fn(&Path) -> io::Result<Box<dyn CommitFile>>;

/// Create the resource file; an existing file is never overwritten.
fn create_new(path: &Path) -> io::Result<Box<dyn CommitFile>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)?;
    Ok(Box::new(file))
}

fn commit(
    open: OpenFile,
    path: &Path,
    header: ObfHeader,
    data: &[u8],
) -> Result<(), RecordError> {
    let file = open(path).map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_sections(file, path, header, data).map_err(|err| {
        rollback(path);
        err
    })
}

fn write_sections<F: CommitFile>(
    file: F,
    path: &Path,
    header: ObfHeader,
    data: &[u8],
) -> Result<(), RecordError> {
    let io_err = |source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    };
    // Full length up front so the file validates while the sequential
    // section is still missing.
    file.set_len(header.len() as u64 + header.payload_len())
        .map_err(io_err)?;

    let mut writer = ObfWriter::new(file, header);
    writer.write_header()?;
    writer.write_raw_parallel(data)?;

    let mut reader = ObfReader::open(writer.into_inner())?;
    let buffer = reader.read_parallel()?;
    let mut writer = ObfWriter::new(reader.into_inner(), header);
    // Timestamps read back are already relative.
    writer.write_sequential(&buffer, relative_millis(0))?;
    writer.flush()?;
    writer.into_inner().sync_all().map_err(io_err)
}

fn rollback(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = ?path, "removed partial recording"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = ?path, error = %err, "failed to remove partial recording"),
    }
}

/// A recording fed by a controller subscription.
pub struct RecordingSession {
    recorder: Arc<Recorder>,
    controller: DeviceController,
    subscriber: String,
    drain: JoinHandle<()>,
}

impl RecordingSession {
    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    pub fn stats(&self) -> RecorderStats {
        self.recorder.stats()
    }

    /// Unsubscribe, wait for queued frames to be recorded, then commit.
    pub async fn stop(self) -> Result<Uuid, RecordError> {
        self.controller.unsubscribe(&self.subscriber);
        self.drain.await?;
        let recorder = self.recorder;
        tokio::task::spawn_blocking(move || recorder.stop()).await?
    }
}

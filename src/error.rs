use crate::device::DeviceError;
use crate::protocol::FrameError;
use crate::recorder::RecordError;
use crate::storage::{ObfError, RepositoryError};

/// Any error raised by this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Obf(#[from] ObfError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

use thiserror::Error;

use crate::scope::source::ProbeKind;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("all {capacity} capture channels are in use")]
    ChannelsExhausted { capacity: usize },
    #[error("channel {channel} out of range (source has {capacity} channels)")]
    ChannelOutOfRange { channel: usize, capacity: usize },
    #[error("channel {0} is already bound to a trace")]
    ChannelInUse(usize),
    #[error("can only set channel {0} while capture is stopped")]
    ChannelBusy(usize),
    #[error("channel {channel} has {actual} samples, expected {expected}")]
    RaggedBatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },
    /// Caller misuse: the session must be capturing before it is polled.
    #[error("must be capturing to poll")]
    PollWhileNotCapturing,
    #[error("no {kind} named {name}")]
    UnknownProbe { kind: ProbeKind, name: String },
    #[error("no such thread '{0}'")]
    NoSuchThread(String),
    #[error("no thread attached to the capture function")]
    NoThreadAttached,
    #[error("thread period must be greater than zero")]
    InvalidPeriod,
    #[error("failed to render frame: {0}")]
    Plot(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for ScopeError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        ScopeError::Plot(format!("{value:?}"))
    }
}

impl From<image::ImageError> for ScopeError {
    fn from(value: image::ImageError) -> Self {
        ScopeError::Plot(value.to_string())
    }
}

use crate::input::DeviceGuid;

/// Failures surfaced by the engine and the command channel.
///
/// Only `ChannelOpen` and `AlreadyRunning` ever reach the host as a failed
/// `start`. Everything raised inside a worker's poll/transcode/report cycle is
/// logged and counted, then dropped.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("command channel is not open")]
    ChannelUnavailable,

    #[error("failed to open command channel: {0}")]
    ChannelOpen(#[source] std::io::Error),

    #[error("bus rejected {op} request")]
    ChannelWriteFailed {
        op: &'static str,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("device {0} is no longer attached")]
    DeviceVanished(DeviceGuid),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("slot {0} does not exist")]
    SlotOutOfRange(usize),

    #[error("slot {0} has no device")]
    SlotEmpty(usize),
}

pub type Result<T> = std::result::Result<T, EngineError>;

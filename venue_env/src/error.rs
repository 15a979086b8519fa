//! Error types for the channel fabric.

use crate::types::ChannelId;
use thiserror::Error;

/// Errors that can occur while writing to or claiming a fabric channel.
///
/// See [`FabricError::is_transient`] for which writes are worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FabricError {
    /// The reply channel has not been opened
    #[error("no reader on channel {0}")]
    NoReader(ChannelId),

    /// The reply channel was removed by its owner
    #[error("channel {0} was removed")]
    Removed(ChannelId),

    /// The channel buffer is full
    #[error("channel {0} is full")]
    Full(ChannelId),

    /// The reader side was dropped
    #[error("channel {0} is closed")]
    Closed(ChannelId),

    /// A write failure injected through the fabric controller
    #[error("injected fault writing to {0}")]
    InjectedFault(ChannelId),

    /// The inbound receiver has already been claimed by a broker
    #[error("inbound channel already has a reader")]
    InboundTaken,
}

impl FabricError {
    /// Returns true if retrying the same write could succeed.
    ///
    /// A removed or closed channel never comes back, so writes to it are
    /// permanent failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FabricError::NoReader(_) | FabricError::Full(_) | FabricError::InjectedFault(_)
        )
    }
}

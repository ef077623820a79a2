use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Error, Debug)]
pub enum TsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("field out of range: {0}")]
    FieldRange(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("pid {0:#06x} is already assigned")]
    AlreadyAssigned(u16),

    #[error("pid {0:#06x} is reserved and cannot be registered")]
    ReservedPid(u16),

    #[error("stream closed")]
    Closed,

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl TsError {
    /// True for errors caused by a single malformed structure, as opposed to
    /// failures of the underlying source or sink.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TsError::Framing(_) | TsError::FieldRange(_) | TsError::ProtocolViolation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TsError>;

impl From<TsError> for std::io::Error {
    fn from(err: TsError) -> Self {
        match err {
            TsError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

enum Subscriber {
    Waiting,
    Attached(UnboundedSender<TsError>),
    Detached,
}

/// Single-consumer error channel that only buffers while a receiver is
/// attached. Errors reported before [`subscribe`](Self::subscribe) or after
/// the receiver is dropped are discarded.
pub(crate) struct ErrorChannel {
    subscriber: Mutex<Subscriber>,
}

impl ErrorChannel {
    pub(crate) fn new() -> Self {
        Self {
            subscriber: Mutex::new(Subscriber::Waiting),
        }
    }

    /// Hands out the receiver once; later calls return `None`.
    pub(crate) fn subscribe(&self) -> Option<UnboundedReceiver<TsError>> {
        let mut subscriber = self.subscriber.lock();
        if !matches!(*subscriber, Subscriber::Waiting) {
            return None;
        }
        let (tx, rx) = unbounded_channel();
        *subscriber = Subscriber::Attached(tx);
        Some(rx)
    }

    pub(crate) fn send(&self, err: TsError) {
        let mut subscriber = self.subscriber.lock();
        if let Subscriber::Attached(tx) = &*subscriber {
            if tx.send(err).is_err() {
                *subscriber = Subscriber::Detached;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_before_subscribe_are_discarded() {
        let channel = ErrorChannel::new();
        for _ in 0..1000 {
            channel.send(TsError::Closed);
        }
        let mut rx = channel.subscribe().unwrap();
        assert!(rx.try_recv().is_err());
        assert!(channel.subscribe().is_none());

        channel.send(TsError::Framing("bad sync".into()));
        assert!(matches!(rx.try_recv(), Ok(TsError::Framing(_))));
    }

    #[test]
    fn test_dropped_receiver_detaches() {
        let channel = ErrorChannel::new();
        drop(channel.subscribe().unwrap());
        channel.send(TsError::Closed);
        assert!(matches!(*channel.subscriber.lock(), Subscriber::Detached));
        assert!(channel.subscribe().is_none());
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(TsError::Framing(String::new()).is_recoverable());
        assert!(!TsError::Closed.is_recoverable());
        assert!(!TsError::Io(std::io::Error::other("sink")).is_recoverable());
    }
}

use tokio::sync::broadcast;

use crate::core::error::ErrorKind;

/// The five events an outer GUI, logger, or device-abstraction layer
/// may subscribe to. Signals run alongside (not instead of) the
/// `log` calls the exchange engine makes at the same points — see
/// `exchange.rs`.
#[derive(Debug, Clone)]
pub enum Signal {
    Error { message: String, kind: ErrorKind },
    NoResponse { message: String },
    StatusOk,
    ReadSucceeded { words: usize },
    WriteSucceeded { words: usize },
}

/// A broadcast channel per target. Every subscriber gets every
/// signal; a subscriber that falls behind the channel's capacity
/// sees `RecvError::Lagged` rather than blocking the publisher.
#[derive(Debug)]
pub struct SignalBus {
    sender: broadcast::Sender<Signal>,
}

/// Channel depth before a slow subscriber starts lagging. Generous
/// relative to how rarely signals fire (at most once per transaction
/// batch), so a subscriber only lags if it stops reading entirely.
const CHANNEL_CAPACITY: usize = 256;

impl SignalBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        SignalBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }

    /// Publishes a signal. Returns the number of live subscribers;
    /// publishing with zero subscribers is not an error, the signal
    /// is simply dropped.
    pub fn publish(&self, signal: Signal) -> usize {
        self.sender.send(signal).unwrap_or(0)
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        SignalBus::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_signal() {
        let bus = SignalBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Signal::StatusOk);
        assert!(matches!(rx.recv().await.unwrap(), Signal::StatusOk));
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = SignalBus::new();
        assert_eq!(bus.publish(Signal::StatusOk), 0);
    }
}

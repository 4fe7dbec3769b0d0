// =============================================================================
// Signal Hub: synchronous publish/subscribe for indicator signals
// =============================================================================
//
// A signal carries no payload beyond "fired now": the indicator's own fields
// hold the details. Listeners are invoked in registration order, in-line with
// the update call that triggered them. Channel listeners receive one
// `SignalFired` message per firing; a channel whose receiver has been dropped
// is unsubscribed on the next firing.

use tokio::sync::mpsc;
use tracing::debug;

/// Message delivered to channel listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalFired {
    /// Name of the indicator that fired.
    pub indicator: &'static str,
    /// Bucket start of the bar that triggered the signal.
    pub timestamp: i64,
}

enum Listener {
    Callback(Box<dyn FnMut() + Send>),
    Channel(mpsc::UnboundedSender<SignalFired>),
}

/// Ordered set of signal listeners owned by one indicator instance.
pub struct SignalHub {
    source: &'static str,
    listeners: Vec<Listener>,
    fired: u64,
}

impl SignalHub {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            listeners: Vec::new(),
            fired: 0,
        }
    }

    /// Register a callback invoked synchronously on every firing.
    pub fn subscribe(&mut self, listener: impl FnMut() + Send + 'static) {
        self.listeners.push(Listener::Callback(Box::new(listener)));
    }

    pub fn subscribe_boxed(&mut self, listener: Box<dyn FnMut() + Send>) {
        self.listeners.push(Listener::Callback(listener));
    }

    /// Register a channel listener and return its receiving end.
    pub fn subscribe_channel(&mut self) -> mpsc::UnboundedReceiver<SignalFired> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(Listener::Channel(tx));
        rx
    }

    /// Notify every listener, in registration order.
    pub fn emit(&mut self, timestamp: i64) {
        self.fired += 1;
        let event = SignalFired {
            indicator: self.source,
            timestamp,
        };
        let source = self.source;
        self.listeners.retain_mut(|listener| match listener {
            Listener::Callback(f) => {
                f();
                true
            }
            Listener::Channel(tx) => {
                let open = tx.send(event).is_ok();
                if !open {
                    debug!(indicator = source, "signal receiver dropped; unsubscribing");
                }
                open
            }
        });
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Total number of firings since construction. Not cleared by indicator
    /// resets.
    pub fn fired_count(&self) -> u64 {
        self.fired
    }
}

impl std::fmt::Debug for SignalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHub")
            .field("source", &self.source)
            .field("listeners", &self.listeners.len())
            .field("fired", &self.fired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn callbacks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hub = SignalHub::new("test");
        for id in 0..3 {
            let log = log.clone();
            hub.subscribe(move || log.lock().push(id));
        }
        hub.emit(60);
        hub.emit(120);
        assert_eq!(*log.lock(), vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(hub.fired_count(), 2);
    }

    #[test]
    fn channel_receives_one_message_per_firing() {
        let mut hub = SignalHub::new("rsi");
        let mut rx = hub.subscribe_channel();
        hub.emit(60);
        hub.emit(120);
        assert_eq!(
            rx.try_recv().unwrap(),
            SignalFired {
                indicator: "rsi",
                timestamp: 60
            }
        );
        assert_eq!(rx.try_recv().unwrap().timestamp, 120);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_channel_is_unsubscribed() {
        let mut hub = SignalHub::new("rsi");
        let rx = hub.subscribe_channel();
        hub.subscribe(|| {});
        assert_eq!(hub.listener_count(), 2);
        drop(rx);
        hub.emit(0);
        assert_eq!(hub.listener_count(), 1);
    }
}

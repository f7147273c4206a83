//! Hand-rolled reactive-stream primitives.
//!
//! Everything in this module follows the pull/push contract of
//! reactive streams: a [`Publisher`] hands a [`Subscription`] to its
//! [`Subscriber`], the subscriber paces delivery by calling
//! [`Subscription::request`], and the publisher delivers at most the
//! requested number of items followed by at most one terminal signal.
//! There is no internal threading; callbacks run on whatever thread drives
//! the surrounding transport, and the types here only defend against
//! multiple threads calling in at once.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::RpcError;

mod relay;
mod stream;
mod switch;

pub use relay::Relay;
pub use stream::{FlowStream, into_stream};
pub use switch::SwitchOnFirst;

/// The largest representable demand; requesting this much (or more, via
/// saturation) signals an effectively unbounded consumer.
pub const MAX_DEMAND: u32 = 0x7fff_ffff;

/// The producer-side handle a subscriber uses to pace and tear down a
/// stream.
pub trait Subscription: Send + Sync {
    /// Authorize `n` more deliveries. Demand is additive across calls.
    /// `n` must be positive; `request(0)` is a protocol violation and
    /// terminates the stream with [`RpcError::InvalidDemand`].
    fn request(&self, n: u32);

    /// Stop the stream. Idempotent; no signal follows a cancellation.
    fn cancel(&self);
}

/// A handler for values delivered by a publisher.
pub trait Subscriber<T>: Send + Sync {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);
    fn on_next(&self, item: T);
    fn on_error(&self, error: RpcError);
    fn on_complete(&self);
}

/// An asynchronous source of values, subscribed at most the number of times
/// its implementation documents (most here allow exactly one).
pub trait Publisher<T>: Send + Sync {
    fn subscribe(self: Arc<Self>, subscriber: Arc<dyn Subscriber<T>>);
}

/// Shared handle to a publisher; the currency of the dispatch layer.
pub type Flow<T> = Arc<dyn Publisher<T>>;

struct Inert;

impl Subscription for Inert {
    fn request(&self, _n: u32) {}
    fn cancel(&self) {}
}

/// A subscription that ignores demand and cancellation. Handed to
/// subscribers that will only ever receive a terminal signal.
pub fn inert() -> Arc<dyn Subscription> {
    Arc::new(Inert)
}

struct ErrorFlow {
    error: RpcError,
}

impl<T> Publisher<T> for ErrorFlow {
    fn subscribe(self: Arc<Self>, subscriber: Arc<dyn Subscriber<T>>) {
        subscriber.on_subscribe(inert());
        subscriber.on_error(self.error.clone());
    }
}

/// A stream that fails every subscriber immediately with `error`.
pub fn error<T: 'static>(error: RpcError) -> Flow<T> {
    Arc::new(ErrorFlow { error })
}

struct OnceFlow<T> {
    item: Mutex<Option<T>>,
}

struct OnceSubscription<T> {
    item: Mutex<Option<T>>,
    subscriber: Arc<dyn Subscriber<T>>,
}

impl<T: Send + 'static> Publisher<T> for OnceFlow<T> {
    fn subscribe(self: Arc<Self>, subscriber: Arc<dyn Subscriber<T>>) {
        let item = self.item.lock().take();
        match item {
            Some(value) => {
                subscriber.on_subscribe(Arc::new(OnceSubscription {
                    item: Mutex::new(Some(value)),
                    subscriber: subscriber.clone(),
                }));
            }
            None => {
                subscriber.on_subscribe(inert());
                subscriber.on_error(RpcError::AlreadySubscribed);
            }
        }
    }
}

impl<T: Send> Subscription for OnceSubscription<T> {
    fn request(&self, n: u32) {
        if n == 0 {
            if self.item.lock().take().is_some() {
                self.subscriber.on_error(RpcError::InvalidDemand(0));
            }
            return;
        }
        let item = self.item.lock().take();
        if let Some(value) = item {
            self.subscriber.on_next(value);
            self.subscriber.on_complete();
        }
    }

    fn cancel(&self) {
        self.item.lock().take();
    }
}

/// A single-value stream: emits `value` on first demand, then completes.
/// Accepts one subscriber.
pub fn once<T: Send + 'static>(value: T) -> Flow<T> {
    Arc::new(OnceFlow {
        item: Mutex::new(Some(value)),
    })
}

struct MapFlow<T, R> {
    source: Flow<T>,
    f: Arc<dyn Fn(T) -> R + Send + Sync>,
}

struct MapSubscriber<T, R> {
    inner: Arc<dyn Subscriber<R>>,
    f: Arc<dyn Fn(T) -> R + Send + Sync>,
}

impl<T, R> Subscriber<T> for MapSubscriber<T, R> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.inner.on_subscribe(subscription);
    }

    fn on_next(&self, item: T) {
        self.inner.on_next((self.f)(item));
    }

    fn on_error(&self, error: RpcError) {
        self.inner.on_error(error);
    }

    fn on_complete(&self) {
        self.inner.on_complete();
    }
}

impl<T: 'static, R: 'static> Publisher<R> for MapFlow<T, R> {
    fn subscribe(self: Arc<Self>, subscriber: Arc<dyn Subscriber<R>>) {
        self.source.clone().subscribe(Arc::new(MapSubscriber {
            inner: subscriber,
            f: self.f.clone(),
        }));
    }
}

/// Apply `f` to every item of `source`. Demand and terminal signals pass
/// through untouched.
pub fn map<T: 'static, R: 'static>(
    source: Flow<T>,
    f: impl Fn(T) -> R + Send + Sync + 'static,
) -> Flow<R> {
    Arc::new(MapFlow {
        source,
        f: Arc::new(f),
    })
}

#[cfg(test)]
pub(crate) mod support {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::{Subscriber, Subscription};
    use crate::RpcError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Signal<T> {
        Next(T),
        Error(RpcError),
        Complete,
    }

    /// Records every callback and exposes the subscription for manual
    /// pacing.
    pub(crate) struct TestSubscriber<T> {
        signals: Mutex<Vec<Signal<T>>>,
        subscription: Mutex<Option<Arc<dyn Subscription>>>,
    }

    impl<T> TestSubscriber<T> {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(TestSubscriber {
                signals: Mutex::new(Vec::new()),
                subscription: Mutex::new(None),
            })
        }

        pub(crate) fn request(&self, n: u32) {
            let subscription = self.subscription.lock().clone();
            subscription.expect("no subscription").request(n);
        }

        pub(crate) fn cancel(&self) {
            let subscription = self.subscription.lock().clone();
            subscription.expect("no subscription").cancel();
        }

        pub(crate) fn is_subscribed(&self) -> bool {
            self.subscription.lock().is_some()
        }
    }

    impl<T: Clone> TestSubscriber<T> {
        pub(crate) fn signals(&self) -> Vec<Signal<T>> {
            self.signals.lock().clone()
        }

        pub(crate) fn items(&self) -> Vec<T> {
            self.signals
                .lock()
                .iter()
                .filter_map(|s| match s {
                    Signal::Next(item) => Some(item.clone()),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn terminal(&self) -> Option<Signal<T>> {
            self.signals
                .lock()
                .iter()
                .find(|s| !matches!(s, Signal::Next(_)))
                .cloned()
        }
    }

    impl<T: Send> Subscriber<T> for TestSubscriber<T> {
        fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
            *self.subscription.lock() = Some(subscription);
        }

        fn on_next(&self, item: T) {
            self.signals.lock().push(Signal::Next(item));
        }

        fn on_error(&self, error: RpcError) {
            self.signals.lock().push(Signal::Error(error));
        }

        fn on_complete(&self) {
            self.signals.lock().push(Signal::Complete);
        }
    }

    /// Stand-in upstream subscription recording demand and cancellation.
    pub(crate) struct TestSubscription {
        requests: Mutex<Vec<u32>>,
        cancelled: AtomicBool,
    }

    impl TestSubscription {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(TestSubscription {
                requests: Mutex::new(Vec::new()),
                cancelled: AtomicBool::new(false),
            })
        }

        pub(crate) fn requests(&self) -> Vec<u32> {
            self.requests.lock().clone()
        }

        pub(crate) fn total_requested(&self) -> u64 {
            self.requests.lock().iter().map(|&n| n as u64).sum()
        }

        pub(crate) fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::Acquire)
        }
    }

    impl Subscription for TestSubscription {
        fn request(&self, n: u32) {
            self.requests.lock().push(n);
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::support::{Signal, TestSubscriber};
    use super::*;

    #[test]
    fn error_flow_terminates_immediately() {
        let subscriber = TestSubscriber::<u32>::new();
        error::<u32>(RpcError::MissingMetadata).subscribe(subscriber.clone());

        assert!(subscriber.is_subscribed());
        assert_eq!(
            subscriber.signals(),
            vec![Signal::Error(RpcError::MissingMetadata)]
        );
    }

    #[test]
    fn once_flow_waits_for_demand() {
        let subscriber = TestSubscriber::new();
        once(7u32).subscribe(subscriber.clone());

        assert!(subscriber.is_subscribed());
        assert!(subscriber.signals().is_empty());

        subscriber.request(1);
        assert_eq!(
            subscriber.signals(),
            vec![Signal::Next(7), Signal::Complete]
        );
    }

    #[test]
    fn once_flow_rejects_second_subscriber() {
        let flow = once(7u32);
        let first = TestSubscriber::new();
        let second = TestSubscriber::new();

        flow.clone().subscribe(first.clone());
        flow.subscribe(second.clone());

        assert_eq!(
            second.signals(),
            vec![Signal::Error(RpcError::AlreadySubscribed)]
        );

        first.request(1);
        assert_eq!(first.items(), vec![7]);
    }

    #[test]
    fn once_flow_cancel_discards_value() {
        let subscriber = TestSubscriber::<u32>::new();
        once(7u32).subscribe(subscriber.clone());

        subscriber.cancel();
        subscriber.request(1);
        assert!(subscriber.signals().is_empty());
    }

    #[test]
    fn map_transforms_items() {
        let subscriber = TestSubscriber::new();
        map(once(21u32), |n| n * 2).subscribe(subscriber.clone());

        subscriber.request(1);
        assert_eq!(
            subscriber.signals(),
            vec![Signal::Next(42), Signal::Complete]
        );
    }
}

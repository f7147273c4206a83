//! Queuing bridge between a greedy producer and a paced consumer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{MAX_DEMAND, Publisher, Subscriber, Subscription, inert};
use crate::RpcError;

type Transform<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// An intermediary between a producer and a subscriber.
///
/// To the producer it behaves as a greedy subscriber, requesting its whole
/// capacity (or [`MAX_DEMAND`]) up front so the producer is never blocked.
/// To the consumer it behaves as a publisher that delivers strictly
/// according to requested demand, in arrival order, buffering the backlog in
/// between. When a finite capacity is configured and the backlog is full,
/// newly offered items are dropped; that overflow policy is lossy by design,
/// not an error.
///
/// The terminal signal is delivered exactly once, after the backlog has
/// drained, even when it arrives while the backlog is empty.
///
/// All methods may be called from any thread; deliveries to the subscriber
/// are serialized by the drain loop's missed-work counter, so a `request`
/// or `on_next` issued from inside a subscriber callback folds into the
/// drain already in progress instead of recursing.
pub struct Relay<T> {
    capacity: Option<usize>,
    wip: AtomicUsize,
    transforms: Mutex<Vec<Transform<T>>>,
    state: Mutex<State<T>>,
}

struct State<T> {
    subscriber: Option<Arc<dyn Subscriber<T>>>,
    subscribed: bool,
    requested: u32,
    backlog: VecDeque<T>,
    done: bool,
    error: Option<RpcError>,
    cancelled: bool,
}

enum Step<T> {
    Emit(Arc<dyn Subscriber<T>>, T),
    Terminal(Option<Arc<dyn Subscriber<T>>>, Option<RpcError>),
    Starved,
    Halted,
}

impl<T: Send + 'static> Relay<T> {
    /// A relay with an unbounded backlog.
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// A relay whose backlog holds at most `capacity` items (clamped to at
    /// least 1). Items offered beyond that are dropped.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Self::build(Some(capacity.max(1)))
    }

    fn build(capacity: Option<usize>) -> Arc<Self> {
        Arc::new(Relay {
            capacity,
            wip: AtomicUsize::new(0),
            transforms: Mutex::new(Vec::new()),
            state: Mutex::new(State {
                subscriber: None,
                subscribed: false,
                requested: 0,
                backlog: VecDeque::new(),
                done: false,
                error: None,
                cancelled: false,
            }),
        })
    }

    /// Append a transform applied, in registration order, to each item
    /// immediately before delivery (post-dequeue, so items already buffered
    /// are transformed too). Returns the relay for chaining.
    pub fn map(self: &Arc<Self>, f: impl Fn(T) -> T + Send + Sync + 'static) -> Arc<Self> {
        self.transforms.lock().push(Arc::new(f));
        self.clone()
    }

    fn apply_transforms(&self, item: T) -> T {
        let transforms = self.transforms.lock().clone();
        transforms.iter().fold(item, |item, f| f(item))
    }

    fn next_step(&self) -> Step<T> {
        let mut state = self.state.lock();
        if state.cancelled {
            state.subscriber = None;
            state.backlog.clear();
            return Step::Halted;
        }
        let done = state.done;
        match state.backlog.pop_front() {
            Some(item) => match state.subscriber.clone() {
                Some(subscriber) => Step::Emit(subscriber, item),
                None => Step::Halted,
            },
            None if done => Step::Terminal(state.subscriber.take(), state.error.take()),
            None => Step::Starved,
        }
    }

    fn terminal_step(&self) -> Option<Step<T>> {
        let mut state = self.state.lock();
        if state.cancelled {
            state.subscriber = None;
            state.backlog.clear();
            return Some(Step::Halted);
        }
        if state.done && state.backlog.is_empty() {
            return Some(Step::Terminal(
                state.subscriber.take(),
                state.error.take(),
            ));
        }
        None
    }

    fn deliver_terminal(subscriber: Option<Arc<dyn Subscriber<T>>>, error: Option<RpcError>) {
        if let Some(subscriber) = subscriber {
            match error {
                Some(error) => subscriber.on_error(error),
                None => subscriber.on_complete(),
            }
        }
    }

    /// The drain loop. Entering bumps the work counter; a drain triggered
    /// while another is running on the same logical sequence records itself
    /// there and returns, and the active loop keeps going until the counter
    /// comes back to the value it saw on entry. Terminal and cancellation
    /// exits leave the counter raised so no further drain can start.
    fn drain(&self) {
        if self.state.lock().subscriber.is_none() {
            return;
        }
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }

        let mut missed = 1usize;

        loop {
            let requested = self.state.lock().requested;
            let mut emitted: u32 = 0;

            while emitted != requested {
                match self.next_step() {
                    Step::Emit(subscriber, item) => {
                        let item = self.apply_transforms(item);
                        subscriber.on_next(item);
                        emitted += 1;
                    }
                    Step::Terminal(subscriber, error) => {
                        Self::deliver_terminal(subscriber, error);
                        return;
                    }
                    Step::Starved => break,
                    Step::Halted => return,
                }
            }

            if emitted == requested {
                // Demand fully satisfied: a terminal signal sitting behind
                // an empty backlog still has to go out.
                match self.terminal_step() {
                    Some(Step::Terminal(subscriber, error)) => {
                        Self::deliver_terminal(subscriber, error);
                        return;
                    }
                    Some(_) => return,
                    None => {}
                }
            }

            if emitted != 0 {
                let mut state = self.state.lock();
                if state.requested != MAX_DEMAND {
                    state.requested -= emitted;
                }
            }

            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                break;
            }
            missed = remaining;
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for Relay<T> {
    /// Producer-side attach. The relay immediately requests its configured
    /// capacity, or [`MAX_DEMAND`] when unbounded. A subscription arriving
    /// after the relay is already terminal is cancelled instead.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let done = self.state.lock().done;
        if done {
            subscription.cancel();
            return;
        }
        let n = match self.capacity {
            Some(capacity) => (capacity as u64).min(MAX_DEMAND as u64) as u32,
            None => MAX_DEMAND,
        };
        subscription.request(n);
    }

    fn on_next(&self, item: T) {
        let mut dropped = false;
        {
            let mut state = self.state.lock();
            match self.capacity {
                Some(capacity) if state.backlog.len() >= capacity => dropped = true,
                _ => state.backlog.push_back(item),
            }
        }
        if dropped {
            tracing::debug!("relay backlog full, dropping item");
        }
        self.drain();
    }

    fn on_error(&self, error: RpcError) {
        {
            let mut state = self.state.lock();
            state.error = Some(error);
            state.done = true;
        }
        self.drain();
    }

    fn on_complete(&self) {
        self.state.lock().done = true;
        self.drain();
    }
}

impl<T: Send + 'static> Publisher<T> for Relay<T> {
    /// Consumer-side attach; allowed exactly once. A second subscriber is
    /// failed on its own channel and the first is left undisturbed.
    fn subscribe(self: Arc<Self>, subscriber: Arc<dyn Subscriber<T>>) {
        let accepted = {
            let mut state = self.state.lock();
            if state.subscribed {
                false
            } else {
                state.subscribed = true;
                state.subscriber = Some(subscriber.clone());
                true
            }
        };
        if accepted {
            subscriber.on_subscribe(self);
        } else {
            subscriber.on_subscribe(inert());
            subscriber.on_error(RpcError::AlreadySubscribed);
        }
    }
}

impl<T: Send + 'static> Subscription for Relay<T> {
    fn request(&self, n: u32) {
        if n == 0 {
            let subscriber = {
                let mut state = self.state.lock();
                state.cancelled = true;
                state.backlog.clear();
                state.subscriber.take()
            };
            self.wip.fetch_add(1, Ordering::AcqRel);
            if let Some(subscriber) = subscriber {
                subscriber.on_error(RpcError::InvalidDemand(0));
            }
            return;
        }
        {
            let mut state = self.state.lock();
            state.requested = state.requested.saturating_add(n).min(MAX_DEMAND);
        }
        self.drain();
    }

    fn cancel(&self) {
        self.state.lock().cancelled = true;
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            let mut state = self.state.lock();
            state.subscriber = None;
            state.backlog.clear();
        }
    }
}

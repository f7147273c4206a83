//! Stream operator that routes a stream based on its first element.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{Flow, MAX_DEMAND, Publisher, Subscriber, Subscription};
use crate::RpcError;

type Router<T, R> = dyn Fn(T, Flow<T>) -> Result<Flow<R>, RpcError> + Send + Sync;

enum Terminal {
    Completed,
    Errored(RpcError),
}

/// Intercepts the first element of an upstream stream, hands it together
/// with a publisher of the remaining elements to a router function, and
/// splices the stream the router returns onto the downstream subscriber.
///
/// The operator plays three roles at once: it is the subscriber attached to
/// the raw upstream, the publisher of the rest-of-stream that the router's
/// result typically consumes, and the subscription handed to whoever
/// subscribes to that rest-of-stream. The stashed first element is replayed
/// to the rest-of-stream subscriber on its first `request`, never earlier,
/// so a slow consumer keeps full control of pacing; a terminal signal that
/// raced ahead of that replay is delivered immediately after it.
///
/// Once a terminal signal has been forwarded or the operator is cancelled,
/// further upstream signals are ignored.
pub struct SwitchOnFirst<T, R> {
    downstream: Arc<dyn Subscriber<R>>,
    router: Box<Router<T, R>>,
    this: Weak<SwitchOnFirst<T, R>>,
    state: Mutex<State<T>>,
}

struct State<T> {
    upstream: Option<Arc<dyn Subscription>>,
    inner: Option<Arc<dyn Subscriber<T>>>,
    first: Option<T>,
    done: bool,
    error: Option<RpcError>,
    cancelled: bool,
}

/// Delivers a terminal signal the first time demand arrives. Handed to the
/// downstream subscriber when the upstream terminates before the router
/// produced anything to subscribe, so the downstream still observes exactly
/// one terminal signal.
struct DeferredTerminal<R> {
    target: Arc<dyn Subscriber<R>>,
    signal: Mutex<Option<Terminal>>,
}

impl<R> Subscription for DeferredTerminal<R> {
    fn request(&self, _n: u32) {
        let signal = self.signal.lock().take();
        match signal {
            Some(Terminal::Errored(error)) => self.target.on_error(error),
            Some(Terminal::Completed) => self.target.on_complete(),
            None => {}
        }
    }

    fn cancel(&self) {
        self.signal.lock().take();
    }
}

/// Fails a surplus rest-of-stream subscriber on its first `request`,
/// leaving the established one untouched.
struct Rejected<T> {
    target: Mutex<Option<Arc<dyn Subscriber<T>>>>,
}

impl<T> Subscription for Rejected<T> {
    fn request(&self, _n: u32) {
        if let Some(target) = self.target.lock().take() {
            target.on_error(RpcError::AlreadySubscribed);
        }
    }

    fn cancel(&self) {
        self.target.lock().take();
    }
}

impl<T, R> SwitchOnFirst<T, R>
where
    T: Clone + Send + 'static,
    R: 'static,
{
    /// `downstream` ultimately receives the routed stream's output; the
    /// router decides, from the first element alone, what that stream is.
    /// A router error is converted into an `on_error` on `downstream` and
    /// tears the upstream down.
    pub fn new(
        downstream: Arc<dyn Subscriber<R>>,
        router: impl Fn(T, Flow<T>) -> Result<Flow<R>, RpcError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| SwitchOnFirst {
            downstream,
            router: Box::new(router),
            this: this.clone(),
            state: Mutex::new(State {
                upstream: None,
                inner: None,
                first: None,
                done: false,
                error: None,
                cancelled: false,
            }),
        })
    }

    /// A new stream applying `f` to each element this operator publishes.
    pub fn map<U: 'static>(
        self: &Arc<Self>,
        f: impl Fn(T) -> U + Send + Sync + 'static,
    ) -> Flow<U> {
        super::map(self.clone() as Flow<T>, f)
    }

    fn terminate(&self, terminal: Terminal) {
        enum Deliver<T2> {
            Inner(Arc<dyn Subscriber<T2>>),
            Downstream,
            Deferred,
            Ignored,
        }

        let deliver = {
            let mut state = self.state.lock();
            if state.cancelled || state.done {
                Deliver::Ignored
            } else {
                state.done = true;
                if let Terminal::Errored(error) = &terminal {
                    state.error = Some(error.clone());
                }
                match (&state.inner, state.first.is_some()) {
                    // First element still stashed: replayed together with
                    // this signal once the inner subscriber asks.
                    (Some(_), true) => Deliver::Deferred,
                    (Some(inner), false) => Deliver::Inner(inner.clone()),
                    (None, _) => Deliver::Downstream,
                }
            }
        };

        match deliver {
            Deliver::Inner(inner) => match terminal {
                Terminal::Errored(error) => inner.on_error(error),
                Terminal::Completed => inner.on_complete(),
            },
            Deliver::Downstream => {
                self.downstream.on_subscribe(Arc::new(DeferredTerminal {
                    target: self.downstream.clone(),
                    signal: Mutex::new(Some(terminal)),
                }));
            }
            Deliver::Deferred | Deliver::Ignored => {}
        }
    }
}

impl<T, R> Subscriber<T> for SwitchOnFirst<T, R>
where
    T: Clone + Send + 'static,
    R: 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let duplicate = {
            let mut state = self.state.lock();
            if state.upstream.is_some() {
                true
            } else {
                state.upstream = Some(subscription.clone());
                false
            }
        };
        if duplicate {
            // A stream attaches once; drop the newcomer.
            subscription.cancel();
        } else {
            // Minimal standing demand to discover the first element.
            subscription.request(1);
        }
    }

    fn on_next(&self, item: T) {
        enum Route<T2> {
            Forward(Arc<dyn Subscriber<T2>>),
            First,
            Ignored,
        }

        let route = {
            let mut state = self.state.lock();
            if state.cancelled || state.done {
                Route::Ignored
            } else if let Some(inner) = state.inner.clone() {
                Route::Forward(inner)
            } else {
                // Stash before routing: a router that synchronously
                // subscribes the rest-of-stream and requests must find the
                // first element ready for replay.
                state.first = Some(item.clone());
                Route::First
            }
        };

        match route {
            Route::Ignored => {}
            Route::Forward(inner) => inner.on_next(item),
            Route::First => {
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                let rest: Flow<T> = this;
                match (self.router)(item, rest) {
                    Ok(routed) => routed.subscribe(self.downstream.clone()),
                    Err(error) => {
                        self.terminate(Terminal::Errored(error));
                        // Nothing will consume the raw stream after a failed
                        // route.
                        let upstream = {
                            let mut state = self.state.lock();
                            state.first = None;
                            state.upstream.clone()
                        };
                        if let Some(upstream) = upstream {
                            upstream.cancel();
                        }
                    }
                }
            }
        }
    }

    fn on_error(&self, error: RpcError) {
        self.terminate(Terminal::Errored(error));
    }

    fn on_complete(&self) {
        self.terminate(Terminal::Completed);
    }
}

impl<T, R> Publisher<T> for SwitchOnFirst<T, R>
where
    T: Clone + Send + 'static,
    R: 'static,
{
    /// Subscribing to the operator yields the raw elements after the first.
    /// The first caller becomes the inner subscriber; later callers are
    /// failed individually with `AlreadySubscribed`.
    fn subscribe(self: Arc<Self>, subscriber: Arc<dyn Subscriber<T>>) {
        let accepted = {
            let mut state = self.state.lock();
            if state.inner.is_none() {
                state.inner = Some(subscriber.clone());
                true
            } else {
                false
            }
        };
        if accepted {
            subscriber.on_subscribe(self);
        } else {
            subscriber.on_subscribe(Arc::new(Rejected {
                target: Mutex::new(Some(subscriber.clone())),
            }));
        }
    }
}

impl<T, R> Subscription for SwitchOnFirst<T, R>
where
    T: Clone + Send + 'static,
    R: 'static,
{
    fn request(&self, n: u32) {
        if n == 0 {
            let (inner, upstream) = {
                let mut state = self.state.lock();
                state.cancelled = true;
                state.first = None;
                (state.inner.clone(), state.upstream.clone())
            };
            if let Some(upstream) = upstream {
                upstream.cancel();
            }
            if let Some(inner) = inner {
                inner.on_error(RpcError::InvalidDemand(0));
            }
            return;
        }

        let (stashed, inner, terminal, upstream) = {
            let mut state = self.state.lock();
            let stashed = state.first.take();
            let terminal = if state.done {
                Some(match state.error.clone() {
                    Some(error) => Terminal::Errored(error),
                    None => Terminal::Completed,
                })
            } else {
                None
            };
            (
                stashed,
                state.inner.clone(),
                terminal,
                state.upstream.clone(),
            )
        };

        match stashed {
            Some(first) => {
                if let Some(inner) = inner {
                    inner.on_next(first);
                    // Replay a terminal signal that arrived while the first
                    // element was still pending.
                    match terminal {
                        Some(Terminal::Errored(error)) => inner.on_error(error),
                        Some(Terminal::Completed) => inner.on_complete(),
                        None => {}
                    }
                }
                if let Some(upstream) = upstream {
                    if n >= MAX_DEMAND {
                        upstream.request(MAX_DEMAND);
                    } else if n - 1 > 0 {
                        upstream.request(n - 1);
                    }
                }
            }
            None => {
                if let Some(upstream) = upstream {
                    upstream.request(n);
                }
            }
        }
    }

    fn cancel(&self) {
        let upstream = {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.first = None;
            state.upstream.clone()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

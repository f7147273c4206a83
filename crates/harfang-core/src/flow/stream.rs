//! Bridge from the reactive-stream types to `futures_core::Stream`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures_core::Stream;
use parking_lot::Mutex;

use super::{Flow, MAX_DEMAND, Subscriber, Subscription};
use crate::RpcError;

/// An async [`Stream`] over a [`Flow`].
///
/// The adapter keeps a prefetch window of request-n credit open against the
/// publisher: it requests `prefetch` up front and again whenever the local
/// buffer runs dry, so the producer is paced without a round-trip per item.
/// An upstream error is yielded as a final `Err` item before the stream
/// ends. Dropping the adapter cancels the subscription.
///
/// Built with [`into_stream`](super::into_stream).
pub struct FlowStream<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    prefetch: u32,
    state: Mutex<State<T>>,
}

struct State<T> {
    items: VecDeque<T>,
    terminal: Option<Option<RpcError>>,
    finished: bool,
    subscription: Option<Arc<dyn Subscription>>,
    in_flight: u32,
    waker: Option<Waker>,
}

struct StreamSubscriber<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> Subscriber<T> for StreamSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let n = self.shared.prefetch;
        {
            let mut state = self.shared.state.lock();
            state.subscription = Some(subscription.clone());
            state.in_flight = n;
        }
        subscription.request(n);
    }

    fn on_next(&self, item: T) {
        let waker = {
            let mut state = self.shared.state.lock();
            state.items.push_back(item);
            state.in_flight = state.in_flight.saturating_sub(1);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn on_error(&self, error: RpcError) {
        let waker = {
            let mut state = self.shared.state.lock();
            state.terminal = Some(Some(error));
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn on_complete(&self) {
        let waker = {
            let mut state = self.shared.state.lock();
            state.terminal = Some(None);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Subscribe to `flow` and expose it as an async [`Stream`], keeping up to
/// `prefetch` items of demand in flight (clamped to `1..=MAX_DEMAND`;
/// passing [`MAX_DEMAND`] requests an unbounded stream once and never
/// re-requests).
pub fn into_stream<T: Send + 'static>(flow: Flow<T>, prefetch: u32) -> FlowStream<T> {
    let shared = Arc::new(Shared {
        prefetch: prefetch.clamp(1, MAX_DEMAND),
        state: Mutex::new(State {
            items: VecDeque::new(),
            terminal: None,
            finished: false,
            subscription: None,
            in_flight: 0,
            waker: None,
        }),
    });
    flow.subscribe(Arc::new(StreamSubscriber {
        shared: shared.clone(),
    }));
    FlowStream { shared }
}

impl<T> Stream for FlowStream<T> {
    type Item = Result<T, RpcError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        enum Next<T2> {
            Item(T2, Option<Arc<dyn Subscription>>),
            Failed(RpcError),
            Finished,
            Pending,
        }

        let next = {
            let mut state = self.shared.state.lock();
            if let Some(item) = state.items.pop_front() {
                // Top the window back up once everything requested has been
                // consumed.
                let replenish = state.in_flight == 0
                    && state.items.is_empty()
                    && state.terminal.is_none()
                    && self.shared.prefetch < MAX_DEMAND;
                let subscription = if replenish {
                    state.in_flight = self.shared.prefetch;
                    state.subscription.clone()
                } else {
                    None
                };
                Next::Item(item, subscription)
            } else {
                match state.terminal.take() {
                    Some(Some(error)) => {
                        state.finished = true;
                        Next::Failed(error)
                    }
                    Some(None) => {
                        state.finished = true;
                        Next::Finished
                    }
                    None if state.finished => Next::Finished,
                    None => {
                        state.waker = Some(cx.waker().clone());
                        Next::Pending
                    }
                }
            }
        };

        match next {
            Next::Item(item, subscription) => {
                if let Some(subscription) = subscription {
                    subscription.request(self.shared.prefetch);
                }
                Poll::Ready(Some(Ok(item)))
            }
            Next::Failed(error) => Poll::Ready(Some(Err(error))),
            Next::Finished => Poll::Ready(None),
            Next::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for FlowStream<T> {
    fn drop(&mut self) {
        let subscription = self.shared.state.lock().subscription.take();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::super::support::TestSubscription;
    use super::*;
    use crate::flow::{Publisher, Relay};

    #[tokio::test]
    async fn yields_items_then_completion() {
        let relay = Relay::new();
        relay.on_next(1u32);
        relay.on_next(2);
        relay.on_next(3);
        relay.on_complete();

        let stream = into_stream(relay as Flow<u32>, 2);
        let collected: Vec<_> = stream.collect().await;

        assert_eq!(collected, vec![Ok(1), Ok(2), Ok(3)]);
    }

    #[tokio::test]
    async fn surfaces_error_as_final_item() {
        let relay = Relay::new();
        relay.on_next(1u32);
        relay.on_error(RpcError::Handler("boom".to_string()));

        let mut stream = into_stream(relay as Flow<u32>, 8);

        assert_eq!(stream.next().await, Some(Ok(1)));
        assert_eq!(
            stream.next().await,
            Some(Err(RpcError::Handler("boom".to_string())))
        );
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn items_arriving_after_poll_wake_the_task() {
        let relay = Relay::new();
        let mut stream = into_stream(relay.clone() as Flow<u32>, 4);

        let feeder = {
            let relay = relay.clone();
            tokio::spawn(async move {
                relay.on_next(7u32);
                relay.on_complete();
            })
        };

        assert_eq!(stream.next().await, Some(Ok(7)));
        assert_eq!(stream.next().await, None);
        feeder.await.unwrap();
    }

    struct Idle {
        subscription: Arc<TestSubscription>,
    }

    impl Publisher<u32> for Idle {
        fn subscribe(self: Arc<Self>, subscriber: Arc<dyn Subscriber<u32>>) {
            subscriber.on_subscribe(self.subscription.clone());
        }
    }

    #[test]
    fn prefetch_requested_up_front_and_drop_cancels() {
        let upstream = TestSubscription::new();
        let stream = into_stream(
            Arc::new(Idle {
                subscription: upstream.clone(),
            }) as Flow<u32>,
            16,
        );

        assert_eq!(upstream.requests(), vec![16]);
        assert!(!upstream.is_cancelled());

        drop(stream);
        assert!(upstream.is_cancelled());
    }

    #[test]
    fn zero_prefetch_clamped_to_one() {
        let upstream = TestSubscription::new();
        let _stream = into_stream(
            Arc::new(Idle {
                subscription: upstream.clone(),
            }) as Flow<u32>,
            0,
        );

        assert_eq!(upstream.requests(), vec![1]);
    }
}

//! Adapters for the five call shapes
//!
//! | Shape            | Closes when                                            |
//! |------------------|--------------------------------------------------------|
//! | sync unary       | the closure returns or unwinds                         |
//! | async unary      | the future resolves, or is dropped (cancelled)         |
//! | client streaming | the aggregated response resolves                       |
//! | server streaming | the outbound stream ends or errs, or is dropped        |
//! | duplex           | both directions are done, or either side errs          |
//!
//! Every adapter hands back the original result, item or fault untouched.

use crate::instrumentor::Instrumentor;
use crate::scope::{CallScope, Outcome};
use crate::status::Classify;
use futures::ready;
use futures::stream::Stream;
use pin_project::{pin_project, pinned_drop};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

impl Instrumentor {
    /// Instrument a synchronous unary call
    ///
    /// A panic inside `call` is recorded as an unclassified failure and
    /// then propagates.
    pub fn unary<T, E, F>(&self, identifier: &str, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Classify,
    {
        let scope = self.open(identifier);
        let result = call();
        scope.finish(&result);
        result
    }

    /// Instrument an asynchronous unary call
    ///
    /// The scope opens immediately, so the call is in flight from the moment
    /// this returns until the future resolves or is dropped.
    pub fn unary_async<T, E, F>(&self, identifier: &str, call: F) -> Instrumented<F>
    where
        F: Future<Output = Result<T, E>>,
        E: Classify,
    {
        Instrumented::new(self.open(identifier), call)
    }

    /// Instrument a client-streaming call
    ///
    /// `handler` consumes the inbound stream and produces one response.
    pub fn client_streaming<S, H, F, T, E>(
        &self,
        identifier: &str,
        inbound: S,
        handler: H,
    ) -> Instrumented<F>
    where
        H: FnOnce(S) -> F,
        F: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let scope = self.open(identifier);
        Instrumented::new(scope, handler(inbound))
    }

    /// Instrument a server-streaming call
    ///
    /// `call` initiates the call and yields the outbound stream. A failed
    /// initiation closes the scope with that fault; otherwise the scope moves
    /// into the returned [`InstrumentedStream`].
    pub fn server_streaming<F, S, E>(&self, identifier: &str, call: F) -> StreamingCall<F>
    where
        F: Future<Output = Result<S, E>>,
        E: Classify,
    {
        StreamingCall {
            inner: call,
            scope: Some(self.open(identifier)),
        }
    }

    /// Instrument an already-initiated outbound stream
    pub fn stream<S>(&self, identifier: &str, stream: S) -> InstrumentedStream<S> {
        InstrumentedStream {
            inner: stream,
            scope: Some(self.open(identifier)),
        }
    }

    /// Instrument a bidirectional call
    ///
    /// `handler` receives the wrapped inbound stream and produces the outbound
    /// stream. The call succeeds once the inbound has ended (or been dropped)
    /// and the outbound has ended.
    pub fn duplex<S, H, F, O, E>(&self, identifier: &str, inbound: S, handler: H) -> DuplexCall<F>
    where
        H: FnOnce(DuplexInbound<S>) -> F,
        F: Future<Output = Result<O, E>>,
        E: Classify,
    {
        let shared = Arc::new(DuplexShared::new(self.open(identifier)));
        let inbound = DuplexInbound {
            inner: inbound,
            shared: Arc::clone(&shared),
            done: false,
        };
        DuplexCall {
            inner: handler(inbound),
            shared: Some(shared),
        }
    }
}

/// A future whose completion closes a call scope
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct Instrumented<F> {
    #[pin]
    inner: F,
    scope: Option<CallScope>,
}

impl<F> Instrumented<F> {
    fn new(scope: CallScope, inner: F) -> Self {
        Self {
            inner,
            scope: Some(scope),
        }
    }
}

impl<F, T, E> Future for Instrumented<F>
where
    F: Future<Output = Result<T, E>>,
    E: Classify,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        if let Some(scope) = this.scope.take() {
            scope.finish(&result);
        }
        Poll::Ready(result)
    }
}

/// Initiation of a server-streaming call
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct StreamingCall<F> {
    #[pin]
    inner: F,
    scope: Option<CallScope>,
}

impl<F, S, E> Future for StreamingCall<F>
where
    F: Future<Output = Result<S, E>>,
    E: Classify,
{
    type Output = Result<InstrumentedStream<S>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        let scope = this.scope.take();
        Poll::Ready(match result {
            Ok(stream) => Ok(InstrumentedStream {
                inner: stream,
                scope,
            }),
            Err(fault) => {
                if let Some(scope) = scope {
                    scope.fail(&fault);
                }
                Err(fault)
            }
        })
    }
}

/// An outbound stream whose end closes a call scope
///
/// Closes as succeeded on end of stream and as failed on the first `Err`
/// item. Items after an `Err` still pass through. Dropping the stream
/// before either closes it as cancelled.
#[pin_project]
#[must_use = "streams do nothing unless polled"]
pub struct InstrumentedStream<S> {
    #[pin]
    inner: S,
    scope: Option<CallScope>,
}

impl<S> InstrumentedStream<S> {
    /// Whether the call is still being measured
    pub fn is_open(&self) -> bool {
        self.scope.is_some()
    }
}

impl<S, T, E> Stream for InstrumentedStream<S>
where
    S: Stream<Item = Result<T, E>>,
    E: Classify,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = ready!(this.inner.poll_next(cx));
        match &item {
            None => {
                if let Some(scope) = this.scope.take() {
                    scope.succeed();
                }
            }
            Some(Err(fault)) => {
                if let Some(scope) = this.scope.take() {
                    scope.fail(fault);
                }
            }
            Some(Ok(_)) => {}
        }
        Poll::Ready(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Scope shared by the two halves of a duplex call
struct DuplexShared {
    scope: Mutex<Option<CallScope>>,
    inbound_done: AtomicBool,
    outbound_done: AtomicBool,
}

impl DuplexShared {
    fn new(scope: CallScope) -> Self {
        Self {
            scope: Mutex::new(Some(scope)),
            inbound_done: AtomicBool::new(false),
            outbound_done: AtomicBool::new(false),
        }
    }

    fn take_scope(&self) -> Option<CallScope> {
        self.scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn close(&self, outcome: Outcome) {
        if let Some(mut scope) = self.take_scope() {
            scope.close(outcome);
        }
    }

    fn mark_inbound_done(&self) {
        self.inbound_done.store(true, Ordering::SeqCst);
        if self.outbound_done.load(Ordering::SeqCst) {
            self.close(Outcome::Succeeded);
        }
    }

    fn mark_outbound_done(&self) {
        self.outbound_done.store(true, Ordering::SeqCst);
        if self.inbound_done.load(Ordering::SeqCst) {
            self.close(Outcome::Succeeded);
        }
    }

    fn is_open(&self) -> bool {
        self.scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Inbound half of a duplex call, handed to the handler
///
/// Ending or dropping it marks the inbound direction done. An `Err` item
/// fails the call.
#[pin_project(PinnedDrop)]
pub struct DuplexInbound<S> {
    #[pin]
    inner: S,
    shared: Arc<DuplexShared>,
    done: bool,
}

impl<S, T, E> Stream for DuplexInbound<S>
where
    S: Stream<Item = Result<T, E>>,
    E: Classify,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = ready!(this.inner.poll_next(cx));
        match &item {
            None => {
                if !*this.done {
                    *this.done = true;
                    this.shared.mark_inbound_done();
                }
            }
            Some(Err(fault)) => this.shared.close(Outcome::from_fault(fault)),
            Some(Ok(_)) => {}
        }
        Poll::Ready(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[pinned_drop]
impl<S> PinnedDrop for DuplexInbound<S> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if !*this.done {
            *this.done = true;
            this.shared.mark_inbound_done();
        }
    }
}

/// Handler side of a duplex call, resolving to the outbound stream
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct DuplexCall<F> {
    #[pin]
    inner: F,
    shared: Option<Arc<DuplexShared>>,
}

impl<F, O, E> Future for DuplexCall<F>
where
    F: Future<Output = Result<O, E>>,
    E: Classify,
{
    type Output = Result<DuplexOutbound<O>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        let shared = this.shared.take();
        Poll::Ready(match result {
            Ok(outbound) => Ok(DuplexOutbound {
                inner: outbound,
                shared,
                done: false,
            }),
            Err(fault) => {
                if let Some(shared) = shared {
                    shared.close(Outcome::from_fault(&fault));
                }
                Err(fault)
            }
        })
    }
}

/// Outbound half of a duplex call
///
/// Ending it marks the outbound direction done; dropping it before the end
/// cancels the call. An `Err` item fails the call.
#[pin_project(PinnedDrop)]
#[must_use = "streams do nothing unless polled"]
pub struct DuplexOutbound<O> {
    #[pin]
    inner: O,
    shared: Option<Arc<DuplexShared>>,
    done: bool,
}

impl<O> DuplexOutbound<O> {
    /// Whether the call is still being measured
    pub fn is_open(&self) -> bool {
        self.shared.as_ref().is_some_and(|shared| shared.is_open())
    }
}

impl<O, T, E> Stream for DuplexOutbound<O>
where
    O: Stream<Item = Result<T, E>>,
    E: Classify,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = ready!(this.inner.poll_next(cx));
        if let Some(shared) = this.shared.as_ref() {
            match &item {
                None => {
                    if !*this.done {
                        *this.done = true;
                        shared.mark_outbound_done();
                    }
                }
                Some(Err(fault)) => shared.close(Outcome::from_fault(fault)),
                Some(Ok(_)) => {}
            }
        }
        Poll::Ready(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[pinned_drop]
impl<O> PinnedDrop for DuplexOutbound<O> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if let Some(shared) = this.shared.as_ref() {
            if !*this.done {
                shared.close(Outcome::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetricRegistry;
    use crate::status::StatusCode;
    use futures::stream::{self, StreamExt};

    const ID: &str = "/Svc/Foo";

    fn server() -> Instrumentor {
        Instrumentor::server(&MetricRegistry::new()).expect("register")
    }

    #[test]
    fn test_unary_returns_result_untouched() {
        let server = server();
        let ok: Result<u32, StatusCode> = server.unary(ID, || Ok(7));
        assert_eq!(ok, Ok(7));
        let err: Result<u32, StatusCode> = server.unary(ID, || Err(StatusCode::NotFound));
        assert_eq!(err, Err(StatusCode::NotFound));

        assert_eq!(server.total(ID), Some(2));
        assert_eq!(server.errors(ID, "NotFound"), Some(1));
        assert_eq!(server.in_progress(ID), Some(0));
    }

    #[tokio::test]
    async fn test_stream_error_closes_once_and_passes_items_through() {
        let server = server();
        let items: Vec<Result<u32, StatusCode>> = vec![
            Ok(1),
            Err(StatusCode::Internal),
            Ok(2),
            Err(StatusCode::Aborted),
        ];
        let mut stream = server.stream(ID, stream::iter(items.clone()));
        assert!(stream.is_open());

        let collected: Vec<_> = (&mut stream).collect().await;
        assert_eq!(collected, items);
        assert!(!stream.is_open());
        assert_eq!(server.total(ID), Some(1));
        assert_eq!(server.errors(ID, "Internal"), Some(1));
        assert_eq!(server.errors(ID, "Aborted"), Some(0));
    }

    #[tokio::test]
    async fn test_failed_initiation_closes_scope() {
        let server = server();
        let call = server.server_streaming(ID, async {
            Err::<stream::Empty<Result<u8, StatusCode>>, _>(StatusCode::Unavailable)
        });
        assert!(call.await.is_err());
        assert_eq!(server.errors(ID, "Unavailable"), Some(1));
        assert_eq!(server.in_progress(ID), Some(0));
    }

    #[tokio::test]
    async fn test_duplex_handler_error_fails_call() {
        let server = server();
        let inbound = stream::iter(vec![Ok::<u8, StatusCode>(1)]);
        let call = server.duplex(ID, inbound, |_inbound| async {
            Err::<stream::Empty<Result<u8, StatusCode>>, _>(StatusCode::PermissionDenied)
        });
        assert!(call.await.is_err());
        assert_eq!(server.errors(ID, "PermissionDenied"), Some(1));
        assert_eq!(server.total(ID), Some(1));
        assert_eq!(server.in_progress(ID), Some(0));
    }
}

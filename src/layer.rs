//! Tower middleware for unary calls
//!
//! [`InstrumentLayer`] wraps any `tower::Service` whose request exposes a
//! call path. Each request opens a scope that closes when the response
//! future resolves or is dropped. Responses are classified too, so a gRPC
//! response carrying a non-zero `grpc-status` header counts as a failure
//! even though the service returned `Ok`.
//!
//! Request paths are client-controlled, so only the paths registered with
//! [`InstrumentLayer::with_methods`] get their own labels. Every other path
//! is recorded under [`UNKNOWN_CALL`].

use crate::instrumentor::Instrumentor;
use crate::scope::{CallScope, Outcome};
use crate::status::{Classify, StatusCode};
use futures::ready;
use pin_project::pin_project;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Header carrying the gRPC status of a response
pub const GRPC_STATUS_HEADER: &str = "grpc-status";

/// Identifier recorded for paths outside the registered method set
pub const UNKNOWN_CALL: &str = "/unknown/unknown";

/// Requests that name the call they invoke
pub trait CallPath {
    /// Call identifier, e.g. `/helloworld.Greeter/SayHello`
    fn call_path(&self) -> &str;
}

impl<B> CallPath for http::Request<B> {
    fn call_path(&self) -> &str {
        self.uri().path()
    }
}

/// Responses that may report a failure in-band
pub trait ClassifyResponse {
    /// `None` for a successful response
    fn failure_code(&self) -> Option<StatusCode>;
}

impl<B> ClassifyResponse for http::Response<B> {
    fn failure_code(&self) -> Option<StatusCode> {
        let value = self.headers().get(GRPC_STATUS_HEADER)?;
        let code = value
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse::<i32>().ok())
            .and_then(StatusCode::from_i32)
            .unwrap_or(StatusCode::Unknown);
        (code != StatusCode::Ok).then_some(code)
    }
}

/// Applies [`InstrumentService`] to a service
#[derive(Debug, Clone)]
pub struct InstrumentLayer {
    instrumentor: Instrumentor,
    methods: Arc<HashSet<String>>,
}

impl InstrumentLayer {
    /// Layer with no registered methods; every call records as [`UNKNOWN_CALL`]
    pub fn new(instrumentor: Instrumentor) -> Self {
        Self {
            instrumentor,
            methods: Arc::default(),
        }
    }

    /// Register the call paths the wrapped service serves
    pub fn with_methods<I, M>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        let mut known = (*self.methods).clone();
        known.extend(methods.into_iter().map(Into::into));
        self.methods = Arc::new(known);
        self
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = InstrumentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentService {
            inner,
            instrumentor: self.instrumentor.clone(),
            methods: Arc::clone(&self.methods),
        }
    }
}

/// Service wrapper that measures every call
#[derive(Debug, Clone)]
pub struct InstrumentService<S> {
    inner: S,
    instrumentor: Instrumentor,
    methods: Arc<HashSet<String>>,
}

impl<S> InstrumentService<S> {
    /// Wrap `inner` with no registered methods
    pub fn new(inner: S, instrumentor: Instrumentor) -> Self {
        InstrumentLayer::new(instrumentor).layer(inner)
    }

    /// Identifier to record for a request path
    pub fn identifier_for<'a>(&self, path: &'a str) -> &'a str {
        if self.methods.contains(path) {
            path
        } else {
            tracing::debug!(path = %path, "Recording unregistered call path as unknown");
            UNKNOWN_CALL
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, Req> Service<Req> for InstrumentService<S>
where
    S: Service<Req>,
    Req: CallPath,
    S::Response: ClassifyResponse,
    S::Error: Classify,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let scope = self
            .instrumentor
            .open(self.identifier_for(req.call_path()));
        ResponseFuture {
            inner: self.inner.call(req),
            scope: Some(scope),
        }
    }
}

/// Response future of [`InstrumentService`]
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture<F> {
    #[pin]
    inner: F,
    scope: Option<CallScope>,
}

impl<F, R, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<R, E>>,
    R: ClassifyResponse,
    E: Classify,
{
    type Output = Result<R, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        if let Some(mut scope) = this.scope.take() {
            let outcome = match &result {
                Ok(response) => match response.failure_code() {
                    Some(code) => Outcome::ClassifiedFailed(code),
                    None => Outcome::Succeeded,
                },
                Err(fault) => Outcome::from_fault(fault),
            };
            scope.close(outcome);
        }
        Poll::Ready(result)
    }
}

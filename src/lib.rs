//! rpc-prometheus - Prometheus instrumentation for RPC calls
//!
//! Records request counts, errors, in-flight calls and latency for every call
//! shape: sync and async unary, client streaming, server streaming and
//! bidirectional streaming.
//!
//! ```no_run
//! use rpc_prometheus::{Instrumentor, MetricRegistry, StatusCode};
//!
//! let registry = MetricRegistry::new();
//! let server = Instrumentor::server(&registry)?;
//!
//! let reply: Result<&str, StatusCode> = server.unary("/helloworld.Greeter/SayHello", || Ok("hi"));
//! assert_eq!(reply, Ok("hi"));
//! println!("{}", registry.gather()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod instrumentor;
pub mod layer;
pub mod method;
pub mod registry;
pub mod scope;
pub mod shape;
pub mod simulate;
pub mod status;
pub mod summary;
pub mod telemetry;

pub use config::{CallMetric, Config, EnabledMetrics, InstrumentationConfig};
pub use error::{InstrumentError, InstrumentResult};
pub use instrumentor::{Instrumentor, Role};
pub use layer::{CallPath, ClassifyResponse, InstrumentLayer, InstrumentService};
pub use method::{CallIdentity, LabelGranularity, MethodResolver};
pub use registry::{MetricDescriptor, MetricKind, MetricRegistry, Timer};
pub use scope::{CallScope, Outcome, ScopeReport};
pub use shape::{
    DuplexCall, DuplexInbound, DuplexOutbound, Instrumented, InstrumentedStream, StreamingCall,
};
pub use status::{Classify, StatusCode};
pub use summary::{SummaryOpts, SummarySnapshot};

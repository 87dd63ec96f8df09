//! Query-frontend dispatcher.
//!
//! A long-lived service that sits between a stateless HTTP/RPC edge and a
//! fleet of remote schedulers:
//!
//! - [`Dispatcher`] accepts synchronous round trips, assigns each one a
//!   process-unique query ID, and submits it over a persistent bidirectional
//!   stream to one scheduler.
//! - [`WorkerPool`] maintains a fixed number of streams per scheduler
//!   address and follows discovery events adding and removing addresses at
//!   runtime.
//! - [`ResultSink`] receives the executed result pushed back out-of-band by
//!   the worker service and routes it to the caller still waiting inside
//!   `Dispatcher::round_trip`.
//!
//! The gRPC surface for both callers and workers lives in [`server`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod result_sink;
pub mod server;
pub(crate) mod worker;

pub use config::{ConfigError, DiscoveryMode, FrontendConfig};
pub use dispatcher::{Dispatcher, RequestContext};
pub use error::{FrontendError, FrontendResult};
pub use metrics::FrontendMetrics;
pub use pool::WorkerPool;
pub use registry::RequestRegistry;
pub use result_sink::ResultSink;
pub use server::{FrontendService, WorkerResultService, TENANT_METADATA_KEY};

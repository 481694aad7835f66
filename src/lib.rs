pub mod common;
pub mod error;
pub mod harness;
pub mod probe;
pub mod runtime;
pub mod servers;
pub mod spec;

pub use error::Error;
pub use harness::{Harness, Lifecycle, RunningInstance};
pub use probe::{MessageSource, ReadinessProbe};
pub use spec::{new_handle, Backoff, Config, Endpoint, Server, ServiceSpec};

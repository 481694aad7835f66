/// Contains the harness which brings up and tears down service instances.
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{Future, FutureExt};
use tokio::time::Instant;

use crate::common::rand_suffix;
use crate::error::Error;
use crate::runtime::Runtime;
use crate::spec::{Endpoint, ServiceSpec};

/// Brings up one ephemeral service instance and guarantees its teardown.
///
/// A [Harness] is configured once from a validated [ServiceSpec] and owns
/// at most one [RunningInstance] at a time. `start` blocks the calling task
/// until the service is ready, the configured deadline elapses or the
/// runtime reports a failure; on every failure path the partially started
/// container is removed before the error is returned, so a failed `start`
/// never leaks a container.
///
/// ```no_run
/// # async fn example() -> Result<(), container_harness::Error> {
/// use container_harness::{Harness, ReadinessProbe, ServiceSpec};
///
/// let spec = ServiceSpec::builder()
///     .image("redis")
///     .ports(vec![6379])
///     .probe(ReadinessProbe::tcp(6379))
///     .build()
///     .unwrap();
///
/// let mut harness = Harness::configure(spec)?;
/// let mut instance = harness.start().await?;
/// let endpoint = instance.endpoint(6379)?.clone();
/// // ... run the test against `endpoint` ...
/// instance.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Harness {
    spec: ServiceSpec,
    runtime: Option<Runtime>,
    active: Arc<AtomicBool>,
}

impl Harness {
    /// Validates the spec.
    ///
    /// Fails only with [Error::InvalidSpec]; the container runtime is not
    /// contacted until `start` is called.
    pub fn configure(spec: ServiceSpec) -> Result<Self, Error> {
        spec.validate()?;
        Ok(Harness {
            spec,
            runtime: None,
            active: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The spec this harness was configured with.
    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    /// Creates and starts an instance, blocking until it is ready.
    ///
    /// Fails with [Error::AlreadyStarted] while a previously started
    /// instance has not been stopped, with [Error::StartupTimeout] when the
    /// readiness probe never succeeds within the spec's deadline and with
    /// [Error::Runtime] when the container runtime rejects a request. The
    /// harness never retries a failed startup; the caller decides.
    pub async fn start(&mut self) -> Result<RunningInstance, Error> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        let result = match self.connect_runtime() {
            Ok(runtime) => self.try_start(&runtime).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(instance) => Ok(instance),
            Err(err) => {
                self.active.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Connects to the local container runtime on first use.
    fn connect_runtime(&mut self) -> Result<Runtime, Error> {
        if let Some(runtime) = &self.runtime {
            return Ok(runtime.clone());
        }
        let runtime = Runtime::connect()?;
        self.runtime = Some(runtime.clone());
        Ok(runtime)
    }

    /// Starts an instance, runs the given test body and tears the instance
    /// down on every exit path, including a panicking body.
    ///
    /// The scope of the body determines the life of the instance: it is
    /// created before the closure runs and removed after the closure exits.
    pub async fn run<T, F>(&mut self, fun: T) -> Result<(), Error>
    where
        T: FnOnce(RunningInstance) -> F,
        F: Future<Output = ()>,
    {
        let instance = self.start().await?;
        let id = instance.id().to_string();
        let runtime = instance.runtime.clone();

        let result = AssertUnwindSafe(fun(instance)).catch_unwind().await;

        if let Err(err) = runtime.remove(&id).await {
            tracing::warn!(container = %id, error = %err, "failed to remove container");
        }
        self.active.store(false, Ordering::SeqCst);

        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
        Ok(())
    }

    async fn try_start(&self, runtime: &Runtime) -> Result<RunningInstance, Error> {
        runtime.ensure_image(&self.spec.reference()).await?;

        let name = format!("{}-{}", self.spec.handle_or_default(), rand_suffix(8));
        let id = runtime.create(&self.spec, &name).await?;
        tracing::debug!(container = %id, name = %name, "created container");

        let mut instance = RunningInstance {
            id,
            name,
            state: Lifecycle::Created,
            endpoints: HashMap::new(),
            runtime: runtime.clone(),
            active: Arc::clone(&self.active),
        };

        match self.bring_up(runtime, &mut instance).await {
            Ok(()) => {
                instance.state = Lifecycle::Ready;
                tracing::info!(
                    container = %instance.id,
                    image = %self.spec.reference(),
                    "service is ready"
                );
                Ok(instance)
            }
            Err(err) => {
                instance.state = Lifecycle::Failed;
                instance.teardown().await;
                Err(err)
            }
        }
    }

    async fn bring_up(&self, runtime: &Runtime, instance: &mut RunningInstance) -> Result<(), Error> {
        runtime.start(&instance.id).await?;
        instance.state = Lifecycle::Starting;
        instance.endpoints = runtime
            .published_ports(&instance.id, &self.spec.ports)
            .await?;
        self.await_ready(runtime, instance).await
    }

    /// Polls the readiness probe until it succeeds or the deadline elapses.
    ///
    /// The timeout is only reported once the full deadline has passed, and
    /// at most one backoff interval after it.
    async fn await_ready(&self, runtime: &Runtime, instance: &RunningInstance) -> Result<(), Error> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + self.spec.timeout;
        let mut attempt = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::StartupTimeout {
                    timeout: self.spec.timeout,
                });
            }

            // Bound the attempt itself so a hanging probe cannot exceed the
            // overall deadline.
            let probed = tokio::time::timeout(
                remaining,
                self.spec
                    .probe
                    .attempt(runtime, &client, &instance.id, &instance.endpoints),
            )
            .await;

            match probed {
                Ok(Ok(true)) => return Ok(()),
                Ok(Ok(false)) => {
                    tracing::debug!(container = %instance.id, attempt, "service not ready yet")
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(Error::StartupTimeout {
                        timeout: self.spec.timeout,
                    })
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.spec.backoff.delay(attempt).min(remaining)).await;
            attempt += 1;
        }
    }
}

/// The lifecycle state of a [RunningInstance].
///
/// `Stopped` and `Failed` are terminal. An instance is only handed to the
/// caller once it has reached `Ready`; the earlier states are observable
/// only through logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// The container exists but has not been started.
    Created,
    /// The container is running and the readiness probe is being polled.
    Starting,
    /// The readiness probe succeeded; endpoints may be queried.
    Ready,
    /// The instance was torn down.
    Stopped,
    /// The readiness probe never succeeded and the container was removed.
    Failed,
}

/// A live service instance with resolved connection endpoints.
///
/// Owned by exactly one caller. Endpoints are only available while the
/// instance is in the `Ready` state; `stop` releases the container and is
/// safe to call any number of times.
pub struct RunningInstance {
    id: String,
    name: String,
    state: Lifecycle,
    endpoints: HashMap<u16, Endpoint>,
    runtime: Runtime,
    active: Arc<AtomicBool>,
}

impl RunningInstance {
    /// The identifier assigned by the container runtime.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The container name the harness chose for this instance.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// The resolved host address for a declared container port.
    ///
    /// Fails with [Error::UnknownPort] for a port the spec never declared,
    /// regardless of state, and with [Error::NotReady] when the instance is
    /// not in the `Ready` state.
    pub fn endpoint(&self, port: u16) -> Result<&Endpoint, Error> {
        let endpoint = self.endpoints.get(&port).ok_or(Error::UnknownPort(port))?;
        if self.state != Lifecycle::Ready {
            return Err(Error::NotReady);
        }
        Ok(endpoint)
    }

    /// Stops the instance and releases the container and its anonymous
    /// volumes.
    ///
    /// Idempotent: stopping an already stopped instance is a no-op. Runtime
    /// failures during teardown are logged and swallowed so cleanup paths
    /// never mask the primary test outcome.
    pub async fn stop(&mut self) {
        if matches!(self.state, Lifecycle::Stopped | Lifecycle::Failed) {
            return;
        }
        self.teardown().await;
        self.state = Lifecycle::Stopped;
        self.active.store(false, Ordering::SeqCst);
    }

    async fn teardown(&self) {
        if let Err(err) = self.runtime.remove(&self.id).await {
            tracing::warn!(container = %self.id, error = %err, "failed to remove container");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Harness, Lifecycle, RunningInstance};
    use crate::error::Error;
    use crate::probe::ReadinessProbe;
    use crate::runtime::Runtime;
    use crate::spec::{Endpoint, ServiceSpec};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn spec() -> ServiceSpec {
        ServiceSpec::builder()
            .image("redis")
            .ports(vec![6379])
            .probe(ReadinessProbe::tcp(6379))
            .build()
            .unwrap()
    }

    fn instance(state: Lifecycle) -> RunningInstance {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            6379,
            Endpoint {
                host: "localhost".into(),
                port: 49153,
            },
        );
        RunningInstance {
            id: "0123456789ab".into(),
            name: "redis-test".into(),
            state,
            endpoints,
            runtime: Runtime::connect().unwrap(),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    #[test]
    fn test_configure_rejects_invalid_spec() {
        let spec = ServiceSpec::builder().build().unwrap();
        assert!(matches!(
            Harness::configure(spec),
            Err(Error::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_configure_does_not_connect() {
        // Validation only: the runtime connection is deferred to start.
        let harness = Harness::configure(spec()).unwrap();
        assert!(harness.runtime.is_none());
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let mut harness = Harness::configure(spec()).unwrap();
        harness.active.store(true, Ordering::SeqCst);
        assert!(matches!(harness.start().await, Err(Error::AlreadyStarted)));
    }

    #[test]
    fn test_endpoint_on_ready_instance() {
        let instance = instance(Lifecycle::Ready);
        let endpoint = instance.endpoint(6379).unwrap();
        assert_eq!(endpoint.port, 49153);
    }

    #[test]
    fn test_unknown_port_takes_precedence_over_state() {
        let instance = instance(Lifecycle::Stopped);
        assert!(matches!(
            instance.endpoint(9999),
            Err(Error::UnknownPort(9999))
        ));
    }

    #[test]
    fn test_endpoint_after_stop_is_not_ready() {
        let instance = instance(Lifecycle::Stopped);
        assert!(matches!(instance.endpoint(6379), Err(Error::NotReady)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut instance = instance(Lifecycle::Stopped);
        instance.stop().await;
        instance.stop().await;
        assert_eq!(instance.state(), Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn test_stop_clears_the_active_flag() {
        let mut instance = instance(Lifecycle::Ready);
        let active = Arc::clone(&instance.active);
        instance.stop().await;
        assert_eq!(instance.state(), Lifecycle::Stopped);
        assert!(!active.load(Ordering::SeqCst));
    }
}

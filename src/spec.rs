/// Contains types for describing a service to be run by a [Harness][crate::Harness].
use derive_builder::Builder;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::common::rand_suffix;
use crate::error::Error;
use crate::harness::RunningInstance;
use crate::probe::ReadinessProbe;

/// An immutable description of a containerized service.
///
/// A [ServiceSpec] declares everything the harness needs to bring a service
/// up: the image to run, the container ports that must be published, the
/// environment, an optional entrypoint/argument override and the readiness
/// probe that confirms the service accepts traffic. It carries no runtime
/// state and is never mutated after construction.
///
/// Specs are usually produced by a ready-made [Config] implementation from
/// the [servers][crate::servers] module, but can be built directly:
///
/// ```no_run
/// use container_harness::{ReadinessProbe, ServiceSpec};
///
/// let spec = ServiceSpec::builder()
///     .image("nginx")
///     .version("1.25")
///     .ports(vec![80])
///     .probe(ReadinessProbe::http(80, "/"))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Debug, Default, Builder)]
#[builder(default)]
pub struct ServiceSpec {
    /// Arguments passed to the container command.
    #[builder(default = "Vec::new()")]
    pub args: Vec<String>,
    /// Probe retry pacing used while waiting for readiness.
    #[builder(default = "Backoff::default()")]
    pub backoff: Backoff,
    /// Entrypoint override, replacing the image's own.
    #[builder(default)]
    pub entrypoint: Option<Vec<String>>,
    /// Environment variables injected into the container.
    #[builder(default = "HashMap::new()")]
    pub env: HashMap<String, String>,
    /// Logical name used as the container name prefix.
    #[builder(default = "String::new()", setter(into))]
    pub handle: String,
    /// Image reference without the tag, e.g. `oryd/hydra`.
    #[builder(default = "String::new()", setter(into))]
    pub image: String,
    /// Container ports published to ephemeral host ports.
    #[builder(default = "Vec::new()")]
    pub ports: Vec<u16>,
    /// Readiness probe confirming the service accepts traffic.
    #[builder(default = "ReadinessProbe::default()")]
    pub probe: ReadinessProbe,
    /// Deadline for the service to become ready.
    #[builder(default = "Duration::from_secs(30)")]
    pub timeout: Duration,
    /// Image tag.
    #[builder(default = "String::from(\"latest\")", setter(into))]
    pub version: String,
}

impl ServiceSpec {
    pub fn builder() -> ServiceSpecBuilder {
        ServiceSpecBuilder::default()
    }

    /// The full image reference in the form of {image}:{version}.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.version)
    }

    /// Checks that the spec is well-formed.
    ///
    /// A spec must name an image, declare at least one port and carry a
    /// probe that refers only to declared ports. Validation performs no
    /// external calls.
    pub fn validate(&self) -> Result<(), Error> {
        if self.image.is_empty() {
            return Err(Error::InvalidSpec("image reference is empty".into()));
        }
        if self.version.is_empty() {
            return Err(Error::InvalidSpec("image version is empty".into()));
        }
        if self.ports.is_empty() {
            return Err(Error::InvalidSpec(
                "at least one container port must be exposed".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidSpec("startup timeout is zero".into()));
        }
        self.probe.validate(&self.ports)?;
        self.backoff.validate()?;
        Ok(())
    }

    /// The handle this spec was configured with, or a name derived from the
    /// image when none was set.
    pub(crate) fn handle_or_default(&self) -> String {
        if self.handle.is_empty() {
            sanitize(&self.image)
        } else {
            self.handle.clone()
        }
    }
}

/// Pacing of readiness probe attempts.
///
/// The delay before attempt `n` is `initial * multiplier^n`, capped at
/// `max`. A multiplier of `1.0` gives a fixed interval.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Backoff {
    /// A fixed interval between probe attempts.
    pub const fn fixed(interval: Duration) -> Self {
        Backoff {
            initial: interval,
            multiplier: 1.0,
            max: interval,
        }
    }

    /// An exponential schedule doubling from `initial` up to `max`.
    pub const fn exponential(initial: Duration, max: Duration) -> Self {
        Backoff {
            initial,
            multiplier: 2.0,
            max,
        }
    }

    /// The delay to wait before the given zero-based attempt.
    ///
    /// Saturates at `max`: a schedule that overflows or is not finite never
    /// panics, it pins to the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(32) as i32);
        let secs = self.initial.as_secs_f64() * factor;
        if secs.is_finite() && secs < self.max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.initial.is_zero() {
            return Err(Error::InvalidSpec("backoff interval is zero".into()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::InvalidSpec(
                "backoff multiplier must be a finite value of at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::fixed(Duration::from_millis(250))
    }
}

/// A host-reachable address for one published container port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// The address in the form of {host}:{port}.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The address as an HTTP URL.
    pub fn http_url(&self) -> String {
        format!("http://{}", self.address())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A configuration which produces a [ServiceSpec].
///
/// Each ready-made service in [servers][crate::servers] has an associated
/// config type implementing this trait. The config holds the user-tunable
/// knobs; `into_spec` freezes them into the immutable spec handed to a
/// [Harness][crate::Harness].
pub trait Config: Clone {
    /// Consumes the config, producing the spec to run.
    fn into_spec(self) -> ServiceSpec;
}

/// A typed accessor for a running service.
///
/// Implementations pair with a [Config] and translate the raw endpoints of
/// a [RunningInstance] into service-specific addresses and URLs.
pub trait Server: Sized {
    type Config: Config;

    /// Builds the accessor from a ready instance.
    ///
    /// Fails with [Error::NotReady] if the instance has not reached the
    /// `Ready` state.
    fn new(config: &Self::Config, instance: &RunningInstance) -> Result<Self, Error>;
}

/// Generates a unique handle for the given image name.
///
/// Slashes and colons are replaced so the result is usable as a container
/// name prefix.
pub fn new_handle(image: &str) -> String {
    format!("{}-{}", sanitize(image), rand_suffix(10))
}

fn sanitize(image: &str) -> String {
    image
        .chars()
        .map(|c| match c {
            '/' | ':' | '@' => '-',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{new_handle, Backoff, Endpoint, ServiceSpec};
    use crate::error::Error;
    use crate::probe::{MessageSource, ReadinessProbe};
    use std::time::Duration;

    fn valid_spec() -> ServiceSpec {
        ServiceSpec::builder()
            .image("nginx")
            .ports(vec![80])
            .probe(ReadinessProbe::tcp(80))
            .build()
            .unwrap()
    }

    #[test]
    fn test_valid_spec_passes() {
        assert!(valid_spec().validate().is_ok());
    }

    #[test]
    fn test_empty_image_rejected() {
        let spec = ServiceSpec::builder().ports(vec![80]).build().unwrap();
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn test_no_ports_rejected() {
        let spec = ServiceSpec::builder().image("nginx").build().unwrap();
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn test_probe_on_undeclared_port_rejected() {
        let mut spec = valid_spec();
        spec.probe = ReadinessProbe::http(8080, "/health");
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn test_relative_probe_path_rejected() {
        let mut spec = valid_spec();
        spec.probe = ReadinessProbe::http(80, "health");
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn test_empty_log_message_rejected() {
        let mut spec = valid_spec();
        spec.probe = ReadinessProbe::message("", MessageSource::Stdout);
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut spec = valid_spec();
        spec.timeout = Duration::ZERO;
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn test_reference() {
        let mut spec = valid_spec();
        spec.version = "1.25".into();
        assert_eq!(spec.reference(), "nginx:1.25");
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::fixed(Duration::from_millis(100));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(7), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let backoff = Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(10), Duration::from_secs(1));
    }

    #[test]
    fn test_nan_multiplier_rejected() {
        let mut spec = valid_spec();
        spec.backoff = Backoff {
            initial: Duration::from_millis(100),
            multiplier: f64::NAN,
            max: Duration::from_secs(1),
        };
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn test_oversized_backoff_saturates_at_max() {
        let huge = Backoff {
            initial: Duration::from_millis(100),
            multiplier: 1e300,
            max: Duration::from_secs(1),
        };
        assert_eq!(huge.delay(2), Duration::from_secs(1));

        let infinite = Backoff {
            initial: Duration::from_millis(100),
            multiplier: f64::INFINITY,
            max: Duration::from_secs(1),
        };
        assert_eq!(infinite.delay(1), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_multiplier_below_one_rejected() {
        let mut spec = valid_spec();
        spec.backoff = Backoff {
            initial: Duration::from_millis(100),
            multiplier: 0.5,
            max: Duration::from_secs(1),
        };
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn test_new_handle_sanitizes() {
        let handle = new_handle("oryd/hydra:v2");
        assert!(handle.starts_with("oryd-hydra-v2-"));
        assert!(!handle.contains('/'));
        assert!(!handle.contains(':'));
    }

    #[test]
    fn test_new_handle_unique() {
        assert_ne!(new_handle("redis"), new_handle("redis"));
    }

    #[test]
    fn test_endpoint_formatting() {
        let endpoint = Endpoint {
            host: "localhost".into(),
            port: 4444,
        };
        assert_eq!(endpoint.address(), "localhost:4444");
        assert_eq!(endpoint.http_url(), "http://localhost:4444");
        assert_eq!(endpoint.to_string(), "localhost:4444");
    }
}

use crate::probe::{MessageSource, ReadinessProbe};
use crate::{Config, Error, RunningInstance, Server, ServiceSpec};
use derive_builder::Builder;
use std::collections::HashMap;
use std::time::Duration;

const IMAGE: &str = "redis";
const PORT: u16 = 6379;
const LOG_MSG: &str = "Ready to accept connections tcp";

/// Configuration for creating a Redis server.
///
/// The server listens on port 6379 inside the container; the harness
/// publishes it to an ephemeral host port which can be read from the
/// [RedisServer] accessor once the instance is ready.
///
/// See the [DockerHub](https://hub.docker.com/_/redis) repo for more
/// information on the arguments and environment variables that can be used
/// to configure the server.
#[derive(Clone, Default, Builder)]
#[builder(default)]
pub struct RedisServerConfig {
    #[builder(default = "Vec::new()")]
    pub args: Vec<String>,
    #[builder(default = "HashMap::new()")]
    pub env: HashMap<String, String>,
    #[builder(default = "crate::spec::new_handle(IMAGE)")]
    pub handle: String,
    #[builder(default = "15")]
    pub timeout: u16,
    #[builder(default = "String::from(\"latest\")", setter(into))]
    pub version: String,
}

impl RedisServerConfig {
    pub fn builder() -> RedisServerConfigBuilder {
        RedisServerConfigBuilder::default()
    }
}

impl Config for RedisServerConfig {
    fn into_spec(self) -> ServiceSpec {
        ServiceSpec {
            args: self.args,
            backoff: Default::default(),
            entrypoint: None,
            env: self.env,
            handle: self.handle,
            image: IMAGE.into(),
            ports: vec![PORT],
            probe: ReadinessProbe::message(LOG_MSG, MessageSource::Stdout),
            timeout: Duration::from_secs(self.timeout.into()),
            version: self.version,
        }
    }
}

/// A running instance of a Redis server.
pub struct RedisServer {
    pub host: String,
    pub port: u16,
}

impl RedisServer {
    /// The address in the form of {host}:{port}.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The redis URL.
    pub fn url(&self) -> String {
        format!("redis://{}", self.address())
    }
}

impl Server for RedisServer {
    type Config = RedisServerConfig;

    fn new(_config: &Self::Config, instance: &RunningInstance) -> Result<Self, Error> {
        let endpoint = instance.endpoint(PORT)?;
        Ok(RedisServer {
            host: endpoint.host.clone(),
            port: endpoint.port,
        })
    }
}

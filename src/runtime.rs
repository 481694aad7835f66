/// Contains the adapter over the container runtime API.
///
/// The harness never talks to the Docker Engine API directly; this module
/// wraps the handful of operations it needs (pull, create, start, inspect,
/// logs, remove) behind [Runtime]. Lifecycle policy lives in
/// [harness][crate::harness], parameter wiring lives here.
use std::collections::HashMap;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, PortBinding};
use bollard::Docker;
use futures::TryStreamExt;

use crate::error::Error;
use crate::probe::{frame_payload, MessageSource};
use crate::spec::{Endpoint, ServiceSpec};

/// Host used for all published endpoints.
const LOCAL_HOST: &str = "localhost";

/// A handle to the local container runtime.
///
/// Cloning is cheap; all clones share one connection pool.
#[derive(Clone)]
pub struct Runtime {
    docker: Docker,
}

impl Runtime {
    /// Connects to the local runtime using the standard environment
    /// (`DOCKER_HOST` or the platform default socket).
    pub fn connect() -> Result<Self, Error> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Runtime { docker })
    }

    /// Pulls the image if it is not already present locally.
    pub async fn ensure_image(&self, reference: &str) -> Result<(), Error> {
        if self.docker.inspect_image(reference).await.is_ok() {
            return Ok(());
        }

        tracing::info!(image = reference, "pulling image");
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while pull.try_next().await?.is_some() {}
        Ok(())
    }

    /// Creates a container from the spec under the given name.
    ///
    /// Every declared port is published to an ephemeral host port so that
    /// concurrent instances of the same spec never collide.
    pub async fn create(&self, spec: &ServiceSpec, name: &str) -> Result<String, Error> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.ports {
            let key = format!("{}/tcp", port);
            exposed_ports.insert(key.clone(), HashMap::new());
            // An empty host port requests an ephemeral one.
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: None,
                }]),
            );
        }

        let config = ContainerConfig {
            image: Some(spec.reference()),
            env: Some(env),
            cmd: if spec.args.is_empty() {
                None
            } else {
                Some(spec.args.clone())
            },
            entrypoint: spec.entrypoint.clone(),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let created = self.docker.create_container(Some(options), config).await?;
        Ok(created.id)
    }

    /// Starts a created container.
    pub async fn start(&self, id: &str) -> Result<(), Error> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    /// Resolves the host endpoint for each declared container port.
    pub async fn published_ports(
        &self,
        id: &str,
        declared: &[u16],
    ) -> Result<HashMap<u16, Endpoint>, Error> {
        let inspected = self.docker.inspect_container(id, None).await?;
        let ports = inspected
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();

        let mut endpoints = HashMap::new();
        for port in declared {
            let key = format!("{}/tcp", port);
            let host_port = ports
                .get(&key)
                .and_then(|bindings| bindings.as_ref())
                .and_then(|bindings| {
                    bindings
                        .iter()
                        .find_map(|b| b.host_port.as_deref().and_then(|p| p.parse::<u16>().ok()))
                })
                .ok_or(Error::NotPublished(*port))?;
            endpoints.insert(
                *port,
                Endpoint {
                    host: LOCAL_HOST.to_string(),
                    port: host_port,
                },
            );
        }
        Ok(endpoints)
    }

    /// Fetches the container output for the given stream as a single string.
    pub async fn logs(&self, id: &str, source: MessageSource) -> Result<String, Error> {
        let options = LogsOptions::<String> {
            stdout: source == MessageSource::Stdout,
            stderr: source == MessageSource::Stderr,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut output = String::new();
        let mut stream = self.docker.logs(id, Some(options));
        while let Some(frame) = stream.try_next().await? {
            if let Some(payload) = frame_payload(&frame, source) {
                output.push_str(&String::from_utf8_lossy(payload));
            }
        }
        Ok(output)
    }

    /// Force-removes a container together with its anonymous volumes.
    pub async fn remove(&self, id: &str) -> Result<(), Error> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }
}

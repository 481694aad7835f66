/// Contains readiness probes and their evaluation logic.
use std::collections::HashMap;

use bollard::container::LogOutput;

use crate::error::Error;
use crate::runtime::Runtime;
use crate::spec::Endpoint;

/// A check repeated until it confirms the service accepts traffic.
///
/// Probes describe *what* readiness means for a service; the harness
/// decides how often to run them. A single attempt either succeeds, reports
/// "not yet" (the attempt is retried after a backoff delay), or surfaces a
/// runtime-level failure which aborts the startup.
#[derive(Clone, Debug)]
pub enum ReadinessProbe {
    /// An HTTP GET against a published port must return the given status.
    Http {
        /// Container port the request is sent to.
        port: u16,
        /// Absolute request path, e.g. `/health/ready`.
        path: String,
        /// Expected response status code.
        status: u16,
    },
    /// A TCP connection to a published port must succeed.
    Tcp {
        /// Container port the connection is made to.
        port: u16,
    },
    /// A line containing the given message must appear in the container
    /// output.
    Message {
        /// Substring searched for in the log stream.
        message: String,
        /// Which output stream is searched.
        source: MessageSource,
    },
}

/// The container output stream a [ReadinessProbe::Message] searches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageSource {
    Stdout,
    Stderr,
}

impl ReadinessProbe {
    /// An HTTP probe expecting status 200.
    pub fn http(port: u16, path: impl Into<String>) -> Self {
        ReadinessProbe::Http {
            port,
            path: path.into(),
            status: 200,
        }
    }

    /// A TCP connect probe.
    pub fn tcp(port: u16) -> Self {
        ReadinessProbe::Tcp { port }
    }

    /// A log message probe.
    pub fn message(message: impl Into<String>, source: MessageSource) -> Self {
        ReadinessProbe::Message {
            message: message.into(),
            source,
        }
    }

    pub(crate) fn validate(&self, ports: &[u16]) -> Result<(), Error> {
        match self {
            ReadinessProbe::Http { port, path, .. } => {
                if !ports.contains(port) {
                    return Err(Error::InvalidSpec(format!(
                        "http probe targets undeclared port {}",
                        port
                    )));
                }
                if !path.starts_with('/') {
                    return Err(Error::InvalidSpec(format!(
                        "http probe path {:?} is not absolute",
                        path
                    )));
                }
            }
            ReadinessProbe::Tcp { port } => {
                if !ports.contains(port) {
                    return Err(Error::InvalidSpec(format!(
                        "tcp probe targets undeclared port {}",
                        port
                    )));
                }
            }
            ReadinessProbe::Message { message, .. } => {
                if message.is_empty() {
                    return Err(Error::InvalidSpec("log probe message is empty".into()));
                }
            }
        }
        Ok(())
    }

    /// Runs a single probe attempt against a started container.
    ///
    /// Returns `Ok(true)` when the service is ready, `Ok(false)` when the
    /// attempt should be retried and `Err` on a runtime-level failure.
    pub(crate) async fn attempt(
        &self,
        runtime: &Runtime,
        client: &reqwest::Client,
        id: &str,
        endpoints: &HashMap<u16, Endpoint>,
    ) -> Result<bool, Error> {
        match self {
            ReadinessProbe::Http { port, path, status } => {
                // Endpoint presence is guaranteed by spec validation.
                let endpoint = endpoints.get(port).ok_or(Error::UnknownPort(*port))?;
                let url = format!("{}{}", endpoint.http_url(), path);
                match client.get(&url).send().await {
                    Ok(resp) => Ok(resp.status().as_u16() == *status),
                    Err(_) => Ok(false),
                }
            }
            ReadinessProbe::Tcp { port } => {
                let endpoint = endpoints.get(port).ok_or(Error::UnknownPort(*port))?;
                let connect =
                    tokio::net::TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await;
                Ok(connect.is_ok())
            }
            ReadinessProbe::Message { message, source } => {
                let output = runtime.logs(id, *source).await?;
                Ok(output.contains(message))
            }
        }
    }
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        ReadinessProbe::Tcp { port: 0 }
    }
}

/// Extracts the payload of a log frame if it belongs to the given source.
pub(crate) fn frame_payload(frame: &LogOutput, source: MessageSource) -> Option<&[u8]> {
    match (frame, source) {
        (LogOutput::StdOut { message }, MessageSource::Stdout) => Some(message.as_ref()),
        (LogOutput::StdErr { message }, MessageSource::Stderr) => Some(message.as_ref()),
        // Containers started without a TTY multiplex both streams; consoles
        // carry everything.
        (LogOutput::Console { message }, _) => Some(message.as_ref()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{frame_payload, MessageSource, ReadinessProbe};
    use crate::error::Error;
    use bollard::container::LogOutput;

    #[test]
    fn test_http_probe_defaults_to_200() {
        match ReadinessProbe::http(4445, "/health/ready") {
            ReadinessProbe::Http { port, path, status } => {
                assert_eq!(port, 4445);
                assert_eq!(path, "/health/ready");
                assert_eq!(status, 200);
            }
            _ => panic!("expected http probe"),
        }
    }

    #[test]
    fn test_validate_checks_declared_ports() {
        let probe = ReadinessProbe::tcp(6379);
        assert!(probe.validate(&[6379]).is_ok());
        assert!(matches!(
            probe.validate(&[5432]),
            Err(Error::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_frame_payload_matches_source() {
        let stdout = LogOutput::StdOut {
            message: Vec::from("ready to accept connections").into(),
        };
        let stderr = LogOutput::StdErr {
            message: Vec::from("some warning").into(),
        };

        assert!(frame_payload(&stdout, MessageSource::Stdout).is_some());
        assert!(frame_payload(&stdout, MessageSource::Stderr).is_none());
        assert!(frame_payload(&stderr, MessageSource::Stderr).is_some());
        assert!(frame_payload(&stderr, MessageSource::Stdout).is_none());
    }

    #[test]
    fn test_console_frames_match_either_source() {
        let console = LogOutput::Console {
            message: Vec::from("ready").into(),
        };
        assert!(frame_payload(&console, MessageSource::Stdout).is_some());
        assert!(frame_payload(&console, MessageSource::Stderr).is_some());
    }
}

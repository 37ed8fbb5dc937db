//! Caller side of the tool protocol.

use std::{
    ffi::OsStr,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::Mutex,
};
use tracing::{debug, info, instrument, warn};

use super::message::{ReadyLine, RequestId, ToolCall, ToolDescriptor, ToolResponse};
use super::transport::{JsonlTransport, TransportError};
use crate::{
    CandidateSet, Location, SearchQuery, UnitSystem, WeatherError, WeatherSnapshot,
    scheduler::WeatherTool,
};

/// How long a child gets to exit on its own after its stdin is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Issues tool requests over one transport, one at a time.
pub struct ToolClient<R, W> {
    transport: Mutex<JsonlTransport<R, W>>,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl<R, W> ToolClient<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wait for the readiness line, then hand back a usable client.
    pub async fn connect(
        reader: R,
        writer: W,
        readiness_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<(Self, ReadyLine), WeatherError> {
        let mut transport = JsonlTransport::new(reader, writer);

        let ready = match tokio::time::timeout(readiness_timeout, transport.read_frame::<ReadyLine>())
            .await
        {
            Err(_) => {
                return Err(WeatherError::TransportClosed(format!(
                    "server did not become ready within {}s",
                    readiness_timeout.as_secs()
                )));
            }
            Ok(Ok(Some(ready))) if ready.ready => ready,
            Ok(Ok(Some(_))) => {
                return Err(WeatherError::TransportClosed(
                    "server reported it is not ready".to_string(),
                ));
            }
            Ok(Ok(None)) => {
                return Err(WeatherError::TransportClosed(
                    "server exited before becoming ready".to_string(),
                ));
            }
            Ok(Err(err)) => {
                return Err(WeatherError::TransportClosed(format!(
                    "unexpected readiness line: {err}"
                )));
            }
        };
        info!(server = %ready.server, version = %ready.version, "tool server is ready");

        let client = Self {
            transport: Mutex::new(transport),
            next_id: AtomicU64::new(1),
            request_timeout,
        };
        Ok((client, ready))
    }

    /// Send one call and wait for the response carrying its id.
    ///
    /// Lines with other ids are late answers to requests that already timed
    /// out and are skipped.
    #[instrument(skip(self, call), fields(tool = call.name()))]
    pub async fn call(&self, call: &ToolCall) -> Result<Value, WeatherError> {
        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = call.to_request(id.clone());

        let mut transport = self.transport.lock().await;
        transport.write_frame(&request).await.map_err(closed)?;

        let exchange = async {
            loop {
                let response = match transport.read_frame::<ToolResponse>().await {
                    Ok(Some(response)) => response,
                    Ok(None) => {
                        return Err(WeatherError::TransportClosed(
                            "server closed its output".to_string(),
                        ));
                    }
                    Err(TransportError::Parse(err)) => {
                        return Err(WeatherError::UpstreamProtocol(format!(
                            "unreadable response line: {err}"
                        )));
                    }
                    Err(err) => return Err(closed(err)),
                };

                match response.id.clone() {
                    Some(got) if got == id => return response.into_result(),
                    Some(got) => debug!(expected = %id, got = %got, "discarding stale response"),
                    None => {
                        let message = response
                            .error
                            .map(|e| e.message)
                            .unwrap_or_else(|| "server rejected the request stream".to_string());
                        return Err(WeatherError::TransportClosed(message));
                    }
                }
            }
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(id = %id, "request timed out");
                Err(WeatherError::UpstreamUnavailable(format!(
                    "no response to '{}' within {}s",
                    call.name(),
                    self.request_timeout.as_secs()
                )))
            }
        }
    }

    pub async fn search_city(&self, query: &str) -> Result<CandidateSet, WeatherError> {
        let call = ToolCall::SearchCity {
            query: SearchQuery::new(query)?,
        };
        decode(self.call(&call).await?)
    }

    pub async fn get_weather(
        &self,
        location: &Location,
        unit_system: UnitSystem,
    ) -> Result<WeatherSnapshot, WeatherError> {
        let call = ToolCall::GetWeather {
            location: location.clone(),
            unit_system,
        };
        decode(self.call(&call).await?)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, WeatherError> {
        decode(self.call(&ToolCall::ListTools).await?)
    }

    /// Close the write side so the server sees EOF.
    pub async fn close(&self) {
        let mut transport = self.transport.lock().await;
        if let Err(err) = transport.close_writer().await {
            debug!(error = %err, "closing request stream failed");
        }
    }
}

#[async_trait]
impl<R, W> WeatherTool for ToolClient<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn get_weather(
        &self,
        location: &Location,
        unit_system: UnitSystem,
    ) -> Result<WeatherSnapshot, WeatherError> {
        ToolClient::get_weather(self, location, unit_system).await
    }
}

fn closed(err: TransportError) -> WeatherError {
    WeatherError::TransportClosed(err.to_string())
}

/// Payloads that fail to decode (including a forecast without 24 points)
/// are the server's fault, never the caller's.
fn decode<T: DeserializeOwned>(value: Value) -> Result<T, WeatherError> {
    serde_json::from_value(value)
        .map_err(|e| WeatherError::UpstreamDataShape(format!("unexpected result payload: {e}")))
}

pub type ProcessClient = ToolClient<BufReader<ChildStdout>, ChildStdin>;

/// A tool server running as a child process, talking over its stdio.
pub struct ServerProcess {
    child: Child,
    client: Arc<ProcessClient>,
    ready: ReadyLine,
}

impl ServerProcess {
    /// Start `program args..` and wait until it announces readiness.
    pub async fn spawn<I, S>(
        program: &OsStr,
        args: I,
        readiness_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, WeatherError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WeatherError::TransportClosed(format!(
                    "failed to start {}: {e}",
                    program.to_string_lossy()
                ))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            WeatherError::TransportClosed("child stdin was not captured".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            WeatherError::TransportClosed("child stdout was not captured".to_string())
        })?;

        let (client, ready) = ToolClient::connect(
            BufReader::new(stdout),
            stdin,
            readiness_timeout,
            request_timeout,
        )
        .await?;

        Ok(Self {
            child,
            client: Arc::new(client),
            ready,
        })
    }

    pub fn client(&self) -> Arc<ProcessClient> {
        self.client.clone()
    }

    pub fn ready(&self) -> &ReadyLine {
        &self.ready
    }

    /// Close stdin, give the child a grace period, then kill it.
    pub async fn shutdown(mut self) {
        self.client.close().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => info!(%status, "tool server exited"),
            Ok(Err(err)) => warn!(error = %err, "waiting for tool server failed"),
            Err(_) => {
                warn!("tool server did not exit in time; killing it");
                if let Err(err) = self.child.kill().await {
                    warn!(error = %err, "failed to kill tool server");
                }
            }
        }
    }
}

//! Tool server main loop.
//!
//! Reads one request, answers it, then reads the next. Shutdown is only
//! observed between requests so an in-flight answer is always written.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::message::{ReadyLine, ToolCall, ToolRequest, ToolResponse, tool_catalog};
use super::transport::{JsonlTransport, TransportError};
use crate::{
    WeatherError,
    provider::{Geocoder, WeatherFetcher},
};

/// Errors that end the server loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed request frame: {0}")]
    MalformedFrame(String),
    #[error("startup self-check failed: {0}")]
    SelfCheck(WeatherError),
}

pub struct ToolServer<R, W> {
    transport: JsonlTransport<R, W>,
    geocoder: Arc<dyn Geocoder>,
    fetcher: Arc<dyn WeatherFetcher>,
    shutdown: CancellationToken,
}

impl<R: AsyncBufRead + Unpin, W: AsyncWrite + Unpin> ToolServer<R, W> {
    pub fn new(
        reader: R,
        writer: W,
        geocoder: Arc<dyn Geocoder>,
        fetcher: Arc<dyn WeatherFetcher>,
    ) -> Self {
        Self {
            transport: JsonlTransport::new(reader, writer),
            geocoder,
            fetcher,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the loop before the next read.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Probe both upstream services. Nothing is written on failure.
    pub async fn self_check(&self) -> Result<(), ServerError> {
        self.geocoder
            .health_check()
            .await
            .map_err(ServerError::SelfCheck)?;
        self.fetcher
            .health_check()
            .await
            .map_err(ServerError::SelfCheck)?;
        info!("upstream self-check passed");
        Ok(())
    }

    pub async fn announce_ready(&mut self) -> Result<(), ServerError> {
        let ready = ReadyLine::current();
        self.transport.write_frame(&ready).await?;
        info!(version = %ready.version, "tool server ready");
        Ok(())
    }

    /// Serve requests until EOF or shutdown.
    ///
    /// A line that is not a request frame gets one error line with a null id,
    /// then the loop ends with [`ServerError::MalformedFrame`].
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let mut served: u64 = 0;
        loop {
            let line = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!(served, "shutdown requested");
                    break;
                }
                line = self.transport.read_line() => line?,
            };

            let Some(line) = line else {
                info!(served, "input closed");
                break;
            };

            let request: ToolRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "malformed request frame");
                    let failure = WeatherError::InvalidRequest(format!(
                        "malformed request frame: {err}"
                    ));
                    self.transport
                        .write_frame(&ToolResponse::failure(None, &failure))
                        .await?;
                    return Err(ServerError::MalformedFrame(err.to_string()));
                }
            };

            let response = self.handle(request).await;
            self.transport.write_frame(&response).await?;
            served += 1;
        }
        Ok(())
    }

    /// Answer a single request. Never fails; failures become error responses.
    #[instrument(skip(self, request), fields(id = %request.id, tool = %request.tool))]
    pub async fn handle(&self, request: ToolRequest) -> ToolResponse {
        let outcome = match ToolCall::from_request(&request) {
            Ok(call) => self.dispatch(call).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(result) => {
                debug!("tool succeeded");
                ToolResponse::success(request.id, result)
            }
            Err(err) => {
                warn!(kind = %err.kind(), error = %err.message(), "tool failed");
                ToolResponse::failure(Some(request.id), &err)
            }
        }
    }

    pub async fn dispatch(&self, call: ToolCall) -> Result<Value, WeatherError> {
        match call {
            ToolCall::SearchCity { query } => {
                let candidates = self.geocoder.search(&query).await?;
                info!(query = %query, matches = candidates.len(), "search_city");
                encode(&candidates)
            }
            ToolCall::GetWeather {
                location,
                unit_system,
            } => {
                let snapshot = self.fetcher.fetch(&location).await?;
                info!(location = %location.label(), unit = %unit_system, "get_weather");
                encode(&snapshot.to_unit_system(unit_system))
            }
            ToolCall::ListTools => encode(&tool_catalog()),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, WeatherError> {
    serde_json::to_value(value)
        .map_err(|e| WeatherError::UpstreamProtocol(format!("failed to encode result: {e}")))
}

/// Serve on stdin/stdout until EOF or Ctrl-C.
pub async fn serve_stdio(
    geocoder: Arc<dyn Geocoder>,
    fetcher: Arc<dyn WeatherFetcher>,
    self_check: bool,
) -> Result<(), ServerError> {
    let reader = BufReader::new(tokio::io::stdin());
    let mut server = ToolServer::new(reader, tokio::io::stdout(), geocoder, fetcher);

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            shutdown.cancel();
        }
    });

    if self_check {
        server.self_check().await?;
    }
    server.announce_ready().await?;
    server.run().await
}

//! HTTP proxy with recording and replay

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{Config, Mode};
use crate::replay::ReplayStats;
use crate::storage::{SerializableRequest, SerializableResponse};
use crate::{ReelError, Result};

use super::session::Session;

/// Proxy that answers requests through the active session
pub struct VcrProxy {
    config: Arc<Config>,
    session: Session,
}

impl VcrProxy {
    /// Start the session described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be started
    pub fn start(config: Arc<Config>) -> Result<Self> {
        let session = Session::start(&config)?;
        Ok(Self { config, session })
    }

    /// Configuration the proxy was started with
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mode of the active session
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.session.mode()
    }

    /// Handle an HTTP request in record or replay mode
    ///
    /// # Errors
    ///
    /// Record: `RecorderClosed`, `UpstreamUnavailable`, `DataTooLarge` or a write
    /// failure. Replay: `NoMatch` or `Exhausted`.
    pub async fn handle_request(&self, request: SerializableRequest) -> Result<SerializableResponse> {
        match &self.session {
            Session::Record { recorder, upstream } => {
                debug!("Record mode: {} {}", request.method, request.uri);

                if recorder.is_closed() {
                    return Err(ReelError::RecorderClosed);
                }

                let response = upstream.fetch(&request).await?;
                recorder.append(request, response.clone()).await?;
                Ok(response)
            }
            Session::Replay { replayer } => {
                debug!("Replay mode: {} {}", request.method, request.uri);
                replayer.resolve(&request)
            }
        }
    }

    /// Close the recorder, returning the number of interactions written
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` in replay mode, or the flush error
    pub async fn stop_recording(&self) -> Result<u64> {
        match &self.session {
            Session::Record { recorder, .. } => {
                recorder.close().await?;
                Ok(recorder.interactions_written())
            }
            Session::Replay { .. } => Err(ReelError::ConfigError("not recording".to_string())),
        }
    }

    /// Finalize recording (if in record mode)
    ///
    /// # Errors
    ///
    /// Returns error if finalization fails
    pub async fn finalize(&self) -> Result<()> {
        if let Session::Record { recorder, .. } = &self.session {
            info!("Finalizing recording session");
            recorder.close().await?;
        }
        Ok(())
    }

    /// Interactions recorded so far (record mode only)
    #[must_use]
    pub fn interactions_recorded(&self) -> Option<u64> {
        match &self.session {
            Session::Record { recorder, .. } => Some(recorder.interactions_written()),
            Session::Replay { .. } => None,
        }
    }

    /// Replay statistics (replay mode only)
    #[must_use]
    pub fn replay_stats(&self) -> Option<ReplayStats> {
        match &self.session {
            Session::Replay { replayer } => Some(replayer.stats()),
            Session::Record { .. } => None,
        }
    }
}

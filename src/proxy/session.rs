//! The record or replay session behind a proxy

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, Mode};
use crate::network::UpstreamClient;
use crate::recording::Recorder;
use crate::replay::{build_comparator, Replayer};
use crate::Result;

/// Exactly one of a recorder or a replayer, chosen once at startup
pub enum Session {
    /// Forward to the origin and append every interaction
    Record {
        /// Cassette being written
        recorder: Arc<Recorder>,
        /// Client for the remote origin
        upstream: UpstreamClient,
    },
    /// Serve from a loaded cassette
    Replay {
        /// Cassette being served
        replayer: Arc<Replayer>,
    },
}

impl Session {
    /// Start the session selected by `config.mode`
    ///
    /// # Errors
    ///
    /// Record: the cassette cannot be created or no origin is configured.
    /// Replay: the cassette is missing or malformed.
    pub fn start(config: &Config) -> Result<Self> {
        match config.mode {
            Mode::Record => {
                let upstream = UpstreamClient::new(config)?;
                let recorder = Recorder::create(&config.cassette)?;
                info!(
                    "Record session: {} -> {}",
                    config.cassette.display(),
                    upstream.base_url()
                );
                Ok(Self::Record {
                    recorder: Arc::new(recorder),
                    upstream,
                })
            }
            Mode::Replay => {
                let replayer = Replayer::load(&config.cassette, build_comparator(&config.replay))?;
                info!("Replay session: {}", config.cassette.display());
                Ok(Self::Replay {
                    replayer: Arc::new(replayer),
                })
            }
        }
    }

    /// Mode of this session
    #[must_use]
    pub fn mode(&self) -> Mode {
        match self {
            Self::Record { .. } => Mode::Record,
            Self::Replay { .. } => Mode::Replay,
        }
    }
}

//! Recorder: serialized, durable appends to one cassette

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info};

use crate::fingerprint::{fingerprint_request, short_hex};
use crate::storage::{CassetteWriter, Interaction, SerializableRequest, SerializableResponse};
use crate::{ReelError, Result};

/// State shared with the blocking file tasks
struct Shared {
    writer: Mutex<Option<CassetteWriter>>,
    closed: AtomicBool,
    interactions_written: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Option<CassetteWriter>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, interaction: &Interaction) -> Result<u64> {
        let mut writer_guard = self.lock();
        let writer = writer_guard.as_mut().ok_or(ReelError::RecorderClosed)?;

        if let Err(e) = writer.append(interaction) {
            error!(
                "Cassette write failed, recording stopped after {} interactions: {}",
                writer.interaction_count(),
                e
            );
            writer_guard.take();
            self.closed.store(true, Ordering::Release);
            return Err(e);
        }

        let position = writer.interaction_count();
        self.interactions_written.store(position, Ordering::Release);
        Ok(position)
    }

    fn close(&self) -> Result<bool> {
        let mut writer_guard = self.lock();
        self.closed.store(true, Ordering::Release);

        match writer_guard.take() {
            Some(writer) => writer.finalize().map(|()| true),
            None => Ok(false),
        }
    }
}

/// Appends interactions to a cassette for the lifetime of a record session
///
/// File I/O runs on the blocking pool. Once started, an append completes even
/// if the caller stops waiting for it.
pub struct Recorder {
    path: PathBuf,
    shared: Arc<Shared>,
}

impl Recorder {
    /// Start a recording at `path`, discarding any previous cassette there
    ///
    /// # Errors
    ///
    /// Returns error if the old cassette cannot be removed or the new one created
    pub fn create(path: &Path) -> Result<Self> {
        let writer = CassetteWriter::create(path)?;

        info!("Recording to cassette {}", path.display());

        Ok(Self::with_writer(path, writer))
    }

    fn with_writer(path: &Path, writer: CassetteWriter) -> Self {
        Self {
            path: path.to_path_buf(),
            shared: Arc::new(Shared {
                writer: Mutex::new(Some(writer)),
                closed: AtomicBool::new(false),
                interactions_written: AtomicU64::new(0),
            }),
        }
    }

    /// Append one interaction, returning its 1-based position in the cassette
    ///
    /// Concurrent callers are serialized; the record is on disk when this returns.
    /// A failed write closes the recorder.
    ///
    /// # Errors
    ///
    /// Returns `RecorderClosed` after [`Recorder::close`] or an earlier failed
    /// write, or the write error itself
    pub async fn append(
        &self,
        request: SerializableRequest,
        response: SerializableResponse,
    ) -> Result<u64> {
        let interaction = Interaction { request, response };
        let shared = Arc::clone(&self.shared);

        let (result, interaction) = tokio::task::spawn_blocking(move || {
            let result = shared.append(&interaction);
            (result, interaction)
        })
        .await
        .map_err(|e| ReelError::Other(format!("Recorder task failed: {e}")))?;
        let position = result?;

        debug!(
            "Recorded interaction #{}: {} {} -> {} ({})",
            position,
            interaction.request.method,
            interaction.request.uri,
            interaction.response.status,
            short_hex(&fingerprint_request(&interaction.request, &[]))
        );

        Ok(position)
    }

    /// Flush and close the cassette; later appends fail
    ///
    /// Closing an already closed recorder is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the final flush fails
    pub async fn close(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let closed_now = tokio::task::spawn_blocking(move || shared.close())
            .await
            .map_err(|e| ReelError::Other(format!("Recorder task failed: {e}")))??;

        if closed_now {
            info!(
                "Closed cassette {} after {} interactions",
                self.path.display(),
                self.interactions_written()
            );
        }

        Ok(())
    }

    /// Whether the recorder has been closed or stopped by a write failure
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Interactions committed so far
    #[must_use]
    pub fn interactions_written(&self) -> u64 {
        self.shared.interactions_written.load(Ordering::Acquire)
    }

    /// Cassette path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

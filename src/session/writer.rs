//! Session log writer with buffered, periodically flushed appends.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;

use super::error::LogError;
use super::rotation;

/// One open session file.
struct ActiveSession {
    file: tokio::fs::File,
    path: PathBuf,
    port: String,
    baud: u32,
    started: DateTime<Utc>,
    opened_at: tokio::time::Instant,
    size_bytes: u64,
}

/// Rotating, periodically flushed append log for one port's sessions.
///
/// `log_data` only queues in memory; a flush ticker (or `end_session`)
/// drains the queue to disk. All I/O failures are recovered locally and
/// never reach the connection's read loop.
pub struct SessionLogWriter {
    config: SessionConfig,
    pending: StdMutex<Vec<String>>,
    active: Mutex<Option<ActiveSession>>,
    /// Port/baud of the session being logged, kept so a failed rotation
    /// can reopen on the next flush. Cleared by `end_session`.
    reopen: StdMutex<Option<(String, u32)>>,
    flusher: StdMutex<Option<CancellationToken>>,
}

impl SessionLogWriter {
    /// Create a writer with the given immutable config snapshot.
    #[must_use]
    pub fn new(config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            pending: StdMutex::new(Vec::new()),
            active: Mutex::new(None),
            reopen: StdMutex::new(None),
            flusher: StdMutex::new(None),
        })
    }

    /// Whether session logging is enabled at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Path of the currently open session file, if any.
    pub async fn current_path(&self) -> Option<PathBuf> {
        self.active.lock().await.as_ref().map(|s| s.path.clone())
    }

    /// Begin a new session for `port`, ending any open session first and
    /// rotating existing files so the new one becomes `session-1`.
    ///
    /// # Errors
    ///
    /// Returns an error if rotation or file creation fails. Callers treat
    /// this as a local, recoverable condition.
    pub async fn start_session(self: &Arc<Self>, port: &str, baud: u32) -> Result<(), LogError> {
        if !self.config.enabled {
            return Ok(());
        }
        self.end_session().await?;

        let session = self.open_new(port, baud).await?;
        tracing::info!(port, path = %session.path.display(), "Opened session log");
        *self.active.lock().await = Some(session);
        *lock_std(&self.reopen) = Some((port.to_string(), baud));
        self.spawn_flusher();
        Ok(())
    }

    /// Queue one line for the next flush. Never touches the disk.
    pub fn log_data(&self, timestamp: DateTime<Utc>, text: &str) {
        if !self.config.enabled || lock_std(&self.reopen).is_none() {
            return;
        }
        lock_std(&self.pending).push(format!("[{}] {}\n", timestamp.to_rfc3339(), text));
    }

    /// Drain pending lines to disk, then restart the session if it has
    /// outgrown `max_size_bytes` or outlived `timeout_seconds`.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure; pending data is retained so a
    /// later flush can retry.
    pub async fn flush(&self) -> Result<(), LogError> {
        if !self.config.enabled {
            return Ok(());
        }
        let mut active = self.active.lock().await;

        // Reopen after an earlier failed rotation.
        if active.is_none() {
            let Some((port, baud)) = lock_std(&self.reopen).clone() else {
                return Ok(());
            };
            *active = Some(self.open_new(&port, baud).await?);
        }
        let Some(session) = active.as_mut() else {
            return Ok(());
        };

        let lines = std::mem::take(&mut *lock_std(&self.pending));
        if !lines.is_empty() {
            let chunk = lines.concat();
            if let Err(source) = write_chunk(&mut session.file, &chunk).await {
                // Put the failed lines back ahead of anything queued since.
                let mut pending = lock_std(&self.pending);
                let newer = std::mem::take(&mut *pending);
                *pending = lines;
                pending.extend(newer);
                return Err(LogError::FlushFailed { source });
            }
            session.size_bytes += u64::try_from(chunk.len()).unwrap_or(u64::MAX);
        }

        // No rotation while the session is being torn down.
        if lock_std(&self.reopen).is_none() {
            return Ok(());
        }
        let over_size = session.size_bytes > self.config.max_size_bytes;
        let over_time = self.config.timeout_seconds > 0
            && session.opened_at.elapsed() >= Duration::from_secs(self.config.timeout_seconds);
        if over_size || over_time {
            let (port, baud) = (session.port.clone(), session.baud);
            if let Some(done) = active.take() {
                tracing::info!(port, over_size, over_time, "Restarting session log");
                close_with_footer(done).await;
            }
            *active = Some(self.open_new(&port, baud).await?);
        }
        Ok(())
    }

    /// Flush remaining data, write the footer, and close the session file.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails; the file is still
    /// footered and closed.
    pub async fn end_session(&self) -> Result<(), LogError> {
        if !self.config.enabled {
            return Ok(());
        }
        if let Some(token) = lock_std(&self.flusher).take() {
            token.cancel();
        }
        *lock_std(&self.reopen) = None;

        let flush_result = self.flush().await;
        let mut active = self.active.lock().await;
        if let Some(done) = active.take() {
            let path = close_with_footer(done).await;
            tracing::info!(path = %path.display(), "Closed session log");
        }
        flush_result
    }

    async fn open_new(&self, port: &str, baud: u32) -> Result<ActiveSession, LogError> {
        let dir = &self.config.directory;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| LogError::RotationFailed { source })?;
        rotation::rotate(dir, self.config.max_files)
            .await
            .map_err(|source| LogError::RotationFailed { source })?;

        let started = Utc::now();
        let path = dir.join(rotation::session_filename(port, started));
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|source| LogError::RotationFailed { source })?;

        let header = format!(
            "# Serial Monitor Session Log\n\
             # Port: {port}\n\
             # Baud Rate: {baud}\n\
             # Started: {}\n\
             # ================================================================\n",
            started.to_rfc3339()
        );
        write_chunk(&mut file, &header)
            .await
            .map_err(|source| LogError::RotationFailed { source })?;

        Ok(ActiveSession {
            file,
            path,
            port: port.to_string(),
            baud,
            started,
            opened_at: tokio::time::Instant::now(),
            size_bytes: u64::try_from(header.len()).unwrap_or(u64::MAX),
        })
    }

    fn spawn_flusher(self: &Arc<Self>) {
        if self.config.flush_interval_seconds == 0 {
            return;
        }
        let token = CancellationToken::new();
        if let Some(old) = lock_std(&self.flusher).replace(token.clone()) {
            old.cancel();
        }
        let interval = Duration::from_secs(self.config.flush_interval_seconds);
        let writer = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        if let Err(err) = writer.flush().await {
                            tracing::warn!(error = %err, "Session log flush failed, retaining data");
                        }
                    }
                }
            }
        });
    }
}

async fn write_chunk(file: &mut tokio::fs::File, chunk: &str) -> std::io::Result<()> {
    file.write_all(chunk.as_bytes()).await?;
    file.flush().await
}

/// Footer the file and let the handle drop. Returns the file path.
async fn close_with_footer(mut session: ActiveSession) -> PathBuf {
    let ended = Utc::now();
    let duration = ended.signed_duration_since(session.started).num_seconds();
    let footer = format!(
        "\n# ================================================================\n\
         # Session ended: {}\n\
         # Duration: {duration}s\n\
         # Final size: {} bytes\n",
        ended.to_rfc3339(),
        session.size_bytes
    );
    if let Err(err) = write_chunk(&mut session.file, &footer).await {
        tracing::warn!(path = %session.path.display(), error = %err, "Failed to write session footer");
    }
    session.path
}

fn lock_std<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

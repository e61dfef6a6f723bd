//! Marker-file echo shield, observable from other processes

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

use super::EchoShield;
use crate::{Error, Result};

/// Contents of the marker file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct MarkerRecord {
    /// Process that raised the shield
    pid: u32,
    /// Last time the owner confirmed it is still playing (unix ms)
    heartbeat_ms: i64,
    /// When set, the shield drops at this time (unix ms)
    release_at_ms: Option<i64>,
}

/// What the marker file currently says
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerStatus {
    /// No marker present
    Absent,
    /// Playback in progress
    Raised {
        /// Owner process
        pid: u32,
        /// Time since the last heartbeat
        heartbeat_age: Duration,
    },
    /// Playback finished, cooldown running
    CoolingDown {
        /// Owner process
        pid: u32,
        /// Time until release
        remaining: Duration,
    },
    /// Cooldown elapsed but the marker was not removed yet
    Released,
    /// Raised marker with no recent heartbeat, likely left by a crashed process
    Stale {
        /// Time since the marker was last refreshed
        age: Duration,
    },
    /// Marker in an unrecognised format, still fresh by modification time
    Unrecognised {
        /// Time since the file was modified
        age: Duration,
    },
}

impl MarkerStatus {
    /// Whether this status suppresses capture
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Raised { .. } | Self::CoolingDown { .. } | Self::Unrecognised { .. }
        )
    }
}

/// Default reuse window for a marker reading
pub const DEFAULT_REFRESH: Duration = Duration::from_millis(50);

/// Shield published as a file on disk
///
/// Raising atomically writes a small JSON record; lowering deletes the
/// file. A raised marker whose heartbeat is older than `stale_after` is
/// ignored, so a crash mid-playback cannot lock capture out forever.
///
/// [`EchoShield::is_active`] reuses its last reading for `refresh` so the
/// capture path does not hit the filesystem on every frame. This handle's
/// own writes replace that reading immediately.
#[derive(Debug)]
pub struct MarkerShield {
    path: PathBuf,
    stale_after: Duration,
    refresh: Duration,
    last_reading: Mutex<Option<(Instant, bool)>>,
    warned_stale: AtomicBool,
}

impl MarkerShield {
    /// Create a shield publishing to `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
            refresh: DEFAULT_REFRESH,
            last_reading: Mutex::new(None),
            warned_stale: AtomicBool::new(false),
        }
    }

    /// Set how long a marker reading is reused; zero reads the file every time
    #[must_use]
    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh;
        self
    }

    fn remember(&self, active: bool) {
        let mut last = self
            .last_reading
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *last = Some((Instant::now(), active));
    }

    fn forget(&self) {
        *self
            .last_reading
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    fn recent_reading(&self) -> Option<bool> {
        let last = self
            .last_reading
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        last.filter(|(at, _)| at.elapsed() < self.refresh)
            .map(|(_, active)| active)
    }

    fn read_active(&self) -> bool {
        match self.status() {
            Ok(MarkerStatus::Stale { age }) => {
                if !self.warned_stale.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        path = %self.path.display(),
                        age_secs = age.as_secs(),
                        "ignoring stale echo shield marker"
                    );
                }
                false
            }
            Ok(status) => {
                self.warned_stale.store(false, Ordering::Relaxed);
                status.is_active()
            }
            Err(e) => {
                // Unknown state counts as raised
                tracing::warn!(error = %e, "failed to read echo shield marker");
                true
            }
        }
    }

    /// Marker file location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and interpret the marker
    ///
    /// # Errors
    ///
    /// Returns error if the marker exists but cannot be read
    pub fn status(&self) -> Result<MarkerStatus> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(MarkerStatus::Absent),
            Err(e) => {
                return Err(Error::Shield(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let Ok(record) = serde_json::from_slice::<MarkerRecord>(&content) else {
            return Ok(self.status_from_mtime());
        };

        let now = now_ms();
        Ok(match record.release_at_ms {
            Some(release_at) if release_at > now => MarkerStatus::CoolingDown {
                pid: record.pid,
                remaining: millis_between(now, release_at),
            },
            Some(_) => MarkerStatus::Released,
            None => {
                let age = millis_between(record.heartbeat_ms, now);
                if age > self.stale_after {
                    MarkerStatus::Stale { age }
                } else {
                    MarkerStatus::Raised {
                        pid: record.pid,
                        heartbeat_age: age,
                    }
                }
            }
        })
    }

    fn status_from_mtime(&self) -> MarkerStatus {
        let age = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default();

        if age > self.stale_after {
            MarkerStatus::Stale { age }
        } else {
            MarkerStatus::Unrecognised { age }
        }
    }

    fn write(&self, record: &MarkerRecord) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", record.pid));

        let json = serde_json::to_vec(record)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            Error::Shield(format!("cannot publish {}: {e}", self.path.display()))
        })
    }
}

impl EchoShield for MarkerShield {
    fn raise(&self) -> Result<()> {
        self.write(&MarkerRecord {
            pid: std::process::id(),
            heartbeat_ms: now_ms(),
            release_at_ms: None,
        })?;
        self.remember(true);
        Ok(())
    }

    fn schedule_lower(&self, cooldown: Duration) -> Result<()> {
        if cooldown.is_zero() {
            return self.lower();
        }
        let now = now_ms();
        let cooldown_ms = i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX);
        self.write(&MarkerRecord {
            pid: std::process::id(),
            heartbeat_ms: now,
            release_at_ms: Some(now.saturating_add(cooldown_ms)),
        })?;
        // The cooldown may end inside the reuse window
        self.forget();
        Ok(())
    }

    fn lower(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Shield(format!(
                    "cannot remove {}: {e}",
                    self.path.display()
                )));
            }
        }
        self.remember(false);
        Ok(())
    }

    fn is_active(&self) -> bool {
        if let Some(active) = self.recent_reading() {
            return active;
        }
        let active = self.read_active();
        self.remember(active);
        active
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn millis_between(from: i64, to: i64) -> Duration {
    u64::try_from(to.saturating_sub(from)).map_or(Duration::ZERO, Duration::from_millis)
}

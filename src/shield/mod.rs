//! Echo shield
//!
//! Playback raises the shield while synthesized audio is audible and
//! schedules it to drop a short cooldown after the last chunk, so room
//! reverberation is not captured as user speech. Segmentation polls it
//! once per frame and discards frames while it is up.

mod marker;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub use marker::{MarkerShield, MarkerStatus};

use crate::Result;
use crate::config::{ShieldConfig, ShieldMode};

/// Playback/capture mutual exclusion signal
///
/// Written by the playback stage only; read by any number of observers.
pub trait EchoShield: Send + Sync {
    /// Raise the shield (idempotent; refreshes liveness)
    ///
    /// # Errors
    ///
    /// Returns error if the signal cannot be published
    fn raise(&self) -> Result<()>;

    /// Keep the shield up for `cooldown`, then let it drop
    ///
    /// # Errors
    ///
    /// Returns error if the signal cannot be published
    fn schedule_lower(&self, cooldown: Duration) -> Result<()>;

    /// Drop the shield immediately
    ///
    /// # Errors
    ///
    /// Returns error if the signal cannot be withdrawn
    fn lower(&self) -> Result<()>;

    /// Whether frames should currently be suppressed
    fn is_active(&self) -> bool;
}

/// Build the shield selected by configuration
#[must_use]
pub fn from_config(config: &ShieldConfig) -> Arc<dyn EchoShield> {
    match config.mode {
        ShieldMode::File => {
            let path = config.marker_path();
            tracing::debug!(path = %path.display(), "using marker file echo shield");
            Arc::new(MarkerShield::new(path, config.stale_after()).with_refresh(config.refresh()))
        }
        ShieldMode::Memory => {
            tracing::debug!("using in-process echo shield");
            Arc::new(LocalShield::new())
        }
    }
}

const INACTIVE: u64 = 0;
const HELD: u64 = u64::MAX;

/// In-process shield backed by a single atomic word
///
/// The word is `0` when down, `u64::MAX` while held, and otherwise one
/// past the release deadline in milliseconds since the shield was created.
#[derive(Debug)]
pub struct LocalShield {
    state: AtomicU64,
    epoch: Instant,
}

impl LocalShield {
    /// Create a lowered shield
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(INACTIVE),
            epoch: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(HELD - 1)
    }
}

impl Default for LocalShield {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoShield for LocalShield {
    fn raise(&self) -> Result<()> {
        self.state.store(HELD, Ordering::Release);
        Ok(())
    }

    fn schedule_lower(&self, cooldown: Duration) -> Result<()> {
        if cooldown.is_zero() {
            return self.lower();
        }
        let cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(HELD);
        let deadline = self
            .elapsed_ms()
            .saturating_add(cooldown_ms)
            .saturating_add(1)
            .min(HELD - 1);
        self.state.store(deadline, Ordering::Release);
        Ok(())
    }

    fn lower(&self) -> Result<()> {
        self.state.store(INACTIVE, Ordering::Release);
        Ok(())
    }

    fn is_active(&self) -> bool {
        match self.state.load(Ordering::Acquire) {
            INACTIVE => false,
            HELD => true,
            deadline => self.elapsed_ms() < deadline - 1,
        }
    }
}

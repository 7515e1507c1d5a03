//! Tamper detection for configuration and secret files.

use guard_core::{event_kinds, EscalationSink};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

use crate::circuit_breaker::CircuitBreaker;

/// Content fingerprint of a watched file. A missing file hashes to `None`.
async fn fingerprint(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(hex::encode(Sha256::digest(&bytes))),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        // Unreadable is a state of its own so it registers as a change once.
        Err(e) => Some(format!("unreadable:{:?}", e.kind())),
    }
}

/// Watches the config and secrets files and forces HALT when either changes.
///
/// Call [`check`](Self::check) from the control loop every iteration.
pub struct ConfigIntegrityMonitor {
    config_path: PathBuf,
    secrets_path: PathBuf,
    config_hash: Option<String>,
    secrets_hash: Option<String>,
    breaker: Arc<CircuitBreaker>,
    notifier: Arc<dyn EscalationSink>,
}

impl ConfigIntegrityMonitor {
    /// Record the current content of both files as the baseline.
    pub async fn new(
        config_path: impl Into<PathBuf>,
        secrets_path: impl Into<PathBuf>,
        breaker: Arc<CircuitBreaker>,
        notifier: Arc<dyn EscalationSink>,
    ) -> Self {
        let config_path = config_path.into();
        let secrets_path = secrets_path.into();
        let config_hash = fingerprint(&config_path).await;
        let secrets_hash = fingerprint(&secrets_path).await;
        debug!(
            config = %config_path.display(),
            secrets = %secrets_path.display(),
            "Integrity baseline recorded"
        );

        Self {
            config_path,
            secrets_path,
            config_hash,
            secrets_hash,
            breaker,
            notifier,
        }
    }

    /// Rehash both files. On any change the new hash becomes the baseline, the
    /// breaker is halted and operators are alerted. Returns whether a change was seen.
    pub async fn check(&mut self) -> bool {
        let config_hash = fingerprint(&self.config_path).await;
        let secrets_hash = fingerprint(&self.secrets_path).await;

        let mut changed = Vec::new();
        if config_hash != self.config_hash {
            changed.push(self.config_path.display().to_string());
            self.config_hash = config_hash;
        }
        if secrets_hash != self.secrets_hash {
            changed.push(self.secrets_path.display().to_string());
            self.secrets_hash = secrets_hash;
        }
        if changed.is_empty() {
            return false;
        }

        let files = changed.join(", ");
        error!(files = %files, "Config or secrets file changed while running");
        self.breaker.record_risk_breach("config/secret tamper").await;
        self.notifier
            .escalate_event(
                event_kinds::CONFIG_TAMPER,
                &format!("Config/secret tamper detected: {files} changed"),
            )
            .await;
        true
    }

    /// Current baseline hashes as `(config, secrets)`.
    pub fn fingerprints(&self) -> (Option<&str>, Option<&str>) {
        (self.config_hash.as_deref(), self.secrets_hash.as_deref())
    }
}

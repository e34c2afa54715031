//! Session checkpoint persistence
//!
//! A single JSON document holding session capital, cumulative realized P&L
//! and the equity curve:
//!
//! ```json
//! {"capital": 100000.0, "pnl": 250.5, "equity_history": [{"time": "START", "equity": 100000.0}]}
//! ```
//!
//! Writes go to a sibling temp file first and are renamed into place, so a
//! crash mid-write leaves the previous checkpoint intact.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session file {path} is not valid JSON: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("capital must be positive and finite, got {0}")]
    InvalidCapital(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: String,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub capital: f64,
    pub pnl: f64,
    #[serde(default)]
    pub equity_history: Vec<EquityPoint>,
}

impl PersistedSession {
    pub fn fresh(capital: f64) -> Self {
        Self {
            capital,
            pnl: 0.0,
            equity_history: vec![EquityPoint {
                time: "START".to_string(),
                equity: capital,
            }],
        }
    }

    /// Book a realized result: capital and cumulative P&L move together and
    /// the new equity is appended to the curve
    pub fn apply_realized(&mut self, net_pnl: f64) {
        self.capital += net_pnl;
        self.pnl += net_pnl;
        self.equity_history.push(EquityPoint {
            time: Local::now().format("%H:%M:%S").to_string(),
            equity: self.capital,
        });
    }
}

pub struct SessionStore {
    path: PathBuf,
    checkpoint_interval: Duration,
    last_attempt: Option<Instant>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>, checkpoint_interval: Duration) -> Self {
        Self {
            path: path.into(),
            checkpoint_interval,
            last_attempt: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "session.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// `Ok(None)` when no checkpoint exists yet
    pub fn load(&self) -> Result<Option<PersistedSession>, SessionError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        let session = serde_json::from_str(&contents).map_err(|source| SessionError::Format {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(session))
    }

    /// Resume the saved session, or start fresh with `default_capital` when
    /// the file is missing or unreadable
    pub fn load_or_fresh(&self, default_capital: f64) -> PersistedSession {
        match self.load() {
            Ok(Some(session)) => {
                info!(
                    "Resumed session from {}: capital {:.2}, P&L {:.2}",
                    self.path.display(),
                    session.capital,
                    session.pnl
                );
                session
            }
            Ok(None) => {
                info!(
                    "No session checkpoint at {}, starting with capital {:.2}",
                    self.path.display(),
                    default_capital
                );
                PersistedSession::fresh(default_capital)
            }
            Err(e) => {
                warn!("{}; starting a fresh session", e);
                PersistedSession::fresh(default_capital)
            }
        }
    }

    /// Atomic write: temp file then rename
    pub fn save(&self, session: &PersistedSession) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let json = serde_json::to_string_pretty(session).map_err(|source| SessionError::Format {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        debug!("Session checkpoint written to {}", self.path.display());
        Ok(())
    }

    /// Write unless the last attempt was within the checkpoint interval.
    /// `force` bypasses the throttle. Returns whether a write happened.
    pub fn checkpoint(&mut self, session: &PersistedSession, force: bool) -> Result<bool, SessionError> {
        if !force {
            if let Some(last) = self.last_attempt {
                if last.elapsed() < self.checkpoint_interval {
                    return Ok(false);
                }
            }
        }
        // A failed write waits for the next interval like a successful one
        self.last_attempt = Some(Instant::now());
        self.save(session)?;
        Ok(true)
    }

    /// Delete the checkpoint. Returns whether a file was removed.
    pub fn reset(&self) -> Result<bool, SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Session checkpoint {} removed", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_err(e)),
        }
    }

    /// Overwrite the checkpoint with a fresh session at `capital`
    pub fn set_capital(&self, capital: f64) -> Result<PersistedSession, SessionError> {
        if !capital.is_finite() || capital <= 0.0 {
            return Err(SessionError::InvalidCapital(capital));
        }
        let session = PersistedSession::fresh(capital);
        self.save(&session)?;
        info!("Session capital reset to {:.2}", capital);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::new(dir.path().join("session.json"), Duration::from_secs(60))
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert_eq!(store.load().unwrap(), None);

        let session = PersistedSession {
            capital: 100_000.0,
            pnl: 250.5,
            equity_history: vec![],
        };
        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));
        assert!(!dir.path().join("session.json.tmp").exists());
    }

    #[test]
    fn test_missing_history_defaults_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), r#"{"capital": 5000, "pnl": -12.5}"#).unwrap();
        let session = store.load().unwrap().unwrap();
        assert_eq!(session.capital, 5000.0);
        assert!(session.equity_history.is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(SessionError::Format { .. })));
        assert_eq!(store.load_or_fresh(1_000.0), PersistedSession::fresh(1_000.0));
    }

    #[tokio::test]
    async fn test_checkpoint_is_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        let mut session = PersistedSession::fresh(1_000.0);
        assert!(store.checkpoint(&session, false).unwrap());
        session.apply_realized(10.0);
        assert!(!store.checkpoint(&session, false).unwrap());
        assert_eq!(store.load().unwrap().unwrap().capital, 1_000.0);
        assert!(store.checkpoint(&session, true).unwrap());
        assert_eq!(store.load().unwrap().unwrap().capital, 1_010.0);
    }

    #[test]
    fn test_reset_and_set_capital() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(!store.reset().unwrap());
        store.set_capital(50_000.0).unwrap();
        let session = store.load().unwrap().unwrap();
        assert_eq!(session.capital, 50_000.0);
        assert_eq!(session.pnl, 0.0);
        assert!(store.reset().unwrap());
        assert!(store.load().unwrap().is_none());
        assert!(store.set_capital(-1.0).is_err());
    }

    #[test]
    fn test_apply_realized() {
        let mut session = PersistedSession::fresh(100_000.0);
        session.apply_realized(250.5);
        session.apply_realized(-50.5);
        assert_eq!(session.pnl, 200.0);
        assert_eq!(session.capital, 100_200.0);
        assert_eq!(session.equity_history.len(), 3);
        assert_eq!(session.equity_history[2].equity, 100_200.0);
    }
}

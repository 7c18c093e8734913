// src/oplog.rs
//! Operation logger: console output plus a JSON audit file per run
//!
//! Console lines are for the operator watching the run. The JSON file
//! (`<log dir>/<run id>.log`) is the durable, timestamped audit record of
//! every phase, page and failure.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as tfmt, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::{RekeyError, Result};

/// `<UTC yyyymmddTHHMMSSZ>-<8 hex>`; sorts by start time
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        let suffix: [u8; 4] = rand::random();
        Self(format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            hex::encode(suffix)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
/// Returns the path of the JSON log file for this run.
pub fn init(settings: &LoggingSettings, run_id: &RunId) -> Result<PathBuf> {
    fs::create_dir_all(&settings.dir)?;
    let path = settings.dir.join(format!("{run_id}.log"));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let console = tfmt::layer().with_target(false).compact();
    let audit = tfmt::layer()
        .json()
        .with_current_span(true)
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(audit)
        .try_init()
        .map_err(|e| RekeyError::Config(format!("logging already initialised: {e}")))?;

    Ok(path)
}

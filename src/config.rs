//! Transport configuration.
//!
//! When the dispatcher is not run with `--local`, it reads a JSON array of
//! transport descriptors. Inactive entries are kept in the file but
//! skipped at load time.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::fetcher::{Transport, TransportKind};

fn default_active() -> bool {
    true
}

fn default_api() -> String {
    "web".to_string()
}

/// One transport descriptor from the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportEntry {
    Popen {
        script: PathBuf,
        #[serde(default = "default_active")]
        active: bool,
        #[serde(default = "default_api")]
        api: String,
    },
    Sudo {
        script: String,
        user: String,
        group: String,
        #[serde(default = "default_active")]
        active: bool,
        #[serde(default = "default_api")]
        api: String,
    },
    Ssh {
        user: String,
        host: String,
        #[serde(default = "default_active")]
        active: bool,
        #[serde(default = "default_api")]
        api: String,
    },
}

impl TransportEntry {
    fn active(&self) -> bool {
        match self {
            Self::Popen { active, .. } | Self::Sudo { active, .. } | Self::Ssh { active, .. } => {
                *active
            }
        }
    }

    fn into_transport(self) -> Transport {
        match self {
            Self::Popen { script, api, .. } => Transport {
                kind: TransportKind::Local { script },
                api,
            },
            Self::Sudo {
                script,
                user,
                group,
                api,
                ..
            } => Transport {
                kind: TransportKind::Sudo {
                    script,
                    user,
                    group,
                },
                api,
            },
            Self::Ssh { user, host, api, .. } => Transport {
                kind: TransportKind::Ssh { user, host },
                api,
            },
        }
    }
}

/// Load the active transports from a configuration file.
pub fn load_transports(path: &Path) -> anyhow::Result<Vec<Transport>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read transport config {}", path.display()))?;
    let entries: Vec<TransportEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid transport config {}", path.display()))?;

    let transports: Vec<Transport> = entries
        .into_iter()
        .filter(|e| e.active())
        .map(TransportEntry::into_transport)
        .collect();

    anyhow::ensure!(
        !transports.is_empty(),
        "transport config {} has no active transports",
        path.display()
    );

    Ok(transports)
}

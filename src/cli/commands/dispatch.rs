//! Dispatch command: run the control loop.

use std::path::{Path, PathBuf};

use console::style;

use crate::config;
use crate::dispatcher::{recovery, Dispatcher};
use crate::fetcher::Transport;
use crate::repository::TrendsRepository;

pub async fn cmd_dispatch(
    db: &Path,
    local: Option<PathBuf>,
    exit_when_idle: bool,
    transports_path: &Path,
) -> anyhow::Result<()> {
    let repo = TrendsRepository::new(db)?;

    let transports = match local {
        Some(script) => vec![Transport::local(script, "web".to_string())],
        None => config::load_transports(transports_path)?,
    };

    // Payloads staged by a crashed run are replayed before new work starts.
    let replayed = recovery::recover_staged(&repo, false)?;
    if replayed > 0 {
        println!(
            "{} Replayed {} staged payload(s)",
            style("✓").green(),
            replayed
        );
    }

    let mut dispatcher = Dispatcher::new(repo, transports, exit_when_idle)?;
    dispatcher.run().await
}

//! Startup replay of staged payloads.
//!
//! A crash between staging and the structured write leaves rows in the
//! staging table; replaying them through the normal ingestion path is the
//! repair, and the recorded fetch instant carries through unchanged.

use std::io::{self, Write};

use console::style;
use tracing::{info, warn};

use crate::ingest;
use crate::repository::TrendsRepository;

/// Offer to replay staged payloads left behind by an earlier run.
///
/// Returns the number of payloads ingested. With `assume_yes` the operator
/// prompt is skipped.
pub fn recover_staged(repo: &TrendsRepository, assume_yes: bool) -> anyhow::Result<usize> {
    let staged = repo.staged_payloads()?;
    if staged.is_empty() {
        return Ok(0);
    }

    println!(
        "{} {} staged payload(s) from an earlier run await ingestion",
        style("!").yellow(),
        staged.len()
    );
    if !assume_yes {
        print!("Replay them now? [y/N] ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{} Leaving staged payloads in place", style("!").yellow());
            return Ok(0);
        }
    }

    let mut replayed = 0;
    for payload in &staged {
        match ingest::process_staged(repo, payload) {
            Ok(()) => {
                info!(
                    "replayed staged payload {} for request {}",
                    payload.rfo_id, payload.r_id
                );
                replayed += 1;
            }
            Err(e) if e.is_validation() => {
                warn!(
                    "staged payload {} for request {} still fails validation: {}",
                    payload.rfo_id, payload.r_id, e
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(replayed)
}

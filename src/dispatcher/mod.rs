//! The dispatcher control loop.
//!
//! One cooperative loop per process: pace, claim, fetch, ingest. Several
//! dispatcher processes may share a store; the atomic conditional claim
//! keeps their work disjoint. Unexpected failures crash the process on
//! purpose: it is better to stop than to stampede the upstream service,
//! and the staging table guarantees nothing fetched is lost.

pub mod governor;
pub mod recovery;

use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::fetcher::Transport;
use crate::ingest;
use crate::models::ClaimedRequest;
use crate::repository::{ClaimOutcome, TrendsRepository};

/// Sleep between claim attempts while the queue is empty.
const IDLE_SLEEP: Duration = Duration::from_secs(1);

pub struct Dispatcher {
    repo: TrendsRepository,
    transports: Vec<Transport>,
    /// Interned fetcher ids, parallel to `transports`.
    fetcher_ids: Vec<i64>,
    rr_index: usize,
    last_dispatch: Option<Instant>,
    server_errors: u64,
    exit_when_idle: bool,
}

impl Dispatcher {
    pub fn new(
        repo: TrendsRepository,
        transports: Vec<Transport>,
        exit_when_idle: bool,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!transports.is_empty(), "no transports configured");

        let mut fetcher_ids = Vec::with_capacity(transports.len());
        for transport in &transports {
            fetcher_ids.push(repo.intern_fetcher(&transport.identity())?);
        }

        Ok(Self {
            repo,
            transports,
            fetcher_ids,
            rr_index: 0,
            last_dispatch: None,
            server_errors: 0,
            exit_when_idle,
        })
    }

    /// Run the control loop until the queue drains (with `--exit`) or a
    /// fatal error crashes the dispatcher.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let interval = governor::dispatch_interval(self.transports.len());
        info!(
            "dispatching with {} transport(s), one request per {:.0}s",
            self.transports.len(),
            interval.as_secs_f64()
        );

        loop {
            self.last_dispatch = Some(governor::wait(self.last_dispatch, interval).await);

            let claim = match self.repo.claim_next_request(Utc::now())? {
                ClaimOutcome::Claimed(claim) => claim,
                // Another dispatcher won the row; restart the iteration.
                ClaimOutcome::Raced => continue,
                ClaimOutcome::Empty => {
                    if self.exit_when_idle {
                        info!(
                            "queue drained, exiting ({} upstream server errors seen)",
                            self.server_errors
                        );
                        return Ok(());
                    }
                    tokio::time::sleep(IDLE_SLEEP).await;
                    continue;
                }
            };

            self.dispatch(claim).await?;
        }
    }

    /// Fetch one claimed request and drive it to `done`, back to `open`,
    /// or into the staging table.
    async fn dispatch(&mut self, claim: ClaimedRequest) -> anyhow::Result<()> {
        let window = format_window(claim.window_start, claim.window_end);
        let transport = self.transports[self.rr_index].clone();
        let f_id = self.fetcher_ids[self.rr_index];

        info!(
            "request {}: fetching {:?} over {} via {}",
            claim.r_id,
            claim.keyword,
            window,
            transport.identity().name
        );

        let fetched = tokio::select! {
            result = transport.fetch(&window, &claim.keyword, claim.geo.as_deref()) => result,
            _ = tokio::signal::ctrl_c() => {
                self.repo.release_request(claim.r_id)?;
                bail!("interrupted while fetching request {}", claim.r_id);
            }
        };

        // Advance round-robin once the dispatch has returned, whatever the
        // outcome was.
        self.rr_index = (self.rr_index + 1) % self.transports.len();

        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) if e.is_server_error() => {
                self.server_errors += 1;
                warn!(
                    "request {}: upstream server error ({} so far), releasing: {}",
                    claim.r_id, self.server_errors, e
                );
                self.repo.release_request(claim.r_id)?;
                return Ok(());
            }
            Err(e) => {
                self.repo.release_request(claim.r_id)?;
                return Err(e).with_context(|| format!("request {}: fetch failed", claim.r_id));
            }
        };

        let staged = match ingest::stage(&self.repo, &claim, f_id, raw, Utc::now()) {
            Ok(staged) => staged,
            Err(e) => {
                self.repo.release_request(claim.r_id)?;
                return Err(e)
                    .with_context(|| format!("request {}: staging failed", claim.r_id));
            }
        };

        // From here on the payload is durable; failures must not hand the
        // request back to the queue or the staging row would be orphaned
        // against an open request.
        match ingest::process_staged(&self.repo, &staged) {
            Ok(()) => {
                info!("request {}: done", claim.r_id);
                Ok(())
            }
            Err(e) if e.is_validation() => {
                warn!(
                    "request {}: payload failed validation, left staged for repair: {}",
                    claim.r_id, e
                );
                Ok(())
            }
            Err(e) => {
                Err(e).with_context(|| format!("request {}: ingestion failed", claim.r_id))
            }
        }
    }
}

/// Render a request window the way the fetch scripts expect it: long
/// windows (over 7 days) day-granular, shorter ones hour-granular.
pub fn format_window(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    if end - start > chrono::Duration::days(7) {
        format!("{} {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
    } else {
        format!("{} {}", start.format("%Y-%m-%dT%H"), end.format("%Y-%m-%dT%H"))
    }
}

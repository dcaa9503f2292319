//! Integration tests for the claim -> fetch -> ingest flow.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

use trendsift::dispatcher::{recovery, Dispatcher};
use trendsift::fetcher::{FetchError, Transport};
use trendsift::ingest;
use trendsift::models::{ClaimedRequest, NewRequest, RequestStatus};
use trendsift::repository::{ClaimOutcome, TrendsRepository};

fn setup() -> (TrendsRepository, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let repo = TrendsRepository::new(&dir.path().join("trends.db")).unwrap();
    (repo, dir)
}

/// Truncate to a whole hour so window bounds match generated labels.
fn hour_floor(dt: DateTime<Utc>) -> DateTime<Utc> {
    let ts = dt.timestamp();
    DateTime::from_timestamp(ts - ts.rem_euclid(3_600), 0).unwrap()
}

/// Queue an eligible hourly-window request ending well in the past.
fn queue_eligible(
    repo: &TrendsRepository,
    k_id: i64,
    priority: i64,
    geo: Option<&str>,
    not_after: DateTime<Utc>,
) -> i64 {
    let now = Utc::now();
    let start = hour_floor(now - Duration::hours(48));
    repo.create_request(
        &NewRequest {
            who: "tests".to_string(),
            api: "web".to_string(),
            priority,
            geo: geo.map(String::from),
            window_start: start,
            window_end: start + Duration::hours(12),
            not_before: now - Duration::hours(1),
            not_after,
            note: None,
        },
        k_id,
    )
    .unwrap()
}

fn claim(repo: &TrendsRepository) -> Option<ClaimedRequest> {
    match repo.claim_next_request(Utc::now()).unwrap() {
        ClaimOutcome::Claimed(c) => Some(c),
        ClaimOutcome::Empty => None,
        ClaimOutcome::Raced => panic!("unexpected claim race in a single-process test"),
    }
}

/// A payload whose hourly labels match the claimed window.
fn payload_for(claim: &ClaimedRequest, values: &[i64]) -> String {
    let mut time = serde_json::Map::new();
    for (i, v) in values.iter().enumerate() {
        let label = claim.window_start + Duration::hours(i as i64);
        time.insert(
            label.format("%Y-%m-%dT%H:%M:%S").to_string(),
            serde_json::json!(v),
        );
    }
    serde_json::json!({ "time": time }).to_string()
}

#[test]
fn claim_prefers_priority_then_deadline() {
    let (repo, _dir) = setup();
    let k_id = repo.intern_keyword("fever", None).unwrap();
    let now = Utc::now();

    let low = queue_eligible(&repo, k_id, 0, None, now + Duration::hours(2));
    let high_late = queue_eligible(&repo, k_id, 5, None, now + Duration::hours(3));
    let high_soon = queue_eligible(&repo, k_id, 5, None, now + Duration::hours(1));

    assert_eq!(claim(&repo).unwrap().r_id, high_soon);
    assert_eq!(claim(&repo).unwrap().r_id, high_late);
    assert_eq!(claim(&repo).unwrap().r_id, low);
    assert!(claim(&repo).is_none());
}

#[test]
fn fresh_windows_and_future_requests_are_ineligible() {
    let (repo, _dir) = setup();
    let k_id = repo.intern_keyword("fever", None).unwrap();
    let now = Utc::now();

    // Window ended five minutes ago: the service has not materialized it.
    let start = hour_floor(now - Duration::hours(12));
    repo.create_request(
        &NewRequest {
            who: "tests".to_string(),
            api: "web".to_string(),
            priority: 0,
            geo: None,
            window_start: start,
            window_end: now - Duration::minutes(5),
            not_before: now - Duration::hours(1),
            not_after: now + Duration::hours(1),
            note: None,
        },
        k_id,
    )
    .unwrap();

    // Not yet dispatchable.
    let start = hour_floor(now - Duration::hours(48));
    repo.create_request(
        &NewRequest {
            who: "tests".to_string(),
            api: "web".to_string(),
            priority: 0,
            geo: None,
            window_start: start,
            window_end: start + Duration::hours(12),
            not_before: now + Duration::hours(1),
            not_after: now + Duration::hours(2),
            note: None,
        },
        k_id,
    )
    .unwrap();

    assert!(claim(&repo).is_none());
}

#[test]
fn a_request_is_claimed_exactly_once() {
    let (repo, _dir) = setup();
    let k_id = repo.intern_keyword("fever", None).unwrap();
    let r_id = queue_eligible(&repo, k_id, 0, None, Utc::now() + Duration::hours(1));

    let claimed = claim(&repo).unwrap();
    assert_eq!(claimed.r_id, r_id);
    assert_eq!(
        repo.request_status(r_id).unwrap(),
        Some(RequestStatus::Running)
    );

    // The row is running now; a second dispatcher finds nothing.
    assert!(claim(&repo).is_none());

    // Releasing hands it back to the queue.
    assert!(repo.release_request(r_id).unwrap());
    assert_eq!(repo.request_status(r_id).unwrap(), Some(RequestStatus::Open));
    assert_eq!(claim(&repo).unwrap().r_id, r_id);
}

#[test]
fn staged_requests_are_never_reclaimed() {
    let (repo, _dir) = setup();
    let k_id = repo.intern_keyword("fever", None).unwrap();
    queue_eligible(&repo, k_id, 0, None, Utc::now() + Duration::hours(1));

    let claimed = claim(&repo).unwrap();
    let f_id = repo
        .intern_fetcher(&Transport::local(PathBuf::from("/opt/fetch"), "web".into()).identity())
        .unwrap();
    ingest::stage(
        &repo,
        &claimed,
        f_id,
        payload_for(&claimed, &[1; 13]).into_bytes(),
        Utc::now(),
    )
    .unwrap();

    // Even if an operator resets the request to open, the staging row
    // keeps it out of the claimable set until it is replayed.
    repo.release_request(claimed.r_id).unwrap();
    assert!(claim(&repo).is_none());
}

#[test]
fn ingest_writes_all_records_and_retires_the_request() {
    let (repo, _dir) = setup();
    let k_id = repo.intern_keyword("fever", None).unwrap();
    queue_eligible(&repo, k_id, 0, Some("US"), Utc::now() + Duration::hours(1));

    let claimed = claim(&repo).unwrap();
    assert_eq!(claimed.geo.as_deref(), Some("US"));

    let mut time = serde_json::Map::new();
    for i in 0..13 {
        let label = claimed.window_start + Duration::hours(i);
        time.insert(
            label.format("%Y-%m-%dT%H:%M:%S").to_string(),
            serde_json::json!(10 * (i + 1)),
        );
    }
    let payload = serde_json::json!({
        "time": time,
        "geo": {
            "COUNTRY": {"US": ["United States", 100]},
            "REGION": {"US-CA": ["California", 80]},
            "STATES": {"US-CA": ["California", 80]},
            "DMA": {"807": ["San Francisco-Oakland-San Jose CA", 76]}
        },
        "related": {
            "query": {"top": [["flu shot", 100]], "rising": [["flu near me", 250]]},
            "topic": {"top": [["/m/0dm32", "Influenza", "Disease", 95]], "rising": []}
        }
    })
    .to_string();

    let f_id = repo
        .intern_fetcher(&Transport::local(PathBuf::from("/opt/fetch"), "web".into()).identity())
        .unwrap();
    let fetched_at = hour_floor(Utc::now());
    let staged = ingest::stage(&repo, &claimed, f_id, payload.into_bytes(), fetched_at).unwrap();
    ingest::process_staged(&repo, &staged).unwrap();

    assert_eq!(
        repo.request_status(claimed.r_id).unwrap(),
        Some(RequestStatus::Done)
    );
    assert_eq!(repo.staging_count().unwrap(), 0);
    assert_eq!(
        repo.request_completed_at(claimed.r_id).unwrap(),
        Some(fetched_at)
    );

    // The hourly cadence tagged the request, so the stitcher can see it.
    let fragments = repo
        .tagged_fragments(k_id, Some("US"), "resolution:hourly")
        .unwrap();
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].r_id, claimed.r_id);
    assert_eq!(fragments[0].values.len(), 13);
    assert_eq!(fragments[0].values[0], 10.0);

    let summary = repo.summary().unwrap();
    assert_eq!(summary.timeframes, 1);
    // COUNTRY + STATES + DMA; the US region scope is suppressed.
    assert_eq!(summary.geo_rows, 3);
    // fever + flu shot + flu near me + the influenza topic.
    assert_eq!(summary.keywords, 4);
}

#[test]
fn invalid_labels_leave_the_staging_row_for_repair() {
    let (repo, _dir) = setup();
    let k_id = repo.intern_keyword("fever", None).unwrap();
    queue_eligible(&repo, k_id, 0, None, Utc::now() + Duration::hours(1));

    let claimed = claim(&repo).unwrap();
    let f_id = repo
        .intern_fetcher(&Transport::local(PathBuf::from("/opt/fetch"), "web".into()).identity())
        .unwrap();

    // Five samples cannot label a 12-hour window at any supported cadence.
    let staged = ingest::stage(
        &repo,
        &claimed,
        f_id,
        payload_for(&claimed, &[1, 2, 3, 4, 5]).into_bytes(),
        Utc::now(),
    )
    .unwrap();

    let err = ingest::process_staged(&repo, &staged).unwrap_err();
    assert!(err.is_validation());
    assert_eq!(repo.staging_count().unwrap(), 1);
    assert_eq!(
        repo.request_status(claimed.r_id).unwrap(),
        Some(RequestStatus::Running)
    );
}

#[test]
fn startup_recovery_replays_staged_payloads() {
    let (repo, _dir) = setup();
    let k_id = repo.intern_keyword("fever", None).unwrap();
    queue_eligible(&repo, k_id, 0, None, Utc::now() + Duration::hours(1));

    let claimed = claim(&repo).unwrap();
    let f_id = repo
        .intern_fetcher(&Transport::local(PathBuf::from("/opt/fetch"), "web".into()).identity())
        .unwrap();
    let fetched_at = hour_floor(Utc::now()) - Duration::hours(2);

    // Stage and then "crash" before the structured write.
    ingest::stage(
        &repo,
        &claimed,
        f_id,
        payload_for(&claimed, &[1; 13]).into_bytes(),
        fetched_at,
    )
    .unwrap();
    assert_eq!(
        repo.request_status(claimed.r_id).unwrap(),
        Some(RequestStatus::Running)
    );

    let replayed = recovery::recover_staged(&repo, true).unwrap();
    assert_eq!(replayed, 1);
    assert_eq!(
        repo.request_status(claimed.r_id).unwrap(),
        Some(RequestStatus::Done)
    );
    assert_eq!(repo.staging_count().unwrap(), 0);
    // The completion time is the original fetch instant, not the replay.
    assert_eq!(
        repo.request_completed_at(claimed.r_id).unwrap(),
        Some(fetched_at)
    );
}

/// Write an executable fetch script into `dir`.
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

#[tokio::test]
async fn local_transport_runs_the_fetch_script() {
    let (repo, dir) = setup();
    let k_id = repo.intern_keyword("fever", None).unwrap();
    queue_eligible(&repo, k_id, 0, None, Utc::now() + Duration::hours(1));
    let claimed = claim(&repo).unwrap();

    let payload = payload_for(&claimed, &[7; 13]);
    let payload_path = dir.path().join("payload.json");
    fs::write(&payload_path, &payload).unwrap();
    let script = write_script(
        dir.path(),
        "fetch.sh",
        &format!("#!/bin/sh\ncat {}\n", payload_path.display()),
    );

    let transport = Transport::local(script, "web".to_string());
    let raw = transport
        .fetch("2022-01-01T00 2022-01-01T12", &claimed.keyword, None)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(raw.clone()).unwrap().trim(), payload);

    let f_id = repo.intern_fetcher(&transport.identity()).unwrap();
    let staged = ingest::stage(&repo, &claimed, f_id, payload.into_bytes(), Utc::now()).unwrap();
    ingest::process_staged(&repo, &staged).unwrap();
    assert_eq!(
        repo.request_status(claimed.r_id).unwrap(),
        Some(RequestStatus::Done)
    );
}

#[tokio::test]
async fn exit_code_five_is_a_structured_upstream_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "fetch.sh",
        "#!/bin/sh\necho '{\"error\":{\"code\":500,\"msg\":\"The request failed\"}}'\nexit 5\n",
    );

    let transport = Transport::local(script, "web".to_string());
    let err = transport
        .fetch("2022-01-01T00 2022-01-01T12", "fever", None)
        .await
        .unwrap_err();
    match err {
        FetchError::Response { code, msg } => {
            assert_eq!(code, 500);
            assert_eq!(msg, "The request failed");
        }
        other => panic!("expected a structured error, got {other:?}"),
    }
    assert!(transport
        .fetch("w", "k", None)
        .await
        .unwrap_err()
        .is_server_error());
}

#[tokio::test]
async fn other_nonzero_exits_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "fetch.sh",
        "#!/bin/sh\necho 'wedged' >&2\nexit 3\n",
    );

    let transport = Transport::local(script, "web".to_string());
    let err = transport
        .fetch("2022-01-01T00 2022-01-01T12", "fever", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Fatal(_)));
}

#[tokio::test]
async fn dispatcher_exits_cleanly_when_the_queue_is_drained() {
    let (repo, dir) = setup();
    let script = write_script(dir.path(), "fetch.sh", "#!/bin/sh\nexit 1\n");

    let mut dispatcher = Dispatcher::new(
        repo,
        vec![Transport::local(script, "web".to_string())],
        true,
    )
    .unwrap();
    // Nothing queued: the first iteration claims nothing and exits 0
    // without ever invoking the fetch script.
    dispatcher.run().await.unwrap();
}

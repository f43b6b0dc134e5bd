use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use jobhunt_core::jobs::{
    JobFilter, JobPosting, JobStatus, JobStoreError, Recommendation, ScoreResult, SqliteJobStore,
};

fn temp_store(dir: &Path) -> SqliteJobStore {
    let store = SqliteJobStore::builder(dir.join("jobs.db")).build();
    store.initialize().expect("initialize store");
    store
}

fn posting(title: &str, url: &str) -> JobPosting {
    JobPosting {
        title: title.into(),
        company: "Acme".into(),
        url: url.into(),
        location: Some("Remote".into()),
        description: Some("A role.".into()),
        remote: true,
        salary: Some("$90k".into()),
    }
}

fn score(value: u8) -> ScoreResult {
    ScoreResult {
        score: value,
        recommendation: Recommendation::Yes,
        reason: "good fit".into(),
    }
}

#[test]
fn enqueue_claim_route_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store
        .enqueue("job-a", &posting("Backend Engineer", "https://example.test/a"), Some(&score(8)))
        .unwrap();
    store
        .enqueue("job-b", &posting("Data Engineer", "https://example.test/b"), Some(&score(7)))
        .unwrap();

    let claimed = store.claim_pending().unwrap().expect("a job is claimable");
    assert_eq!(claimed.job_id, "job-a");
    assert_eq!(claimed.status, JobStatus::InProgress);
    assert_eq!(claimed.attempts, 1);
    assert_eq!(claimed.score, Some(8));

    store
        .route("job-a", JobStatus::Applied, None)
        .unwrap();
    let applied = store.fetch("job-a").unwrap().expect("job exists");
    assert_eq!(applied.status, JobStatus::Applied);
    assert_eq!(applied.last_error, None);

    let next = store.claim_pending().unwrap().expect("second job claims");
    assert_eq!(next.job_id, "job-b");

    store
        .route("job-b", JobStatus::Failed, Some("max steps reached"))
        .unwrap();
    let failed = store.fetch("job-b").unwrap().expect("job exists");
    assert_eq!(failed.last_error.as_deref(), Some("max steps reached"));

    assert!(store.claim_pending().unwrap().is_none());

    let counts = store.counts().unwrap();
    assert_eq!(counts[&JobStatus::Applied], 1);
    assert_eq!(counts[&JobStatus::Failed], 1);
    assert_eq!(counts[&JobStatus::Pending], 0);
}

#[test]
fn duplicate_urls_are_ignored_on_enqueue() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    let first = store
        .enqueue("job-a", &posting("Backend Engineer", "https://example.test/a"), None)
        .unwrap();
    assert_eq!(first.as_deref(), Some("job-a"));

    let second = store
        .enqueue("job-b", &posting("Backend Engineer again", "https://example.test/a"), None)
        .unwrap();
    assert_eq!(second, None);

    assert!(store.knows_url("https://example.test/a").unwrap());
    assert!(!store.knows_url("https://example.test/other").unwrap());
}

#[test]
fn a_routed_job_cannot_be_routed_twice() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store
        .enqueue("job-a", &posting("Backend Engineer", "https://example.test/a"), None)
        .unwrap();
    store.claim_pending().unwrap().expect("claims");
    store.route("job-a", JobStatus::Manual, Some("login required")).unwrap();

    let err = store
        .route("job-a", JobStatus::Failed, Some("should not land"))
        .unwrap_err();
    match err {
        JobStoreError::AlreadyRouted { job_id, status } => {
            assert_eq!(job_id, "job-a");
            assert_eq!(status, JobStatus::Manual);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The first routing note is untouched.
    let job = store.fetch("job-a").unwrap().expect("job exists");
    assert_eq!(job.status, JobStatus::Manual);
    assert_eq!(job.last_error.as_deref(), Some("login required"));
}

#[test]
fn routing_an_unknown_job_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let err = store
        .route("job-missing", JobStatus::Applied, None)
        .unwrap_err();
    assert!(matches!(err, JobStoreError::NotFound(_)));
}

#[test]
fn release_undoes_a_claim() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store
        .enqueue("job-a", &posting("Backend Engineer", "https://example.test/a"), None)
        .unwrap();
    store.claim_pending().unwrap().expect("claims");
    store.release("job-a").unwrap();

    let job = store.fetch("job-a").unwrap().expect("job exists");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
}

#[test]
fn stale_claims_return_to_pending() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store
        .enqueue("job-a", &posting("Backend Engineer", "https://example.test/a"), None)
        .unwrap();
    store.claim_pending().unwrap().expect("claims");

    // Fresh claims stay put under a generous cutoff.
    assert_eq!(store.release_stale(Duration::from_secs(3600)).unwrap(), 0);

    std::thread::sleep(Duration::from_millis(1100));
    let released = store.release_stale(Duration::from_secs(0)).unwrap();
    assert_eq!(released, 1);
    let job = store.fetch("job-a").unwrap().expect("job exists");
    assert_eq!(job.status, JobStatus::Pending);
}

#[test]
fn history_keeps_every_transition() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store
        .enqueue("job-a", &posting("Backend Engineer", "https://example.test/a"), None)
        .unwrap();
    store.claim_pending().unwrap().expect("claims");
    store
        .route("job-a", JobStatus::Manual, Some("login required"))
        .unwrap();

    let history = store.history("job-a").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status_from, "pending");
    assert_eq!(history[0].status_to, "in_progress");
    assert_eq!(history[1].status_to, "manual");
    assert_eq!(history[1].note.as_deref(), Some("login required"));
}

#[test]
fn long_routing_notes_are_truncated() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store
        .enqueue("job-a", &posting("Backend Engineer", "https://example.test/a"), None)
        .unwrap();
    store.claim_pending().unwrap().expect("claims");

    let long_note = "x".repeat(800);
    store
        .route("job-a", JobStatus::Failed, Some(&long_note))
        .unwrap();
    let job = store.fetch("job-a").unwrap().expect("job exists");
    assert_eq!(job.last_error.map(|note| note.len()), Some(500));
}

#[test]
fn list_filters_by_status_and_company() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store
        .enqueue("job-a", &posting("Backend Engineer", "https://example.test/a"), None)
        .unwrap();
    let mut other = posting("Support Engineer", "https://example.test/b");
    other.company = "Globex".into();
    store.enqueue("job-b", &other, None).unwrap();
    store.claim_pending().unwrap().expect("claims");
    store.route("job-a", JobStatus::Applied, None).unwrap();

    let applied = store
        .list(&JobFilter {
            status: Some(JobStatus::Applied),
            ..JobFilter::default()
        })
        .unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].job_id, "job-a");

    let globex = store
        .list(&JobFilter {
            company: Some("Globex".into()),
            ..JobFilter::default()
        })
        .unwrap();
    assert_eq!(globex.len(), 1);
    assert_eq!(globex[0].job_id, "job-b");

    let limited = store
        .list(&JobFilter {
            limit: Some(1),
            ..JobFilter::default()
        })
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[test]
fn status_export_writes_a_json_array() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store
        .enqueue("job-a", &posting("Backend Engineer", "https://example.test/a"), Some(&score(9)))
        .unwrap();
    store.claim_pending().unwrap().expect("claims");
    store.route("job-a", JobStatus::Applied, None).unwrap();

    let out = dir.path().join("applied.json");
    let exported = store.export_status_json(JobStatus::Applied, &out).unwrap();
    assert_eq!(exported, 1);

    let raw = std::fs::read_to_string(&out).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.as_array().map(Vec::len), Some(1));
    assert_eq!(parsed[0]["job_id"], "job-a");
    assert_eq!(parsed[0]["status"], "applied");
    assert_eq!(parsed[0]["score"], 9);
}

#[test]
fn backup_produces_a_working_copy() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store
        .enqueue("job-a", &posting("Backend Engineer", "https://example.test/a"), None)
        .unwrap();

    let backup_path = dir.path().join("backup.db");
    store.backup_to(&backup_path).unwrap();

    let copy = SqliteJobStore::builder(&backup_path).read_only(true).build();
    let job = copy.fetch("job-a").unwrap().expect("backup holds the job");
    assert_eq!(job.title, "Backend Engineer");
}

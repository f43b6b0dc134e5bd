use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::{stream, StreamExt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ConfigBundle;
use crate::jobs::{new_job_id, JobPosting, JobStoreError, Recommendation, ScoreResult, SqliteJobStore};
use crate::llm::ModelClient;
use crate::profile::ApplicantProfile;

mod prefilter;
mod scorer;
mod source;

pub use prefilter::Prefilter;
pub use scorer::JobScorer;
pub use source::{JobSource, JsonFeedSource};

pub type HuntResult<T> = Result<T, HuntError>;

#[derive(Debug, Error)]
pub enum HuntError {
    #[error("feed {path} unreadable: {source}")]
    Feed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("feed parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid reject pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
}

#[derive(Debug, Default, Serialize)]
pub struct HuntStats {
    pub fetched: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub scored: usize,
    pub enqueued: usize,
    pub skipped: usize,
    pub source_errors: usize,
    pub duration_seconds: u64,
}

struct ScoredJob {
    posting: JobPosting,
    score: ScoreResult,
}

/// One hunt pass: fetch every source, drop what the prefilter or the store
/// already rules out, score the rest in a bounded pool and enqueue the
/// winners remote-first by the configured ratio.
pub struct HuntLoop {
    store: SqliteJobStore,
    scorer: JobScorer,
    prefilter: Prefilter,
    profile: ApplicantProfile,
    min_score: u8,
    remote_ratio: f64,
    max_jobs: usize,
    score_workers: usize,
}

impl HuntLoop {
    pub fn new(
        store: SqliteJobStore,
        client: Arc<dyn ModelClient>,
        profile: ApplicantProfile,
        bundle: &ConfigBundle,
    ) -> HuntResult<Self> {
        Ok(Self {
            scorer: JobScorer::new(client, &bundle.models.scorer),
            prefilter: Prefilter::from_config(&bundle.jobhunt.hunt)?,
            profile,
            min_score: bundle.jobhunt.hunt.min_score,
            remote_ratio: bundle.jobhunt.hunt.remote_ratio,
            max_jobs: bundle.jobhunt.hunt.max_jobs,
            score_workers: bundle.jobhunt.hunt.score_workers.max(1),
            store,
        })
    }

    pub async fn run(&self, sources: &[Box<dyn JobSource>]) -> HuntResult<HuntStats> {
        let mut rng = ChaCha20Rng::from_entropy();
        self.run_seeded(sources, &mut rng).await
    }

    /// Same as [`run`](Self::run) with a caller-provided RNG, so the
    /// interleave order is reproducible under a fixed seed.
    pub async fn run_seeded<R>(
        &self,
        sources: &[Box<dyn JobSource>],
        rng: &mut R,
    ) -> HuntResult<HuntStats>
    where
        R: Rng + ?Sized,
    {
        let started = Instant::now();
        let mut stats = HuntStats::default();
        let mut candidates: Vec<JobPosting> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for source in sources {
            let postings = match source.fetch().await {
                Ok(postings) => postings,
                Err(err) => {
                    warn!(source = source.name(), error = %err, "feed failed, skipping source");
                    stats.source_errors += 1;
                    continue;
                }
            };
            stats.fetched += postings.len();
            for posting in postings {
                if let Some(reason) = self.prefilter.rejection(&posting) {
                    debug!(title = %posting.title, url = %posting.url, reason = %reason, "prefilter rejected");
                    stats.rejected += 1;
                    continue;
                }
                if !seen.insert(posting.url.clone()) || self.store.knows_url(&posting.url)? {
                    stats.duplicates += 1;
                    continue;
                }
                candidates.push(posting);
            }
        }
        info!(
            fetched = stats.fetched,
            candidates = candidates.len(),
            rejected = stats.rejected,
            duplicates = stats.duplicates,
            "hunt candidates gathered"
        );

        let scored: Vec<ScoredJob> = stream::iter(candidates)
            .map(|posting| async move {
                let score = self.scorer.score(&posting, &self.profile).await;
                ScoredJob { posting, score }
            })
            .buffered(self.score_workers)
            .collect()
            .await;
        stats.scored = scored.len();

        let (passing, failing): (Vec<ScoredJob>, Vec<ScoredJob>) =
            scored.into_iter().partition(|job| {
                job.score.recommendation == Recommendation::Yes
                    && job.score.score >= self.min_score
            });

        for job in &failing {
            let reason = format!(
                "score {} {}: {}",
                job.score.score, job.score.recommendation, job.score.reason
            );
            self.store
                .record_skipped(&new_job_id(), &job.posting, Some(&job.score), &reason)?;
            stats.skipped += 1;
        }

        let ordered = interleave_by_remote_ratio(passing, self.remote_ratio, rng);
        for job in ordered.into_iter().take(self.max_jobs) {
            match self
                .store
                .enqueue(&new_job_id(), &job.posting, Some(&job.score))?
            {
                Some(job_id) => {
                    info!(
                        job_id = %job_id,
                        title = %job.posting.title,
                        company = %job.posting.company,
                        score = job.score.score,
                        "job enqueued"
                    );
                    stats.enqueued += 1;
                }
                None => stats.duplicates += 1,
            }
        }

        stats.duration_seconds = started.elapsed().as_secs();
        info!(
            enqueued = stats.enqueued,
            skipped = stats.skipped,
            scored = stats.scored,
            duration_seconds = stats.duration_seconds,
            "hunt finished"
        );
        Ok(stats)
    }
}

/// Orders gated jobs so each prefix of the queue holds roughly `ratio`
/// remote work, best score first within each class. Deterministic as long
/// as the RNG is seeded with a reproducible seed.
fn interleave_by_remote_ratio<R>(jobs: Vec<ScoredJob>, ratio: f64, rng: &mut R) -> Vec<ScoredJob>
where
    R: Rng + ?Sized,
{
    let (remote, onsite): (Vec<ScoredJob>, Vec<ScoredJob>) =
        jobs.into_iter().partition(|job| job.posting.remote);
    let mut remote = sorted_by_score(remote);
    let mut onsite = sorted_by_score(onsite);
    let mut ordered = Vec::with_capacity(remote.len() + onsite.len());
    while !remote.is_empty() || !onsite.is_empty() {
        let pick_remote = if onsite.is_empty() {
            true
        } else if remote.is_empty() {
            false
        } else {
            rng.gen_bool(ratio.clamp(0.0, 1.0))
        };
        let source = if pick_remote { &mut remote } else { &mut onsite };
        if let Some(job) = source.pop() {
            ordered.push(job);
        }
    }
    ordered
}

/// Ascending so `pop` yields best-first.
fn sorted_by_score(mut jobs: Vec<ScoredJob>) -> Vec<ScoredJob> {
    jobs.sort_by_key(|job| job.score.score);
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(title: &str, remote: bool, score: u8) -> ScoredJob {
        ScoredJob {
            posting: JobPosting {
                title: title.into(),
                company: "Acme".into(),
                url: format!("https://www.indeed.com/viewjob?jk={title}"),
                location: None,
                description: None,
                remote,
                salary: None,
            },
            score: ScoreResult {
                score,
                recommendation: Recommendation::Yes,
                reason: String::new(),
            },
        }
    }

    fn titles(jobs: &[ScoredJob]) -> Vec<&str> {
        jobs.iter().map(|job| job.posting.title.as_str()).collect()
    }

    #[test]
    fn full_remote_ratio_puts_every_remote_job_first() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let ordered = interleave_by_remote_ratio(
            vec![
                job("onsite-a", false, 9),
                job("remote-a", true, 7),
                job("remote-b", true, 8),
            ],
            1.0,
            &mut rng,
        );
        assert_eq!(titles(&ordered), vec!["remote-b", "remote-a", "onsite-a"]);
    }

    #[test]
    fn zero_remote_ratio_puts_onsite_first() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let ordered = interleave_by_remote_ratio(
            vec![
                job("remote-a", true, 9),
                job("onsite-a", false, 6),
                job("onsite-b", false, 8),
            ],
            0.0,
            &mut rng,
        );
        assert_eq!(titles(&ordered), vec!["onsite-b", "onsite-a", "remote-a"]);
    }

    #[test]
    fn interleave_is_deterministic_for_a_fixed_seed() {
        let build = || {
            vec![
                job("remote-a", true, 9),
                job("remote-b", true, 8),
                job("remote-c", true, 7),
                job("onsite-a", false, 9),
                job("onsite-b", false, 8),
            ]
        };
        let mut rng_one = ChaCha20Rng::seed_from_u64(42);
        let mut rng_two = ChaCha20Rng::seed_from_u64(42);
        let first = interleave_by_remote_ratio(build(), 0.75, &mut rng_one);
        let second = interleave_by_remote_ratio(build(), 0.75, &mut rng_two);
        assert_eq!(titles(&first), titles(&second));
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn every_job_survives_the_interleave() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let ordered = interleave_by_remote_ratio(
            (0..20)
                .map(|idx| job(&format!("job-{idx}"), idx % 3 == 0, (idx % 10) as u8))
                .collect(),
            0.75,
            &mut rng,
        );
        assert_eq!(ordered.len(), 20);
    }
}

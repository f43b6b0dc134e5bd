use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::jobs::JobPosting;

use super::{HuntError, HuntResult};

/// A feed of job postings. Implementations decide where the postings come
/// from; the hunt loop only cares that a fetch yields a batch.
#[async_trait]
pub trait JobSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> HuntResult<Vec<JobPosting>>;
}

/// Reads postings from a JSON file holding an array of [`JobPosting`]
/// objects. Export scripts drop these files; the hunt picks them up.
pub struct JsonFeedSource {
    name: String,
    path: PathBuf,
}

impl JsonFeedSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl JobSource for JsonFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> HuntResult<Vec<JobPosting>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| HuntError::Feed {
                path: self.path.clone(),
                source,
            })?;
        let postings: Vec<JobPosting> = serde_json::from_str(&raw)?;
        debug!(source = %self.name, count = postings.len(), "feed loaded");
        Ok(postings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn feed_file_parses_into_postings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("feed.json");
        std::fs::write(
            &path,
            r#"[
                {"title": "Backend Engineer", "company": "Acme", "url": "https://www.indeed.com/viewjob?jk=1", "remote": true},
                {"title": "Data Engineer", "company": "Globex", "url": "https://www.indeed.com/viewjob?jk=2", "location": "Austin, TX"}
            ]"#,
        )
        .expect("write feed");

        let source = JsonFeedSource::new("export", &path);
        let postings = source.fetch().await.expect("feed parses");
        assert_eq!(postings.len(), 2);
        assert!(postings[0].remote);
        assert!(!postings[1].remote);
        assert_eq!(postings[1].location.as_deref(), Some("Austin, TX"));
    }

    #[tokio::test]
    async fn missing_feed_reports_the_path() {
        let source = JsonFeedSource::new("gone", "/nonexistent/feed.json");
        let err = source.fetch().await.expect_err("fetch fails");
        assert!(err.to_string().contains("/nonexistent/feed.json"));
    }
}

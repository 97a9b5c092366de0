//! Bucket resolution and display helpers.

use tracing::info;
use url::Url;

use crate::{Bucket, RemoteError, RemoteIndex};

/// Resolve the bucket named `name`, creating it if missing.
pub async fn ensure_bucket(index: &dyn RemoteIndex, name: &str) -> Result<Bucket, RemoteError> {
    if let Some(bucket) = index.list_buckets().await?.into_iter().find(|b| b.name == name) {
        info!(bucket = %bucket.name, id = bucket.id, "using existing bucket");
        return Ok(bucket);
    }

    let bucket = index.create_bucket(name).await?;
    info!(bucket = %bucket.name, id = bucket.id, "created bucket");
    Ok(bucket)
}

/// Find the bucket to query: exact name, then a bucket whose name contains
/// the first token of `name`, then the first bucket listed.
pub async fn find_bucket(index: &dyn RemoteIndex, name: &str) -> Result<Option<Bucket>, RemoteError> {
    let buckets = index.list_buckets().await?;

    if let Some(b) = buckets.iter().find(|b| b.name == name) {
        return Ok(Some(b.clone()));
    }

    let hint = name
        .split(['-', '_', ' '])
        .next()
        .unwrap_or(name)
        .to_lowercase();
    if !hint.is_empty() {
        if let Some(b) = buckets.iter().find(|b| b.name.to_lowercase().contains(&hint)) {
            return Ok(Some(b.clone()));
        }
    }

    Ok(buckets.into_iter().next())
}

/// Readable title from the last path segment of a URL.
///
/// `https://www.itnb.ch/en/sovereign-cloud` -> `Sovereign Cloud`.
pub fn title_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return "Untitled".into();
    };

    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(String::from)
        .or_else(|| parsed.host_str().map(String::from))
        .unwrap_or_default();

    let title = segment
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    if title.is_empty() { "Untitled".into() } else { title }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::{ProcessState, SearchHit, UploadDocument, UploadOutcome};

    struct FakeIndex {
        buckets: Mutex<Vec<Bucket>>,
    }

    impl FakeIndex {
        fn with(names: &[&str]) -> Self {
            let buckets = names
                .iter()
                .enumerate()
                .map(|(i, n)| Bucket {
                    id: i as i64 + 1,
                    name: n.to_string(),
                })
                .collect();
            Self {
                buckets: Mutex::new(buckets),
            }
        }
    }

    #[async_trait]
    impl RemoteIndex for FakeIndex {
        async fn list_buckets(&self) -> Result<Vec<Bucket>, RemoteError> {
            Ok(self.buckets.lock().unwrap().clone())
        }

        async fn create_bucket(&self, name: &str) -> Result<Bucket, RemoteError> {
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = Bucket {
                id: 100 + buckets.len() as i64,
                name: name.into(),
            };
            buckets.push(bucket.clone());
            Ok(bucket)
        }

        async fn upload(&self, _: &Bucket, _: &[UploadDocument]) -> Result<UploadOutcome, RemoteError> {
            Ok(UploadOutcome::Batch)
        }

        async fn query(&self, _: &Bucket, _: &str, _: usize) -> Result<Vec<SearchHit>, RemoteError> {
            Ok(vec![])
        }

        async fn start_site_crawl(&self, _: &Bucket, _: &str, _: u32, _: usize) -> Result<String, RemoteError> {
            Ok("p".into())
        }

        async fn process_status(&self, _: &str) -> Result<ProcessState, RemoteError> {
            Ok(ProcessState::Complete)
        }
    }

    #[tokio::test]
    async fn ensure_bucket_reuses_or_creates() {
        let index = FakeIndex::with(&["other", "itnb-website-content"]);
        let b = ensure_bucket(&index, "itnb-website-content").await.unwrap();
        assert_eq!(b.id, 2);

        let created = ensure_bucket(&index, "fresh").await.unwrap();
        assert_eq!(created.name, "fresh");
        assert_eq!(index.list_buckets().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn find_bucket_falls_back_by_substring_then_first() {
        let index = FakeIndex::with(&["alpha", "ITNB-2024", "itnb-website-content"]);
        let exact = find_bucket(&index, "itnb-website-content").await.unwrap().unwrap();
        assert_eq!(exact.id, 3);

        let fuzzy = find_bucket(&index, "itnb-archive").await.unwrap().unwrap();
        assert_eq!(fuzzy.name, "ITNB-2024");

        let first = find_bucket(&index, "zzz").await.unwrap().unwrap();
        assert_eq!(first.name, "alpha");

        let empty = FakeIndex::with(&[]);
        assert!(find_bucket(&empty, "itnb").await.unwrap().is_none());
    }

    #[test]
    fn titles_from_urls() {
        assert_eq!(title_from_url("https://www.itnb.ch/en/sovereign-cloud"), "Sovereign Cloud");
        assert_eq!(title_from_url("https://www.itnb.ch/en/about/"), "About");
        assert_eq!(title_from_url("https://www.itnb.ch/en"), "En");
        assert_eq!(title_from_url("https://www.itnb.ch/"), "Www.itnb.ch");
        assert_eq!(title_from_url("Unknown"), "Untitled");
    }
}

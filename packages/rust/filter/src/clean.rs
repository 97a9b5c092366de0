//! Body text cleanup and content fingerprinting.
//!
//! Cleanup runs before the word-count check and before fingerprinting, so
//! boilerplate such as cookie banners never makes two renders of the same
//! page look different.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use sitecorpus_shared::{DocumentId, Result, SiteCorpusError};

static MULTI_BLANK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Removes configured boilerplate patterns from rendered text.
#[derive(Debug, Clone)]
pub struct TextCleaner {
    strip: Vec<Regex>,
}

impl TextCleaner {
    /// Compile the strip patterns. An invalid pattern is a config error.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let strip = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    SiteCorpusError::config(format!("invalid strip pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { strip })
    }

    /// Strip boilerplate, collapse runs of blank lines, and trim.
    pub fn clean(&self, text: &str) -> String {
        let mut result = text.replace("\r\n", "\n");
        for re in &self.strip {
            result = re.replace_all(&result, "").into_owned();
        }
        MULTI_BLANK_RE
            .replace_all(&result, "\n\n")
            .trim()
            .to_string()
    }
}

/// Whitespace-collapsed, lower-cased form of `text` used for fingerprinting.
pub fn normalize_for_fingerprint(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Content fingerprint: hex SHA-256 of the normalized text.
pub fn fingerprint(text: &str) -> DocumentId {
    let mut hasher = Sha256::new();
    hasher.update(normalize_for_fingerprint(text).as_bytes());
    DocumentId(format!("{:x}", hasher.finalize()))
}

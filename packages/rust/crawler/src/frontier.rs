//! Crawl frontier: discovered URL records, the fetch queue, and scope rules.
//!
//! A [`Frontier`] is owned by one crawl run and mutated only by the crawl
//! loop, so the seen-set has a single writer. Records are never removed;
//! a URL is handed out for fetching at most once per run.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

use tracing::debug;
use url::Url;

use sitecorpus_shared::{CrawlConfig, Result, SiteCorpusError, UrlRecord};

/// A URL claimed for fetching, with its link depth from the nearest seed.
#[derive(Debug, Clone)]
pub struct QueuedUrl {
    pub url: Url,
    pub depth: u32,
}

/// The set of URLs known to a crawl run.
pub struct Frontier {
    scope: CrawlScope,
    max_depth: u32,
    records: Vec<UrlRecord>,
    index: HashMap<String, usize>,
    queue: VecDeque<QueuedUrl>,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl Frontier {
    /// Build a frontier for `config.seed_urls`. The first seed sets the crawl domain.
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let seeds = config
            .seed_urls
            .iter()
            .map(|s| {
                Url::parse(s)
                    .map_err(|e| SiteCorpusError::validation(format!("invalid seed URL '{s}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let root = seeds
            .first()
            .ok_or_else(|| SiteCorpusError::config("at least one seed URL is required"))?;

        let mut frontier = Self {
            scope: CrawlScope::new(root, config),
            max_depth: config.depth,
            records: Vec::new(),
            index: HashMap::new(),
            queue: VecDeque::new(),
            allow_localhost: false,
        };
        for seed in &seeds {
            frontier.discover(seed, None, 0);
        }
        Ok(frontier)
    }

    /// Allow fetching localhost/private IPs. Seeds already recorded are re-queued.
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        let pending: Vec<(String, Option<String>)> = self
            .records
            .iter()
            .filter(|r| !r.visited)
            .map(|r| (r.url.clone(), r.discovered_from.clone()))
            .collect();
        self.records.clear();
        self.index.clear();
        self.queue.clear();
        for (url, parent) in pending {
            if let Ok(url) = Url::parse(&url) {
                self.discover(&url, parent.as_deref(), 0);
            }
        }
        self
    }

    /// Record a discovered URL. Returns `true` if it was new and queued for fetching.
    ///
    /// Off-domain, excluded, or too-deep URLs are recorded but never queued.
    pub fn discover(&mut self, url: &Url, discovered_from: Option<&str>, depth: u32) -> bool {
        let normalized = normalize_url(url);
        if self.index.contains_key(&normalized) {
            return false;
        }

        self.index.insert(normalized.clone(), self.records.len());
        self.records.push(UrlRecord {
            url: normalized.clone(),
            discovered_from: discovered_from.map(String::from),
            visited: false,
        });

        if depth > self.max_depth {
            debug!(url = %normalized, depth, "recorded, beyond max depth");
            return false;
        }
        if !self.scope.in_scope(url) {
            debug!(url = %normalized, "recorded, out of scope");
            return false;
        }
        if !self.allow_localhost && is_ssrf_target(url) {
            debug!(url = %normalized, "recorded, blocked private target");
            return false;
        }

        match Url::parse(&normalized) {
            Ok(url) => {
                self.queue.push_back(QueuedUrl { url, depth });
                true
            }
            Err(_) => false,
        }
    }

    /// Take up to `n` queued URLs for fetching, marking each visited.
    pub fn claim(&mut self, n: usize) -> Vec<QueuedUrl> {
        let mut claimed = Vec::with_capacity(n);
        while claimed.len() < n {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            let key = normalize_url(&next.url);
            let Some(&i) = self.index.get(&key) else {
                continue;
            };
            if self.records[i].visited {
                continue;
            }
            self.records[i].visited = true;
            claimed.push(next);
        }
        claimed
    }

    /// Whether any URL is still waiting to be fetched.
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// All URL records discovered so far, in discovery order.
    pub fn records(&self) -> &[UrlRecord] {
        &self.records
    }

    /// Look up the record for a URL.
    pub fn record(&self, url: &Url) -> Option<&UrlRecord> {
        self.index
            .get(&normalize_url(url))
            .map(|&i| &self.records[i])
    }

    pub fn visited_count(&self) -> usize {
        self.records.iter().filter(|r| r.visited).count()
    }
}

// ---------------------------------------------------------------------------
// Scope checking
// ---------------------------------------------------------------------------

/// Determines which URLs are "in scope" for a crawl.
struct CrawlScope {
    /// Registrable domain URLs must share with the first seed.
    domain: String,
    /// Include patterns (if non-empty, path must match at least one).
    include_patterns: Vec<regex::Regex>,
    /// Exclude patterns (if path matches any, it's excluded).
    exclude_patterns: Vec<regex::Regex>,
}

impl CrawlScope {
    fn new(root: &Url, config: &CrawlConfig) -> Self {
        let domain = registrable_domain(root.host_str().unwrap_or(""));

        let include_patterns = config
            .include_patterns
            .iter()
            .filter_map(|p| glob_to_regex(p))
            .collect();

        let exclude_patterns = config
            .exclude_patterns
            .iter()
            .filter_map(|p| glob_to_regex(p))
            .collect();

        Self {
            domain,
            include_patterns,
            exclude_patterns,
        }
    }

    fn in_scope(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }

        if registrable_domain(url.host_str().unwrap_or("")) != self.domain {
            return false;
        }

        let path = url.path();

        if self.exclude_patterns.iter().any(|p| p.is_match(path)) {
            return false;
        }

        if !self.include_patterns.is_empty() {
            return self.include_patterns.iter().any(|p| p.is_match(path));
        }

        true
    }
}

/// Convert a glob-like pattern to a regex.
fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    regex::Regex::new(&format!("^{escaped}$")).ok()
}

/// Second-level labels that form part of a public suffix under a ccTLD (`co.uk`).
const SECOND_LEVEL_SUFFIXES: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu"];

/// Reduce a host to its registrable domain (`www.docs.itnb.ch` -> `itnb.ch`).
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<IpAddr>().is_ok() || host.starts_with('[') {
        return host;
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }

    let n = labels.len();
    let tld = labels[n - 1];
    let second = labels[n - 2];
    let keep = if tld.len() == 2 && SECOND_LEVEL_SUFFIXES.contains(&second) {
        3
    } else {
        2
    };
    labels[n - keep..].join(".")
}

/// Normalize a URL for deduplication: scheme + host + path, no query or
/// fragment, no trailing slash except on the root path.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized.set_query(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && normalized.path() != "/" {
        s.pop();
    }
    s
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain_utils::{MAX_NAME_LEN, Target, extract_host, is_valid_label};

/// Identifier of the technique that proposed a name (`subfinder`, `crtsh`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A discovered, not-yet-validated subdomain together with its attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub sources: BTreeSet<SourceId>,
    pub first_seen: DateTime<Utc>,
}

/// Why a raw name did not become a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RejectReason {
    Empty,
    InvalidLabel,
    TooLong,
    OutOfScope,
    Apex,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Empty => "empty",
            RejectReason::InvalidLabel => "invalid-label",
            RejectReason::TooLong => "too-long",
            RejectReason::OutOfScope => "out-of-scope",
            RejectReason::Apex => "apex",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Canonical name the raw input mapped to.
    pub name: String,
    /// True only for the call that created the candidate.
    pub created: bool,
}

/// Canonicalize a raw name and check it against the DNS grammar and the
/// target scope.
pub fn normalize(raw: &str, target: &Target) -> Result<String, RejectReason> {
    let Some(name) = extract_host(raw) else {
        return Err(RejectReason::Empty);
    };
    if name.len() > MAX_NAME_LEN {
        return Err(RejectReason::TooLong);
    }
    if !name.split('.').all(is_valid_label) {
        return Err(RejectReason::InvalidLabel);
    }
    if name == target.as_str() {
        return Err(RejectReason::Apex);
    }
    if !target.contains(&name) {
        return Err(RejectReason::OutOfScope);
    }
    Ok(name)
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, Candidate>,
    rejected: BTreeMap<RejectReason, u64>,
}

/// Identity-keyed candidate set shared by every producer of a run.
///
/// All mutation goes through one mutex, so creation happens exactly once per
/// canonical name no matter how many adapters race on it.
pub struct CandidateSet {
    target: Target,
    inner: Mutex<Inner>,
}

impl CandidateSet {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Normalize `raw` and merge it under `source`.
    pub fn ingest(&self, raw: &str, source: &SourceId) -> Result<IngestOutcome, RejectReason> {
        self.merge(raw, Some(source))
    }

    /// Add a name with no source attribution (critical-pattern hits).
    pub fn insert_unattributed(&self, raw: &str) -> Result<IngestOutcome, RejectReason> {
        self.merge(raw, None)
    }

    fn merge(&self, raw: &str, source: Option<&SourceId>) -> Result<IngestOutcome, RejectReason> {
        let normalized = normalize(raw, &self.target);
        let mut inner = self.inner.lock();
        let name = match normalized {
            Ok(name) => name,
            Err(reason) => {
                *inner.rejected.entry(reason).or_insert(0) += 1;
                return Err(reason);
            }
        };

        let mut created = false;
        let entry = inner.map.entry(name.clone()).or_insert_with(|| {
            created = true;
            Candidate {
                name: name.clone(),
                sources: BTreeSet::new(),
                first_seen: Utc::now(),
            }
        });
        if let Some(source) = source {
            entry.sources.insert(source.clone());
        }
        Ok(IngestOutcome { name, created })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().map.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Candidate> {
        self.inner.lock().map.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names proposed by at least one source.
    pub fn attributed_len(&self) -> usize {
        self.inner
            .lock()
            .map
            .values()
            .filter(|c| !c.sources.is_empty())
            .count()
    }

    /// All candidates sorted by name.
    pub fn snapshot(&self) -> Vec<Candidate> {
        let mut v: Vec<_> = self.inner.lock().map.values().cloned().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    /// Number of distinct candidates each source contributed.
    pub fn per_source_counts(&self) -> BTreeMap<String, usize> {
        let inner = self.inner.lock();
        let mut counts = BTreeMap::new();
        for candidate in inner.map.values() {
            for source in &candidate.sources {
                *counts.entry(source.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Rejection counters keyed by reason.
    pub fn rejections(&self) -> BTreeMap<String, u64> {
        self.inner
            .lock()
            .rejected
            .iter()
            .map(|(r, n)| (r.as_str().to_string(), *n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn set() -> CandidateSet {
        CandidateSet::new(Target::parse("example.com").unwrap())
    }

    #[test]
    fn test_merge_is_idempotent() {
        let set = set();
        let crt = SourceId::new("crtsh");
        let first = set.ingest("API.example.com.", &crt).unwrap();
        assert!(first.created);
        let second = set.ingest("https://api.example.com:443/x", &crt).unwrap();
        assert!(!second.created);
        set.ingest("api.example.com", &SourceId::new("subfinder"))
            .unwrap();

        let c = set.get("api.example.com").unwrap();
        assert_eq!(c.sources.len(), 2);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_rejections_are_counted() {
        let set = set();
        let src = SourceId::new("test");
        assert_eq!(set.ingest("", &src), Err(RejectReason::Empty));
        assert_eq!(
            set.ingest("bad_name!.example.com", &src),
            Err(RejectReason::InvalidLabel)
        );
        assert_eq!(
            set.ingest("www.other.org", &src),
            Err(RejectReason::OutOfScope)
        );
        assert_eq!(set.ingest("example.com", &src), Err(RejectReason::Apex));
        assert_eq!(
            set.ingest("evilexample.com", &src),
            Err(RejectReason::OutOfScope)
        );
        assert!(set.is_empty());

        let r = set.rejections();
        assert_eq!(r.get("out-of-scope"), Some(&2));
        assert_eq!(r.get("apex"), Some(&1));
        assert_eq!(r.get("invalid-label"), Some(&1));
    }

    #[test]
    fn test_wildcard_prefix_and_too_long() {
        let target = Target::parse("example.com").unwrap();
        assert_eq!(
            normalize("*.cdn.example.com", &target).as_deref(),
            Ok("cdn.example.com")
        );
        let long = format!("{}.example.com", vec!["abcdefghij"; 23].join("."));
        assert_eq!(normalize(&long, &target), Err(RejectReason::TooLong));
    }

    #[test]
    fn test_unattributed_insert() {
        let set = set();
        set.insert_unattributed("staging.example.com").unwrap();
        assert_eq!(set.attributed_len(), 0);
        set.ingest("staging.example.com", &SourceId::new("amass"))
            .unwrap();
        assert_eq!(set.attributed_len(), 1);
        assert_eq!(set.per_source_counts().get("amass"), Some(&1));
    }

    #[test]
    fn test_exactly_once_creation_under_contention() {
        let set = Arc::new(set());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || {
                    let src = SourceId::new(format!("src{i}"));
                    (0..100)
                        .filter(|n| {
                            set.ingest(&format!("h{}.example.com", n % 10), &src)
                                .unwrap()
                                .created
                        })
                        .count()
                })
            })
            .collect();
        let created: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(created, 10);
        assert_eq!(set.len(), 10);
        assert!(set.snapshot().iter().all(|c| c.sources.len() == 8));
    }
}

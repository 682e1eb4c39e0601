//! Second-wave guesses derived from names already discovered.
//!
//! Base words are pulled out of every known prefix (`shop-eu.example.com`
//! yields `shop`) and recombined with environment, service, version and
//! number affixes. The resulting labels are resolved by a regular
//! [`WordlistBruteforceAdapter`](super::WordlistBruteforceAdapter).

use std::collections::BTreeSet;

use crate::domain_utils::{Target, is_valid_label};

pub const SOURCE_ID: &str = "permutations";

const ENVIRONMENTS: &[&str] = &[
    "dev", "development", "staging", "stage", "stg", "prod", "production", "test", "testing",
    "qa", "uat", "demo", "beta", "alpha", "preview", "sandbox", "lab", "canary", "internal",
    "external", "private", "public",
];

const SERVICES: &[&str] = &[
    "api", "app", "admin", "portal", "dashboard", "panel", "manage", "auth", "login", "sso",
    "oauth", "gateway", "proxy", "cdn", "mail", "smtp", "imap", "webmail", "ftp", "sftp", "vpn",
    "db", "database", "mysql", "postgres", "redis", "cache", "elastic",
];

const VERSIONS: &[&str] = &["v1", "v2", "v3", "v4", "1", "2", "3", "01", "02", "03", "001", "002"];

const NUMBERS: &[&str] = &["1", "2", "3", "01", "02", "03", "001", "002"];

/// Words worth permuting: parts of at least three characters that are not
/// already an affix or a bare number.
pub fn base_words<'a, I>(known: I, target: &Target) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let suffix = format!(".{}", target.as_str());
    known
        .into_iter()
        .filter_map(|name| name.strip_suffix(suffix.as_str()))
        .flat_map(|prefix| prefix.split(['.', '-']))
        .filter(|part| {
            part.len() > 2
                && !part.bytes().all(|b| b.is_ascii_digit())
                && !ENVIRONMENTS.contains(part)
                && !VERSIONS.contains(part)
        })
        .map(str::to_string)
        .collect()
}

/// Prefix labels (relative to the target) to try, at most `max` of them,
/// excluding anything already in `known`.
pub fn generate<'a, I>(known: I, target: &Target, max: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    let bases = base_words(known.clone(), target);
    let existing: BTreeSet<&str> = known.into_iter().collect();

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut push = |label: String| {
        if out.len() >= max {
            return;
        }
        if !label.split('.').all(is_valid_label) {
            return;
        }
        if existing.contains(target.child(&label).as_str()) {
            return;
        }
        if seen.insert(label.clone()) {
            out.push(label);
        }
    };

    for base in &bases {
        for env in ENVIRONMENTS {
            push(format!("{env}-{base}"));
            push(format!("{env}.{base}"));
            push(format!("{base}-{env}"));
        }
        for svc in SERVICES {
            push(format!("{svc}-{base}"));
            push(format!("{base}-{svc}"));
        }
        for ver in VERSIONS {
            push(format!("{base}-{ver}"));
            push(format!("{base}{ver}"));
        }
        for num in NUMBERS {
            push(format!("{base}{num}"));
            push(format!("{base}-{num}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target::parse("example.com").unwrap()
    }

    #[test]
    fn base_words_skip_affixes_and_numbers() {
        let known = ["shop-eu.example.com", "dev.api.example.com", "v2.example.com", "123.example.com", "other.org"];
        let bases = base_words(known.iter().copied(), &target());
        assert_eq!(bases.into_iter().collect::<Vec<_>>(), vec!["api", "shop"]);
    }

    #[test]
    fn generated_labels_are_capped_and_novel() {
        let known = ["shop.example.com", "shop-dev.example.com"];
        let labels = generate(known.iter().copied(), &target(), 10_000);
        assert!(labels.contains(&"dev-shop".to_string()));
        assert!(labels.contains(&"shop-api".to_string()));
        assert!(labels.contains(&"shop01".to_string()));
        assert!(!labels.contains(&"shop-dev".to_string()));

        let unique: BTreeSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());

        let capped = generate(known.iter().copied(), &target(), 7);
        assert_eq!(capped.len(), 7);
    }

    #[test]
    fn nothing_to_permute() {
        let known: [&str; 0] = [];
        assert!(generate(known.iter().copied(), &target(), 100).is_empty());
    }
}

//! Generates short, unique DNS-label style names for injected sidecars.
//!
//! A name is composed as `<source>-<bucket>[-<deepest dir>]`, each part
//! truncated so that the sidecar and its derived volume names stay well below
//! the 63 character limit Kubernetes places on them.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use tracing::debug;

const NAME_REGEX: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";

static VALID_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NAME_REGEX).expect("name regex must compile"));

// Sized to fit filer names like `sasfs40`.
const SOURCE_LIMIT: usize = 7;
const BUCKET_LIMIT: usize = 5;
const DEEPEST_DIR_LIMIT: usize = 5;

const FINGERPRINT_LEN: usize = 8;

/// Names already handed out while building a single patch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsedNames(Vec<String>);

// === impl UsedNames ===

impl UsedNames {
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    fn insert(&mut self, name: String) {
        self.0.push(name);
    }
}

/// Returns whether `name` may be used as a container or volume name.
pub fn is_valid_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

/// Builds a name for the sidecar serving `mount_path` from `source` and
/// records it in `used`.
///
/// The result always satisfies [`is_valid_name`] and never collides with a
/// name already in `used`.
pub fn make_name_token(source: &str, mount_path: &str, used: &mut UsedNames) -> String {
    let dirs = mount_path.split('/').collect::<Vec<_>>();
    let bucket = dirs.first().copied().unwrap_or_default();

    let mut name = format!(
        "{}-{}",
        truncate(source, SOURCE_LIMIT),
        truncate(bucket, BUCKET_LIMIT)
    );
    if let [_, .., deepest] = dirs.as_slice() {
        name.push('-');
        name.push_str(truncate(deepest, DEEPEST_DIR_LIMIT));
    }

    let mut name = sanitize(&name);

    if used.contains(&name) {
        let mut ordinal = used.len() + 1;
        while used.contains(&format!("{name}-{ordinal}")) {
            ordinal += 1;
        }
        name = format!("{name}-{ordinal}");
    }

    used.insert(name.clone());
    name
}

/// Repairs `raw` until it satisfies the name grammar.
fn sanitize(raw: &str) -> String {
    let name = collapse(raw);
    if is_valid_name(&name) {
        return name;
    }

    let cleaned = collapse(
        &name
            .to_ascii_lowercase()
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '-' => c,
                _ => '-',
            })
            .collect::<String>(),
    );
    let cleaned = cleaned.trim_start_matches('-').to_string();
    if is_valid_name(&cleaned) {
        debug!(%raw, name = %cleaned, "Cleaned invalid name");
        return cleaned;
    }

    let fallback = if cleaned.is_empty() {
        fingerprint(raw)
    } else {
        format!("{cleaned}-{}", fingerprint(raw))
    };
    debug!(%raw, name = %fallback, "Using fingerprint for invalid name");
    fallback
}

/// Collapses doubled separators and trims trailing ones.
fn collapse(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out.trim_end_matches('-').to_string()
}

/// A short, stable, lowercase hex digest of `raw`.
fn fingerprint(raw: &str) -> String {
    let mut digest = format!("{:x}", Sha256::digest(raw.as_bytes()));
    digest.truncate(FINGERPRINT_LEN);
    digest
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

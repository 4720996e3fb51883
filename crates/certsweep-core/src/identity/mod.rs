//! Worker identity.
//!
//! Workers are anonymous peers; the name is only a stable, printable
//! handle for dashboards and assignment bookkeeping. When the operator
//! does not pick one, the hostname is hashed into two syllable words
//! plus a number, so restarts on the same machine keep the same name
//! without leaking the hostname itself.

use sha2::{Digest, Sha256};
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Syllables for generated names.
const WORDS: [&str; 16] = [
    "pin", "pon", "chin", "kan", "pafu", "doki", "bata", "kero", "piyo", "goro", "fuwu", "zun",
    "kyu", "pata", "ponk", "boon",
];

/// Longest accepted worker name.
const MAX_NAME_LEN: usize = 64;

/// Generates the default worker name from the hostname, falling back
/// to a random seed when the hostname is unavailable.
#[must_use]
pub fn default_worker_name() -> String {
    let seed = nix::unistd::gethostname()
        .ok()
        .and_then(|host| host.into_string().ok())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    name_from_seed(&seed)
}

/// Deterministic two-words-plus-number name from a seed string.
#[must_use]
pub fn name_from_seed(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let first = WORDS[usize::from(digest[0]) % WORDS.len()];
    let second = WORDS[usize::from(digest[1]) % WORDS.len()];
    let number = u16::from_be_bytes([digest[2], digest[3]]) % 10_000;
    format!("{first}-{second}-{number:04}")
}

/// Whether a candidate name is safe to use verbatim: non-empty, at
/// most 64 bytes, ASCII alphanumerics plus `-`, `_`, `.`.
#[must_use]
pub fn is_valid_worker_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Resolves the worker name: a valid operator-supplied candidate wins,
/// anything else falls back to [`default_worker_name`].
#[must_use]
pub fn resolve_worker_name(candidate: Option<&str>) -> String {
    match candidate.map(str::trim) {
        Some(name) if is_valid_worker_name(name) => name.to_string(),
        Some(name) => {
            tracing::warn!(
                rejected = %name,
                "worker name contains forbidden characters, generating one"
            );
            default_worker_name()
        }
        None => default_worker_name(),
    }
}

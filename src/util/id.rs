//! ID generation for issues.
//!
//! IDs have the form `<prefix>-<hash>` where hash is base36 lowercase
//! (0-9, a-z) and its length grows with the number of issues so the chance
//! of a collision stays bounded.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{BeadsError, Result};

/// Hash length used once the adaptive range is exhausted.
const FALLBACK_HASH_LENGTH: usize = 12;
/// Nonces tried at each length before the length grows.
const NONCES_PER_LENGTH: u32 = 10;
/// Nonces tried at the fallback length before giving up.
const FALLBACK_NONCES: u32 = 1000;

/// ID generation configuration.
#[derive(Debug, Clone)]
pub struct IdConfig {
    /// Issue ID prefix (e.g., "bd").
    pub prefix: String,
    pub min_hash_length: usize,
    pub max_hash_length: usize,
    /// Collision probability above which a longer hash is used.
    pub max_collision_prob: f64,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            prefix: "bd".to_string(),
            min_hash_length: 3,
            max_hash_length: 8,
            max_collision_prob: 0.25,
        }
    }
}

impl IdConfig {
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }
}

/// Inputs hashed into an ID.
#[derive(Debug, Clone, Copy)]
pub struct IdSeed<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub creator: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

impl IdSeed<'_> {
    fn render(&self, nonce: u32) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.title,
            self.description.unwrap_or(""),
            self.creator.unwrap_or(""),
            self.created_at.timestamp_nanos_opt().unwrap_or(0),
            nonce
        )
    }
}

/// Produces unique issue IDs.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    config: IdConfig,
}

impl IdGenerator {
    #[must_use]
    pub const fn new(config: IdConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Smallest hash length whose birthday-bound collision probability for
    /// `issue_count` IDs stays under the configured maximum.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap
    )]
    pub fn optimal_length(&self, issue_count: usize) -> usize {
        let n = issue_count as f64;
        for len in self.config.min_hash_length..=self.config.max_hash_length {
            let space = 36_f64.powi(len as i32);
            // P(collision) ≈ 1 - e^(-n²/2d)
            let prob = 1.0 - (-n * n / (2.0 * space)).exp();
            if prob < self.config.max_collision_prob {
                return len;
            }
        }
        self.config.max_hash_length
    }

    /// Generate an ID that `exists` reports as free.
    ///
    /// Walks nonces at the adaptive length, then longer lengths, then a
    /// fixed long hash.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if every candidate is taken, which only happens
    /// when `exists` is broken.
    pub fn generate<F>(&self, seed: &IdSeed<'_>, issue_count: usize, exists: F) -> Result<String>
    where
        F: Fn(&str) -> Result<bool>,
    {
        let start = self.optimal_length(issue_count);
        for length in start..=self.config.max_hash_length.max(start) {
            for nonce in 0..NONCES_PER_LENGTH {
                let id = self.candidate(seed, nonce, length);
                if !exists(&id)? {
                    return Ok(id);
                }
            }
        }

        for nonce in 0..FALLBACK_NONCES {
            let id = self.candidate(seed, nonce, FALLBACK_HASH_LENGTH);
            if !exists(&id)? {
                return Ok(id);
            }
        }

        Err(BeadsError::validation(
            "id",
            "could not find a free issue id after exhausting all candidates",
        ))
    }

    fn candidate(&self, seed: &IdSeed<'_>, nonce: u32, length: usize) -> String {
        let hash = compute_id_hash(&seed.render(nonce), length);
        format!("{}-{hash}", self.config.prefix)
    }
}

/// Base36 encoding of the first 8 bytes of SHA-256, left-padded and cut to `length`.
#[must_use]
pub fn compute_id_hash(input: &str, length: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let num = digest
        .iter()
        .take(8)
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte));

    let encoded = base36_encode(num);
    let padded = format!("{encoded:0>length$}");
    padded.chars().take(length).collect()
}

fn base36_encode(mut num: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if num == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while num > 0 {
        chars.push(ALPHABET[(num % 36) as usize] as char);
        num /= 36;
    }
    chars.into_iter().rev().collect()
}

/// Split an ID into `(prefix, hash)`.
///
/// The prefix may itself contain dashes; the hash is everything after the last one.
///
/// # Errors
///
/// Returns `InvalidId` if there is no dash, either side is empty, or the
/// hash is not lowercase base36.
pub fn split_id(id: &str) -> Result<(&str, &str)> {
    let invalid = || BeadsError::InvalidId { id: id.to_string() };
    let (prefix, hash) = id.rsplit_once('-').ok_or_else(invalid)?;
    if prefix.is_empty() || hash.is_empty() {
        return Err(invalid());
    }
    if !hash
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(invalid());
    }
    Ok((prefix, hash))
}

#[must_use]
pub fn is_valid_id_format(id: &str) -> bool {
    split_id(id).is_ok()
}

/// Check a prefix chosen at `init`.
///
/// # Errors
///
/// Returns `Validation` for empty prefixes or characters outside `[A-Za-z0-9_-]`.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(BeadsError::validation("prefix", "cannot be empty"));
    }
    if prefix.ends_with('-') {
        return Err(BeadsError::validation("prefix", "cannot end with '-'"));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(BeadsError::validation(
            "prefix",
            "only letters, digits, '-' and '_' are allowed",
        ));
    }
    Ok(())
}

/// Normalize user input into a full ID: lowercase, and `abc` becomes `<prefix>-abc`.
#[must_use]
pub fn normalize_id(input: &str, prefix: &str) -> String {
    let trimmed = input.trim().to_lowercase();
    if trimmed.contains('-') {
        trimmed
    } else {
        format!("{prefix}-{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::collections::HashSet;

    fn seed() -> IdSeed<'static> {
        IdSeed {
            title: "Fix login",
            description: None,
            creator: Some("alice"),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn optimal_length_grows_with_count() {
        let generator = IdGenerator::new(IdConfig::default());
        assert_eq!(generator.optimal_length(0), 3);
        assert!(generator.optimal_length(10_000) > generator.optimal_length(10));
        assert_eq!(generator.optimal_length(usize::MAX / 2), 8);
    }

    #[test]
    fn generate_is_deterministic_for_same_seed() {
        let generator = IdGenerator::new(IdConfig::with_prefix("proj"));
        let a = generator.generate(&seed(), 0, |_| Ok(false)).unwrap();
        let b = generator.generate(&seed(), 0, |_| Ok(false)).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("proj-"));
        assert_eq!(a.len(), "proj-".len() + 3);
    }

    #[test]
    fn generate_skips_taken_ids() {
        let generator = IdGenerator::new(IdConfig::default());
        let taken = RefCell::new(HashSet::new());
        for _ in 0..25 {
            let id = generator
                .generate(&seed(), 0, |candidate| Ok(taken.borrow().contains(candidate)))
                .unwrap();
            assert!(taken.borrow_mut().insert(id));
        }
    }

    #[test]
    fn split_handles_dashed_prefix() {
        assert_eq!(split_id("my-proj-a1b").unwrap(), ("my-proj", "a1b"));
        assert!(split_id("nodash").is_err());
        assert!(split_id("bd-ABC").is_err());
        assert!(split_id("-abc").is_err());
    }

    #[test]
    fn normalize_adds_prefix() {
        assert_eq!(normalize_id("A1B", "bd"), "bd-a1b");
        assert_eq!(normalize_id(" bd-x9 ", "bd"), "bd-x9");
    }

    #[test]
    fn prefix_validation() {
        assert!(validate_prefix("bd").is_ok());
        assert!(validate_prefix("my_proj-2").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("a b").is_err());
        assert!(validate_prefix("x-").is_err());
    }
}

//! On-disk form of a single article and the name transform shared by
//! article files and source directories.

use sha2::{Digest, Sha256};

use crate::article::Article;
use crate::error::StoreResult;

/// Longest name `slugify` produces, hash suffix included.
pub const MAX_NAME_LEN: usize = 60;

/// Hex characters of the SHA-256 digest appended to every name.
const HASH_LEN: usize = 16;

pub fn encode(article: &Article) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(article)?)
}

pub fn decode(bytes: &[u8]) -> StoreResult<Article> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Filename of the article stored under `url`.
pub fn filename_for(url: &str) -> String {
    slugify(url)
}

/// Derive a filesystem-safe name from arbitrary text.
///
/// The readable prefix keeps lowercase ASCII alphanumerics and collapses
/// everything else into single dashes. The hash suffix is computed over the
/// untouched input, so two inputs that share a prefix still get different
/// names and the same input always maps to the same name.
pub fn slugify(input: &str) -> String {
    let mut readable = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !readable.is_empty() {
                readable.push('-');
            }
            pending_dash = false;
            readable.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    let max_prefix = MAX_NAME_LEN - HASH_LEN - 1;
    if readable.len() > max_prefix {
        // ASCII only, so byte truncation is safe
        readable.truncate(max_prefix);
    }
    let prefix = readable.trim_end_matches('-');

    let digest = Sha256::digest(input.as_bytes());
    let hash = hex::encode(&digest[..HASH_LEN / 2]);

    if prefix.is_empty() {
        hash
    } else {
        format!("{}-{}", prefix, hash)
    }
}

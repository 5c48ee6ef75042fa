//! Content fingerprints for change detection.
//!
//! A fingerprint is the SHA-256 of the text truncated to 16 bytes and
//! rendered as 32 lowercase hex characters. It is only ever compared for
//! equality.

use sha2::{Digest, Sha256};

/// Number of hex characters in a fingerprint.
pub const FINGERPRINT_LEN: usize = 32;

/// Compute the fingerprint of `text`.
///
/// ```rust
/// use docroute_core::fingerprint::{fingerprint, FINGERPRINT_LEN};
///
/// let a = fingerprint("## Setup\n\nRun the installer.");
/// assert_eq!(a.len(), FINGERPRINT_LEN);
/// assert_eq!(a, fingerprint("## Setup\n\nRun the installer."));
/// ```
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest[..FINGERPRINT_LEN / 2]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_hex() {
        for text in ["", "a", &"x".repeat(100_000)] {
            let fp = fingerprint(text);
            assert_eq!(fp.len(), FINGERPRINT_LEN);
            assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
        }
    }

    #[test]
    fn test_known_prefix_of_sha256() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb924...
        assert_eq!(fingerprint(""), "e3b0c44298fc1c149afbf4c8996fb924");
    }

    #[test]
    fn test_sensitive_to_whitespace() {
        assert_ne!(fingerprint("alpha beta"), fingerprint("alpha  beta"));
    }
}

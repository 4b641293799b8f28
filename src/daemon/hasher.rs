//! SHA256 hash verification
//!
//! Verifies downloaded archives against the digest published in the release feed.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Result of hash verification
#[derive(Debug, Clone)]
pub struct HashResult {
    /// The computed hash (lowercase hex)
    pub computed: String,
    /// The expected hash (lowercase hex)
    pub expected: String,
    pub matches: bool,
}

/// Extract the hex digest from a feed value such as `sha256:ab12...`
///
/// Bare 64-character hex strings are accepted too. Digests for other
/// algorithms yield `None` and are not checked.
pub fn sha256_from_digest(digest: &str) -> Option<String> {
    let digest = digest.trim();
    let hex_part = match digest.split_once(':') {
        Some((algo, rest)) if algo.eq_ignore_ascii_case("sha256") => rest,
        Some(_) => return None,
        None => digest,
    };

    if hex_part.len() == 64 && hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex_part.to_lowercase())
    } else {
        None
    }
}

/// Compute SHA256 hash of a file
pub fn compute_file_hash(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify a file's SHA256 hash against expected value
pub fn verify_file_hash(path: &Path, expected_hash: &str) -> std::io::Result<HashResult> {
    let computed = compute_file_hash(path)?;
    let expected = expected_hash.trim().to_lowercase();
    let matches = computed == expected;

    log::info!(
        "Hash verification for {}: computed={}, expected={}, matches={}",
        path.display(),
        &computed[..16],
        &expected[..16.min(expected.len())],
        matches
    );

    Ok(HashResult {
        computed,
        expected,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sha256_from_digest() {
        let hex = "6ae8a75555209fd6c44157c0aed8016e763ff435a19cf186f76863140143ff72";
        assert_eq!(sha256_from_digest(&format!("sha256:{}", hex)), Some(hex.to_string()));
        assert_eq!(sha256_from_digest(hex), Some(hex.to_string()));
        assert_eq!(sha256_from_digest("sha512:abcd"), None);
        assert_eq!(sha256_from_digest("sha256:nothex"), None);
    }

    #[test]
    fn test_compute_file_hash() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        assert_eq!(
            compute_file_hash(file.path()).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_verify_file_hash_is_case_insensitive() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();

        let result = verify_file_hash(
            file.path(),
            "6AE8A75555209FD6C44157C0AED8016E763FF435A19CF186F76863140143FF72",
        )
        .unwrap();

        assert!(result.matches);
    }

    #[test]
    fn test_verify_file_hash_mismatch() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();

        let result = verify_file_hash(file.path(), &"0".repeat(64)).unwrap();
        assert!(!result.matches);
    }
}

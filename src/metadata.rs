//! Metadata extraction for uploaded files: MIME sniffing, checksums and the
//! owner-prefix isolation check.

use sha2::{Digest, Sha256};

use crate::errors::{GatewayError, GatewayResult};

/// Chunk size for checksum calculation.
const CHUNK_SIZE: usize = 8192;

/// Guess the MIME type from a filename extension.
///
/// Falls back to `application/octet-stream` when the extension is unknown.
pub fn sniff_mime(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// SHA-256 of the content, hex-encoded lowercase.
///
/// Processes fixed-size chunks so the same code path serves small markers and
/// multi-megabyte bodies.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for chunk in content.chunks(CHUNK_SIZE) {
        hasher.update(chunk);
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// File extension without the dot, lowercased. Empty when absent.
pub fn extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

/// Validate that a storage key lives inside the owner's namespace.
///
/// The first key segment must parse as the owner's integer id. This is the
/// isolation check every engine mutator runs before touching storage.
pub fn enforce_owner_prefix(owner_id: i64, storage_key: &str) -> GatewayResult<()> {
    if storage_key.is_empty() {
        return Err(GatewayError::InvalidPath(
            "storage key cannot be empty".to_string(),
        ));
    }

    let first_segment = storage_key.split('/').next().unwrap_or("");

    let key_owner: i64 = first_segment.parse().map_err(|_| {
        GatewayError::InvalidPath(format!(
            "storage key must start with a user id: {}",
            storage_key
        ))
    })?;

    if key_owner != owner_id {
        return Err(GatewayError::InvalidPath(format!(
            "storage key user id ({}) does not match owner ({})",
            key_owner, owner_id
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_mime_known_types() {
        assert_eq!(sniff_mime("report.pdf"), "application/pdf");
        assert_eq!(sniff_mime("notes.txt"), "text/plain");
        assert_eq!(sniff_mime("photo.jpg"), "image/jpeg");
        assert_eq!(sniff_mime("photo.png"), "image/png");
    }

    #[test]
    fn test_sniff_mime_unknown_falls_back() {
        assert_eq!(sniff_mime("data.xyzzy"), "application/octet-stream");
        assert_eq!(sniff_mime("noextension"), "application/octet-stream");
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        // Scenario from the WebDAV suite: b"hello".
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_sha256_hex_empty() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_hex_spans_chunks() {
        // Larger than one chunk so the incremental path is exercised.
        let content = vec![0xabu8; CHUNK_SIZE * 3 + 17];
        let whole = {
            let mut hasher = Sha256::new();
            hasher.update(&content);
            hasher
                .finalize()
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<String>()
        };
        assert_eq!(sha256_hex(&content), whole);
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("document.pdf"), "pdf");
        assert_eq!(extension("archive.tar.GZ"), "gz");
        assert_eq!(extension("noextension"), "");
        assert_eq!(extension(".folder"), "");
    }

    #[test]
    fn test_enforce_owner_prefix_accepts_own_keys() {
        assert!(enforce_owner_prefix(123, "123/docs/file.pdf").is_ok());
        assert!(enforce_owner_prefix(123, "123").is_ok());
    }

    #[test]
    fn test_enforce_owner_prefix_rejects_bad_keys() {
        assert!(matches!(
            enforce_owner_prefix(123, ""),
            Err(GatewayError::InvalidPath(_))
        ));
        assert!(matches!(
            enforce_owner_prefix(123, "docs/file.pdf"),
            Err(GatewayError::InvalidPath(_))
        ));
        assert!(matches!(
            enforce_owner_prefix(123, "456/file.pdf"),
            Err(GatewayError::InvalidPath(_))
        ));
    }
}

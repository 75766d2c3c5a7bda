//! Stable content hashing for change detection.

/// Hash note bytes after normalizing line endings to LF.
///
/// The same logical content must hash identically whether it was written on
/// Windows or Unix; trailing whitespace is preserved. Returns a lowercase
/// hex blake3 digest.
pub fn content_hash(bytes: &[u8]) -> String {
    let normalized = normalize_line_endings(bytes);
    hex::encode(blake3::hash(&normalized).as_bytes())
}

/// Replace CRLF with LF, leaving lone CR bytes untouched.
fn normalize_line_endings(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_and_lf_hash_identically() {
        assert_eq!(content_hash(b"a\r\nb\r\n"), content_hash(b"a\nb\n"));
    }

    #[test]
    fn trailing_whitespace_is_significant() {
        assert_ne!(content_hash(b"a \n"), content_hash(b"a\n"));
    }

    #[test]
    fn hash_is_deterministic() {
        let h1 = content_hash(b"Graph theory");
        let h2 = content_hash(b"Graph theory");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}

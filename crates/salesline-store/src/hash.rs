//! Blake3 content hashing

use std::io;
use std::path::Path;

use serde::Serialize;

/// Hex digits kept in directory names.
pub const SHORT_LEN: usize = 16;

/// Hash a file through a memory map.
pub fn hash_file(path: &Path) -> io::Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_mmap(path)?;
    Ok(hasher.finalize())
}

/// Hash of a value's JSON form. Struct field order is fixed by serde, so
/// the JSON is canonical as long as maps are ordered (`BTreeMap`).
pub fn hash_json<T: Serialize>(value: &T) -> serde_json::Result<(String, blake3::Hash)> {
    let json = serde_json::to_string(value)?;
    let hash = blake3::hash(json.as_bytes());
    Ok((json, hash))
}

/// Ordered combination: `combine([a, b]) != combine([b, a])`.
pub fn combine(hashes: &[blake3::Hash]) -> blake3::Hash {
    if hashes.is_empty() {
        return blake3::hash(b"empty");
    }
    let mut hasher = blake3::Hasher::new();
    for h in hashes {
        hasher.update(h.as_bytes());
    }
    hasher.finalize()
}

/// Leading hex digits used as a directory name.
pub fn short(hash: &blake3::Hash) -> String {
    hash.to_hex()[..SHORT_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Input<'a> {
        path: &'a str,
        delimiter: char,
    }

    #[test]
    fn json_hash_follows_content() {
        let a = hash_json(&Input { path: "a.csv", delimiter: ',' }).unwrap();
        let same = hash_json(&Input { path: "a.csv", delimiter: ',' }).unwrap();
        let other = hash_json(&Input { path: "a.csv", delimiter: ';' }).unwrap();
        assert_eq!(a, same);
        assert_ne!(a.1, other.1);
        assert_eq!(a.0, r#"{"path":"a.csv","delimiter":","}"#);
    }

    #[test]
    fn combine_is_ordered() {
        let x = blake3::hash(b"x");
        let y = blake3::hash(b"y");
        assert_ne!(combine(&[x, y]), combine(&[y, x]));
        assert_eq!(combine(&[]), blake3::hash(b"empty"));
    }

    #[test]
    fn short_is_prefix() {
        let h = blake3::hash(b"sales");
        let s = short(&h);
        assert_eq!(s.len(), SHORT_LEN);
        assert!(h.to_hex().starts_with(&s));
    }

    #[test]
    fn file_hash_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rawsales.csv");
        std::fs::write(&path, b"order_id\nA\n").unwrap();
        assert_eq!(hash_file(&path).unwrap(), blake3::hash(b"order_id\nA\n"));
    }
}

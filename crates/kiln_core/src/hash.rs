//! Content hashing and name normalization.
//!
//! Every identifier that can end up on disk (resource ids, shader uids,
//! checksums) is derived from content with xxhash so it is stable across runs
//! and platforms.

use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh32::xxh32;

/// 64-bit identifier of a normalized resource name.
pub type NameHash = u64;

/// 64-bit identifier of an asset class.
pub type ClassId = u64;

/// Normalizes a logical resource name.
///
/// Backslashes become forward slashes, empty and `.` segments are dropped and
/// `..` pops the previous segment. Case is preserved.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let unified = name.replace('\\', "/");
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                // A leading `..` cannot be resolved here, keep it verbatim
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Hash of the normalized form of `name`.
#[inline]
#[must_use]
pub fn name_hash(name: &str) -> NameHash {
    xxh3_64(normalize_name(name).as_bytes())
}

/// Class identifier for an asset class name.
#[inline]
#[must_use]
pub fn class_id(class_name: &str) -> ClassId {
    xxh3_64(class_name.as_bytes())
}

/// 32-bit checksum of arbitrary bytes, used as the binary-cache validity key.
#[inline]
#[must_use]
pub fn checksum32(bytes: &[u8]) -> u32 {
    xxh32(bytes, 0)
}

/// Joins `name` onto the directory part of `base`.
#[must_use]
pub fn sibling_path(base: &str, name: &str) -> String {
    let base = normalize_name(base);
    match base.rfind('/') {
        Some(idx) => normalize_name(&format!("{}/{}", &base[..idx], name)),
        None => normalize_name(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_separators_and_dots() {
        assert_eq!(normalize_name("shaders\\lib//./common.glsl"), "shaders/lib/common.glsl");
        assert_eq!(normalize_name("/shaders/lib/../common.glsl"), "shaders/common.glsl");
        assert_eq!(normalize_name("../up.glsl"), "../up.glsl");
    }

    #[test]
    fn equivalent_names_share_hash() {
        assert_eq!(name_hash("a/b/../c.glsl"), name_hash("a\\c.glsl"));
        assert_ne!(name_hash("a/c.glsl"), name_hash("a/C.glsl"));
    }

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(checksum32(b"void main() {}"), checksum32(b"void main() {}"));
        assert_ne!(checksum32(b"void main() {}"), checksum32(b"void main(){}"));
    }

    #[test]
    fn sibling_resolves_against_directory() {
        assert_eq!(sibling_path("shaders/mesh.glsl", "lib/light.glsl"), "shaders/lib/light.glsl");
        assert_eq!(sibling_path("mesh.glsl", "light.glsl"), "light.glsl");
        assert_eq!(sibling_path("shaders/pp/fx.glsl", "../common.glsl"), "shaders/common.glsl");
    }
}

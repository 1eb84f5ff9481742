//! Naming rules for the files and objects this layer manages.
//!
//! The engine below us believes in a fixed filename schema; the object store
//! above us wants immutable, epoch-stamped names. Everything that translates
//! between the two lives here.

use crate::id::EPOCH_LEN;

/// File holding the name of the active manifest.
pub const CURRENT_FILE: &str = "CURRENT";

/// File holding the database identity as a single line.
pub const IDENTITY_FILE: &str = "IDENTITY";

/// Local serialization of the cloud manifest.
pub const CLOUD_MANIFEST_FILE: &str = "CLOUDMANIFEST";

/// Fixed manifest name the engine believes it is reading; the cloud manifest
/// remaps it to the epoch-stamped file.
pub const DUMMY_MANIFEST_FILE: &str = "MANIFEST-000001";

const MANIFEST_PREFIX: &str = "MANIFEST";
const TABLE_FILE_SUFFIX: &str = ".sst";

/// Manifest filename qualified by `epoch`; the legacy empty epoch renders the
/// bare `MANIFEST` name.
pub fn manifest_file_with_epoch(epoch: &str) -> String {
    if epoch.is_empty() {
        MANIFEST_PREFIX.to_string()
    } else {
        format!("{MANIFEST_PREFIX}-{epoch}")
    }
}

/// Number of a `MANIFEST-<N>` file when the suffix is purely numeric.
pub fn numbered_manifest(name: &str) -> Option<u64> {
    let suffix = name.strip_prefix(MANIFEST_PREFIX)?.strip_prefix('-')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// True for any manifest file, numbered or epoch-stamped.
pub fn is_manifest_file(name: &str) -> bool {
    name == MANIFEST_PREFIX || name.starts_with("MANIFEST-")
}

/// Number of a `<N>.sst` table file, with any epoch suffix ignored.
pub fn table_file_number(name: &str) -> Option<u64> {
    let base = strip_epoch_suffix(name);
    let stem = base.strip_suffix(TABLE_FILE_SUFFIX)?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// The trailing epoch token of an epoch-stamped name, if present.
pub fn epoch_suffix(name: &str) -> Option<&str> {
    let (_, suffix) = name.rsplit_once('-')?;
    let is_epoch = suffix.len() == EPOCH_LEN
        && suffix
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    is_epoch.then_some(suffix)
}

/// `name` with any trailing epoch token removed.
pub fn strip_epoch_suffix(name: &str) -> &str {
    match epoch_suffix(name) {
        Some(suffix) => &name[..name.len() - suffix.len() - 1],
        None => name,
    }
}

/// Log files are preserved across reinitialization.
pub fn is_log_file(name: &str) -> bool {
    name.starts_with("LOG")
}

/// Compose an object key from a prefix and a relative name. Keys never
/// carry surrounding slashes, so both ends of the prefix are stripped here.
pub fn object_key(prefix: &str, name: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        name.to_string()
    } else {
        format!("{trimmed}/{name}")
    }
}

/// Object prefixes compare with trailing slashes ignored; a leading slash is
/// significant and distinguishes two paths.
pub fn trim_object_prefix(prefix: &str) -> &str {
    prefix.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_names_round_trip_epochs() {
        assert_eq!(manifest_file_with_epoch(""), "MANIFEST");
        assert_eq!(
            manifest_file_with_epoch("00c0ffee00c0ffee"),
            "MANIFEST-00c0ffee00c0ffee"
        );
    }

    #[test]
    fn numbered_manifests_parse() {
        assert_eq!(numbered_manifest("MANIFEST-000001"), Some(1));
        assert_eq!(numbered_manifest("MANIFEST-000042"), Some(42));
        assert_eq!(numbered_manifest("MANIFEST"), None);
        assert_eq!(numbered_manifest("MANIFEST-00c0ffee00c0ffee"), None);
        assert_eq!(numbered_manifest("CURRENT"), None);
    }

    #[test]
    fn epoch_suffix_requires_sixteen_hex() {
        assert_eq!(
            epoch_suffix("MANIFEST-00c0ffee00c0ffee"),
            Some("00c0ffee00c0ffee")
        );
        assert_eq!(
            epoch_suffix("000012.sst-deadbeefdeadbeef"),
            Some("deadbeefdeadbeef")
        );
        // A numbered manifest suffix is shorter than an epoch token.
        assert_eq!(epoch_suffix("MANIFEST-000001"), None);
        assert_eq!(epoch_suffix("LOG"), None);
    }

    #[test]
    fn table_numbers_parse_through_epoch_stamps() {
        assert_eq!(table_file_number("000012.sst"), Some(12));
        assert_eq!(table_file_number("000012.sst-deadbeefdeadbeef"), Some(12));
        assert_eq!(table_file_number("MANIFEST-000001"), None);
        assert_eq!(strip_epoch_suffix("000012.sst-deadbeefdeadbeef"), "000012.sst");
    }

    #[test]
    fn object_keys_tolerate_decorated_prefixes() {
        assert_eq!(object_key("db1", "IDENTITY"), "db1/IDENTITY");
        assert_eq!(object_key("/db1/", "IDENTITY"), "db1/IDENTITY");
        assert_eq!(object_key("", "IDENTITY"), "IDENTITY");
    }

    #[test]
    fn prefix_comparisons_keep_leading_slashes() {
        assert_eq!(trim_object_prefix("clones/a/"), "clones/a");
        assert_eq!(trim_object_prefix("/clones/a/"), "/clones/a");
        assert_ne!(trim_object_prefix("/db1"), trim_object_prefix("db1"));
    }
}

//! Deterministic alert identity (component C1).
//!
//! Labels are sorted lexicographically by name, concatenated as
//! `<name>\0<value>\0`, and hashed with FNV-1a 64-bit. This must stay
//! byte-for-byte compatible with Alertmanager's own fingerprinting so that
//! alerts re-ingested from a real Alertmanager keep the same identity.
//!
//! Note: an earlier prototype used SHA-256 for this in one code path and
//! FNV-1a in another (see spec §9, "possibly-buggy source behavior"). FNV-1a
//! is authoritative here; there is exactly one fingerprint implementation.

use std::collections::HashMap;
use std::hash::Hasher;

use fnv::FnvHasher;

/// Sentinel substituted for an empty or absent value. Only used by group
/// keying (§4.6), never fed into identity hashing.
pub const MISSING_VALUE_SENTINEL: &str = "<missing>";

/// Computes the Alertmanager-compatible fingerprint for a label set.
///
/// Pure function, no error path: any label map, including the empty map,
/// produces a valid 16-character lowercase hex string.
pub fn fingerprint(labels: &HashMap<String, String>) -> String {
    let mut names: Vec<&String> = labels.keys().collect();
    names.sort();

    let mut hasher = FnvHasher::default();
    for name in names {
        let value = labels.get(name).map(String::as_str).unwrap_or("");
        hasher.write(name.as_bytes());
        hasher.write_u8(0);
        hasher.write(value.as_bytes());
        hasher.write_u8(0);
    }

    format!("{:016x}", hasher.finish())
}

/// Variant of [`fingerprint`] used for group-key construction, where a
/// missing label is represented by the `<missing>` sentinel rather than an
/// empty string. Kept separate so identity hashing is never accidentally
/// affected by the sentinel substitution.
pub fn keyed_fingerprint(names: &[&str], lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut sorted = names.to_vec();
    sorted.sort();

    let mut hasher = FnvHasher::default();
    for name in sorted {
        let value = lookup(name).unwrap_or_else(|| MISSING_VALUE_SENTINEL.to_string());
        hasher.write(name.as_bytes());
        hasher.write_u8(0);
        hasher.write(value.as_bytes());
        hasher.write_u8(0);
    }

    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn deterministic_for_identical_label_sets() {
        let a = labels(&[("alertname", "HighCPU"), ("instance", "web-01")]);
        let b = labels(&[("instance", "web-01"), ("alertname", "HighCPU")]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn sensitive_to_value_changes() {
        let a = labels(&[("alertname", "HighCPU"), ("instance", "web-01")]);
        let b = labels(&[("alertname", "HighCPU"), ("instance", "web-02")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn sensitive_to_added_or_removed_labels() {
        let a = labels(&[("alertname", "HighCPU")]);
        let b = labels(&[("alertname", "HighCPU"), ("severity", "critical")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn output_is_sixteen_lowercase_hex_chars() {
        let a = labels(&[("alertname", "HighCPU")]);
        let fp = fingerprint(&a);
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn known_fingerprint_table_is_internally_consistent() {
        // Regression table of precomputed FNV-1a fingerprints. Must never
        // drift between releases of this crate once published.
        let table: &[(&[(&str, &str)], &str)] = &[
            (
                &[
                    ("alertname", "HighCPU"),
                    ("instance", "web-01"),
                    ("severity", "critical"),
                ],
                "446c62f0b9cfb14d",
            ),
            (&[("alertname", "Watchdog")], "11604dc059567c7b"),
            (
                &[
                    ("alertname", "KubePodCrashLooping"),
                    ("namespace", "payments"),
                    ("pod", "api-7d9f"),
                ],
                "982da86c4deb078f",
            ),
            (
                &[("alertname", "DiskFull"), ("instance", "db-02"), ("mountpoint", "/var")],
                "0b6315e12c06f369",
            ),
            (
                &[("alertname", "NodeDown"), ("instance", "node-14")],
                "c182df271ce80e95",
            ),
            (
                &[
                    ("alertname", "HighMemory"),
                    ("instance", "web-03"),
                    ("severity", "warning"),
                ],
                "0e1a9fb0d1e405bd",
            ),
            (
                &[("alertname", "CertExpiringSoon"), ("domain", "api.example.com")],
                "8cfc28dc1d50fe76",
            ),
            (
                &[
                    ("alertname", "TargetDown"),
                    ("job", "blackbox"),
                    ("instance", "edge-1"),
                ],
                "f69bb8a3ddf5b42a",
            ),
            (
                &[("alertname", "InstanceDown"), ("instance", "cache-05")],
                "7ae51cdde6f5a42a",
            ),
            (
                &[
                    ("alertname", "TooManyRestarts"),
                    ("container", "worker"),
                    ("namespace", "batch"),
                ],
                "b250319951909353",
            ),
            (
                &[("alertname", "SlowQueries"), ("db", "postgres-primary")],
                "c600ab9b6188e449",
            ),
        ];

        for (pairs, expected) in table {
            assert_eq!(&fingerprint(&labels(pairs)), expected);
        }
    }

    #[test]
    fn empty_labels_produce_a_valid_fingerprint() {
        let fp = fingerprint(&HashMap::new());
        assert_eq!(fp.len(), 16);
    }

    #[test]
    fn keyed_fingerprint_substitutes_missing_sentinel() {
        let present = keyed_fingerprint(&["alertname"], |n| {
            if n == "alertname" {
                Some("HighCPU".to_string())
            } else {
                None
            }
        });
        let missing = keyed_fingerprint(&["alertname"], |_| None);
        assert_ne!(present, missing);
    }
}

//! Cache keys derived from query text or persisted-query descriptors.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintError {
    #[error("invalid persisted query descriptor: {0}")]
    InvalidDescriptor(&'static str),
}

/// A client-supplied reference to a query registered out of band.
///
/// Never checked against any query text here; it is only a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedQuery {
    pub version: String,
    pub hash: String,
}

impl PersistedQuery {
    /// Creates a descriptor from its version and hash.
    pub fn new(version: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            hash: hash.into(),
        }
    }

    /// Reads `extensions.persistedQuery` as `{version, sha256Hash}`.
    ///
    /// Returns `Ok(None)` when no descriptor is present. `version` may be a
    /// string or a number.
    ///
    /// # Errors
    ///
    /// [`FingerprintError::InvalidDescriptor`] when a descriptor is present
    /// but is not an object or lacks a non-empty `version` or `sha256Hash`.
    pub fn from_extensions(extensions: Option<&Value>) -> Result<Option<Self>, FingerprintError> {
        let descriptor = match extensions.and_then(|ext| ext.get("persistedQuery")) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Object(descriptor)) => descriptor,
            Some(_) => {
                return Err(FingerprintError::InvalidDescriptor(
                    "persistedQuery is not an object",
                ));
            }
        };

        let version = match descriptor.get("version") {
            Some(Value::String(v)) if !v.is_empty() => v.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(FingerprintError::InvalidDescriptor("missing version")),
        };
        let hash = match descriptor.get("sha256Hash") {
            Some(Value::String(h)) if !h.is_empty() => h.clone(),
            _ => return Err(FingerprintError::InvalidDescriptor("missing sha256Hash")),
        };

        Ok(Some(Self { version, hash }))
    }
}

/// The key a cached response is stored under.
///
/// # Examples
///
/// ```
/// use qcache::cache::{Fingerprint, PersistedQuery};
///
/// let a = Fingerprint::from_payload("{ books { title } }");
/// let b = Fingerprint::from_payload("{books{\n  title\n}}");
/// assert_eq!(a, b);
/// assert_eq!(a.as_str().len(), 64);
///
/// let p = Fingerprint::from_descriptor(&PersistedQuery::new("1", "abc"));
/// assert_eq!(p.as_str(), "1.abc");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hex SHA-256 of `query` with every whitespace character removed.
    ///
    /// Whitespace is deleted, not collapsed to a single space, so keys stay
    /// compatible with entries written by earlier deployments.
    pub fn from_payload(query: &str) -> Self {
        let compact: String = query.chars().filter(|c| !c.is_whitespace()).collect();
        Self(hex::encode(Sha256::digest(compact.as_bytes())))
    }

    /// `"{version}.{hash}"`, unhashed.
    pub fn from_descriptor(descriptor: &PersistedQuery) -> Self {
        Self(format!("{}.{}", descriptor.version, descriptor.hash))
    }

    /// Returns the fingerprint as a store key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whitespace_variants_share_a_fingerprint() {
        let variants = [
            "{ books { title } }",
            "{books{title}}",
            "{\n\tbooks {\r\n    title\n  }\n}",
            "  { books\u{00a0}{ title } }  ",
        ];
        let first = Fingerprint::from_payload(variants[0]);
        for v in &variants[1..] {
            assert_eq!(Fingerprint::from_payload(v), first, "variant {v:?}");
        }
    }

    #[test]
    fn payload_fingerprint_is_sha256_of_compacted_text() {
        // sha256("{books{title}}")
        let expected = hex::encode(Sha256::digest(b"{books{title}}"));
        assert_eq!(Fingerprint::from_payload("{ books { title } }").as_str(), expected);
    }

    #[test]
    fn different_queries_differ() {
        assert_ne!(
            Fingerprint::from_payload("{ books { title } }"),
            Fingerprint::from_payload("{ books { author } }")
        );
    }

    #[test]
    fn descriptor_fingerprint_is_version_dot_hash() {
        let d = PersistedQuery::new("1", "ecf4edb46db40b5132295c0291d62fb65d6759a9eedfa4d5d612dd5ec54a6b38");
        assert_eq!(
            Fingerprint::from_descriptor(&d).to_string(),
            "1.ecf4edb46db40b5132295c0291d62fb65d6759a9eedfa4d5d612dd5ec54a6b38"
        );
    }

    #[test]
    fn descriptor_read_from_extensions() {
        let ext = json!({"persistedQuery": {"version": "1", "sha256Hash": "abc"}});
        assert_eq!(
            PersistedQuery::from_extensions(Some(&ext)),
            Ok(Some(PersistedQuery::new("1", "abc")))
        );
    }

    #[test]
    fn numeric_version_is_accepted() {
        let ext = json!({"persistedQuery": {"version": 1, "sha256Hash": "abc"}});
        let d = PersistedQuery::from_extensions(Some(&ext)).unwrap().unwrap();
        assert_eq!(Fingerprint::from_descriptor(&d).as_str(), "1.abc");
    }

    #[test]
    fn absent_descriptor_is_none() {
        assert_eq!(PersistedQuery::from_extensions(None), Ok(None));
        assert_eq!(PersistedQuery::from_extensions(Some(&json!({"other": 1}))), Ok(None));
    }

    #[test]
    fn malformed_descriptor_is_invalid() {
        for ext in [
            json!({"persistedQuery": {"sha256Hash": "abc"}}),
            json!({"persistedQuery": {"version": "1"}}),
            json!({"persistedQuery": {"version": "1", "sha256Hash": ""}}),
            json!({"persistedQuery": "1.abc"}),
        ] {
            assert!(matches!(
                PersistedQuery::from_extensions(Some(&ext)),
                Err(FingerprintError::InvalidDescriptor(_))
            ));
        }
    }
}

use crate::{configuration::Configuration, document};
use sha2::{Digest, Sha256};
use std::fmt;

/// Extension shared by job files and result files
pub const JOB_EXTENSION: &str = ".cfg";

/// Content address of a configuration: SHA-256 over its canonical encoding, hex encoded
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// name of the job and result file for this fingerprint
    pub fn file_name(&self) -> String {
        format!("{}{JOB_EXTENSION}", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(config: &Configuration) -> Fingerprint {
    let digest = Sha256::digest(document::to_canonical_vec(config.as_map()));

    Fingerprint(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn config(value: Value) -> Configuration {
        Configuration::try_from(value).unwrap()
    }

    #[test]
    fn key_order_does_not_matter() {
        let first = config(json!({"a": 1, "b": {"x": [1, 2], "y": "z"}, "run": 1}));

        // build the same content in reverse insertion order
        let mut nested = Map::new();
        nested.insert("y".into(), json!("z"));
        nested.insert("x".into(), json!([1, 2]));
        let mut second = Configuration::new();
        second.insert("run", 1);
        second.insert("b", Value::Object(nested));
        second.insert("a", 1);

        assert_eq!(fingerprint(&first), fingerprint(&second));
    }

    #[test]
    fn content_changes_fingerprint() {
        let base = fingerprint(&config(json!({"command": "ls", "run": 1})));

        assert_ne!(base, fingerprint(&config(json!({"command": "ls", "run": 2}))));
        assert_ne!(base, fingerprint(&config(json!({"command": "df", "run": 1}))));
        assert_ne!(base, fingerprint(&config(json!({"command": ["ls"], "run": 1}))));
    }

    #[test]
    fn file_name_shape() {
        let fp = fingerprint(&config(json!({"run": 1})));

        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.file_name(), format!("{fp}.cfg"));
    }
}

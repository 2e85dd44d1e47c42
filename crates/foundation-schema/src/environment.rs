use crate::compose::{LETSENCRYPT_EMAIL, LETSENCRYPT_HOST, VIRTUAL_HOST, VIRTUAL_PORT};
use crate::SchemaError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Parse `KEY=VALUE` entries into an ordered map. The value may be empty
/// and may itself contain `=`; a repeated key keeps its last value.
pub fn parse_environment<S: AsRef<str>>(
    entries: &[S],
) -> Result<BTreeMap<String, String>, SchemaError> {
    let mut environment = BTreeMap::new();
    for entry in entries {
        let entry = entry.as_ref();
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| SchemaError::MalformedEnvEntry(entry.to_owned()))?;
        let key = key.trim();
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(SchemaError::MalformedEnvEntry(entry.to_owned()));
        }
        environment.insert(key.to_owned(), value.to_owned());
    }
    Ok(environment)
}

/// Public routing of a service through the reverse proxy.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicExposure {
    pub host: String,
    pub port: u16,
    pub letsencrypt_email: String,
}

impl PublicExposure {
    pub const DEFAULT_PORT: u16 = 80;

    /// Write the four proxy/ACME keys, overriding user-supplied values.
    pub fn apply(&self, environment: &mut BTreeMap<String, String>) {
        environment.insert(VIRTUAL_HOST.to_owned(), self.host.clone());
        environment.insert(VIRTUAL_PORT.to_owned(), self.port.to_string());
        environment.insert(LETSENCRYPT_HOST.to_owned(), self.host.clone());
        environment.insert(LETSENCRYPT_EMAIL.to_owned(), self.letsencrypt_email.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs() {
        let env = parse_environment(&["FOO=bar", "EMPTY=", "URL=postgres://u:p@h/db?x=1"]).unwrap();
        assert_eq!(env["FOO"], "bar");
        assert_eq!(env["EMPTY"], "");
        assert_eq!(env["URL"], "postgres://u:p@h/db?x=1");
    }

    #[test]
    fn rejects_entry_without_equals() {
        let err = parse_environment(&["FOO=bar", "FOO"]).unwrap_err();
        assert!(matches!(err, SchemaError::MalformedEnvEntry(e) if e == "FOO"));
    }

    #[test]
    fn rejects_empty_key() {
        assert!(matches!(
            parse_environment(&["=bar"]),
            Err(SchemaError::MalformedEnvEntry(_))
        ));
    }

    #[test]
    fn last_duplicate_wins() {
        let env = parse_environment(&["A=1", "A=2"]).unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env["A"], "2");
    }

    #[test]
    fn exposure_sets_all_four_keys() {
        let mut env = parse_environment(&["VIRTUAL_HOST=spoofed"]).unwrap();
        PublicExposure {
            host: "svc1.example.com".to_owned(),
            port: 8080,
            letsencrypt_email: "ops@example.com".to_owned(),
        }
        .apply(&mut env);
        assert_eq!(env[VIRTUAL_HOST], "svc1.example.com");
        assert_eq!(env[VIRTUAL_PORT], "8080");
        assert_eq!(env[LETSENCRYPT_HOST], "svc1.example.com");
        assert_eq!(env[LETSENCRYPT_EMAIL], "ops@example.com");
    }
}

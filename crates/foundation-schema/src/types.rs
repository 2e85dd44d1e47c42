//! Newtype wrappers for validated identifiers.
//!
//! Both newtypes serialize as plain strings.

use crate::templates::RESERVED_NAMES;
use crate::SchemaError;
use serde::Serialize;
use std::fmt;
use std::ops::Deref;

const MAX_NAME_LEN: usize = 63;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_newtype!(
    /// Unique key of a managed service. Doubles as its container name and as
    /// the last component of its image tag, hence the lowercase-only rule.
    ServiceName
);

string_newtype!(
    /// Image tag of an artifact built from a checkout: `<namespace>/<service>`.
    ArtifactTag
);

impl ServiceName {
    pub fn parse(name: &str) -> Result<Self, SchemaError> {
        validate_service_name(name)?;
        Ok(Self(name.to_owned()))
    }
}

impl ArtifactTag {
    pub fn for_service(namespace: &str, service: &ServiceName) -> Self {
        Self(format!("{namespace}/{service}"))
    }
}

pub fn validate_service_name(name: &str) -> Result<(), SchemaError> {
    let invalid = |reason| SchemaError::InvalidName {
        name: name.to_owned(),
        reason,
    };
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(invalid("must be 1-63 characters"));
    }
    if !name.as_bytes()[0].is_ascii_alphanumeric() {
        return Err(invalid("must start with a letter or digit"));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
    {
        return Err(invalid("must match [a-z0-9_-]"));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(invalid("reserved for the reverse proxy"));
    }
    Ok(())
}

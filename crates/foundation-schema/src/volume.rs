use crate::SchemaError;
use serde::Serialize;
use std::fmt;

/// A `name:path[:mode]` mount of a named volume.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub target: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn parse(entry: &str) -> Result<Self, SchemaError> {
        let malformed = || SchemaError::MalformedVolumeEntry(entry.to_owned());

        let (name, rest) = entry.split_once(':').ok_or_else(malformed)?;
        if looks_like_path(name) {
            return Err(SchemaError::HostPathNotAllowed(entry.to_owned()));
        }
        let (target, read_only) = match rest.rsplit_once(':') {
            Some((target, "ro")) => (target, true),
            Some((target, "rw")) => (target, false),
            Some(_) => return Err(malformed()),
            None => (rest, false),
        };
        if name.is_empty() || target.is_empty() || !is_volume_name(name) {
            return Err(malformed());
        }

        Ok(Self {
            name: name.to_owned(),
            target: target.to_owned(),
            read_only,
        })
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.target)?;
        if self.read_only {
            f.write_str(":ro")?;
        }
        Ok(())
    }
}

/// Absolute, relative and home-relative sources all name host paths.
fn looks_like_path(source: &str) -> bool {
    source.starts_with(['/', '.', '~']) || source.contains('/')
}

fn is_volume_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    bytes.next().is_some_and(|b| b.is_ascii_alphanumeric())
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

pub fn parse_volumes<S: AsRef<str>>(entries: &[S]) -> Result<Vec<VolumeMount>, SchemaError> {
    entries.iter().map(|e| VolumeMount::parse(e.as_ref())).collect()
}

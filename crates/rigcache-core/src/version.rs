//! Tool version strings: `major.minor[.patch][-tag]`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("version string is empty")]
    Empty,
    #[error("version '{0}' has no minor component")]
    MissingMinor(String),
    #[error("version '{input}': component '{component}' is not a non-negative integer")]
    BadComponent { input: String, component: String },
    #[error("version '{0}' has too many components")]
    TooManyComponents(String),
}

/// A parsed tool version. Ordered numerically; a release sorts after any
/// pre-release carrying a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub tag: Option<String>,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            tag: None,
        }
    }

    /// Version of this crate.
    pub fn current() -> Self {
        Self::new(
            parse_const(env!("CARGO_PKG_VERSION_MAJOR")),
            parse_const(env!("CARGO_PKG_VERSION_MINOR")),
            parse_const(env!("CARGO_PKG_VERSION_PATCH")),
        )
    }
}

fn parse_const(s: &str) -> u32 {
    s.parse().unwrap_or(0)
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(VersionError::Empty);
        }

        // The tag starts at the first '-' following a digit, so a leading
        // '-' stays in the numeric part and is rejected there.
        let bytes = input.as_bytes();
        let split = (1..bytes.len()).find(|&i| bytes[i] == b'-' && bytes[i - 1].is_ascii_digit());
        let (numbers, tag) = match split {
            Some(i) => (&input[..i], Some(input[i + 1..].to_string())),
            None => (input, None),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.len() < 2 {
            return Err(VersionError::MissingMinor(input.to_string()));
        }
        if parts.len() > 3 {
            return Err(VersionError::TooManyComponents(input.to_string()));
        }
        let component = |s: &str| -> Result<u32, VersionError> {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::BadComponent {
                    input: input.to_string(),
                    component: s.to_string(),
                });
            }
            s.parse().map_err(|_| VersionError::BadComponent {
                input: input.to_string(),
                component: s.to_string(),
            })
        };

        Ok(Version {
            major: component(parts[0])?,
            minor: component(parts[1])?,
            patch: parts.get(2).map(|&p| component(p)).transpose()?.unwrap_or(0),
            tag: tag.filter(|t| !t.is_empty()),
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.tag, &other.tag) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(tag) = &self.tag {
            write!(f, "-{tag}")?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn parses_full_and_short_forms() {
        assert_eq!(v("1.2.3"), Version::new(1, 2, 3));
        assert_eq!(v("0.9"), Version::new(0, 9, 0));
        let tagged = v("2.0.1-beta.2");
        assert_eq!(tagged.patch, 1);
        assert_eq!(tagged.tag.as_deref(), Some("beta.2"));
        assert_eq!(v("1.4-rc1").tag.as_deref(), Some("rc1"));
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!(matches!("1".parse::<Version>(), Err(VersionError::MissingMinor(_))));
        assert!(matches!("".parse::<Version>(), Err(VersionError::Empty)));
        assert!(matches!(
            "1.x.3".parse::<Version>(),
            Err(VersionError::BadComponent { .. })
        ));
        assert!(matches!(
            "1.-2.0".parse::<Version>(),
            Err(VersionError::BadComponent { .. })
        ));
        assert!(matches!(
            "-1.2".parse::<Version>(),
            Err(VersionError::BadComponent { .. })
        ));
        assert!(matches!(
            "1.2.3.4".parse::<Version>(),
            Err(VersionError::TooManyComponents(_))
        ));
    }

    #[test]
    fn release_sorts_after_prerelease() {
        assert!(v("1.0.0-rc1") < v("1.0.0"));
        assert!(v("1.0.0") < v("1.0.1-alpha"));
        assert!(v("0.2.9") < v("0.3"));
        assert!(v("0.10.0") > v("0.9.0"));
        assert_eq!(v("1.2").cmp(&v("1.2.0")), Ordering::Equal);
    }

    #[test]
    fn display_round_trips() {
        for s in ["1.2.3", "0.3.0-dev"] {
            assert_eq!(v(s).to_string(), s);
            assert_eq!(v(&v(s).to_string()), v(s));
        }
    }

    #[test]
    fn current_matches_package() {
        assert_eq!(Version::current().to_string(), env!("CARGO_PKG_VERSION"));
    }
}

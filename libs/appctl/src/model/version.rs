//! Version parsing and formatting
//!
//! Versions look like `M.m.p` or `M.m.p-b`. Fields that are absent carry
//! `-1`, so a bare `1.0` parses as `{1, 0, -1, -1}`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Field value meaning "not present"
pub const ABSENT: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: i64,
    pub minor: i64,
    pub patch: i64,
    pub build: i64,
}

impl Default for Version {
    fn default() -> Self {
        Self {
            major: ABSENT,
            minor: ABSENT,
            patch: ABSENT,
            build: ABSENT,
        }
    }
}

impl Version {
    /// Parse a version string.
    ///
    /// The build suffix is best-effort: a non-numeric suffix yields `-1`.
    /// Excess separators or non-numeric major/minor/patch fields are
    /// rejected.
    pub fn parse(version: &str) -> Result<Version, Error> {
        let mut result = Version::default();

        // first, split by '-' to look for a build suffix
        let fields: Vec<&str> = version.split('-').collect();
        if fields.len() > 2 {
            return Err(Error::Parse(format!(
                "version string {version} has too many dashes"
            )));
        }
        if fields.len() == 2 {
            result.build = fields[1].parse::<i64>().unwrap_or(ABSENT);
        }

        // then major, minor, patch
        let fields: Vec<&str> = fields[0].split('.').collect();
        if fields.len() > 3 {
            return Err(Error::Parse(format!(
                "version {version} has too many dots"
            )));
        }
        for field in &fields {
            if field.parse::<i64>().is_err() {
                return Err(Error::Parse(format!(
                    "version field {field} in {version} is not a number"
                )));
            }
        }

        // set as many fields as there are, starting with major
        result.major = fields[0].parse().unwrap_or(ABSENT);
        if fields.len() >= 2 {
            result.minor = fields[1].parse().unwrap_or(ABSENT);
        }
        if fields.len() == 3 {
            result.patch = fields[2].parse().unwrap_or(ABSENT);
        }

        Ok(result)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if self.minor >= 0 {
            write!(f, ".{}", self.minor)?;
        }
        if self.patch >= 0 {
            write!(f, ".{}", self.patch)?;
        }
        if self.build >= 0 {
            write!(f, "-{}", self.build)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let v = Version::parse("2.14.2").unwrap();
        assert_eq!(
            v,
            Version {
                major: 2,
                minor: 14,
                patch: 2,
                build: ABSENT
            }
        );
    }

    #[test]
    fn test_parse_with_build() {
        let v = Version::parse("1.8-345").unwrap();
        assert_eq!(
            v,
            Version {
                major: 1,
                minor: 8,
                patch: ABSENT,
                build: 345
            }
        );
    }

    #[test]
    fn test_parse_zero_build() {
        let v = Version::parse("0.7-0").unwrap();
        assert_eq!(v.build, 0);
    }

    #[test]
    fn test_parse_non_numeric_build() {
        let v = Version::parse("1.2.3-nightly").unwrap();
        assert_eq!(v.build, ABSENT);
        assert_eq!(v.patch, 3);
    }

    #[test]
    fn test_parse_rejects_excess_separators() {
        assert!(Version::parse("1.2.3.4").is_err());
        assert!(Version::parse("1.2-3-4").is_err());
    }

    #[test]
    fn test_parse_rejects_non_numeric_fields() {
        assert!(Version::parse("1.x.3").is_err());
        assert!(Version::parse("abc").is_err());
    }

    #[test]
    fn test_format_parse_round_trip() {
        for input in ["2.14.2", "1.8-345", "0.7-0", "1.0.0-20220123", "1.0"] {
            let v = Version::parse(input).unwrap();
            assert_eq!(v.to_string(), input);
            assert_eq!(Version::parse(&v.to_string()).unwrap(), v);
        }
    }
}

//! Runtime/plugin version compatibility gate.

use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::AccelError;

/// Parsed `[v]X.Y.Z[-extra]` version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor1: u32,
    pub minor2: u32,
    /// Everything after the numeric core, leading `-` included.
    pub extra: String,
}

impl FromStr for Version {
    type Err = AccelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AccelError::InvalidArgument(format!("malformed version '{s}'"));

        let body = s.strip_prefix('v').unwrap_or(s);
        let (core, extra) = match body.find('-') {
            Some(pos) => body.split_at(pos),
            None => (body, ""),
        };

        let mut parts = core.split('.');
        let mut number = || -> Result<u32, AccelError> {
            let part = parts.next().ok_or_else(malformed)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            part.parse().map_err(|_| malformed())
        };
        let major = number()?;
        let minor1 = number()?;
        let minor2 = number()?;
        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Version {
            major,
            minor1,
            minor2,
            extra: extra.to_string(),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}{}", self.major, self.minor1, self.minor2, self.extra)
    }
}

/// Check that a plugin built against `required` can run on `runtime`.
///
/// Majors must match. Any other difference only logs a warning. With
/// `ignore` set every string is accepted, malformed ones included.
pub fn check_compatible(required: &str, runtime: &str, ignore: bool) -> Result<(), AccelError> {
    if ignore {
        return Ok(());
    }

    let wanted: Version = required.parse()?;
    let have: Version = runtime.parse()?;

    if wanted.major != have.major {
        return Err(AccelError::InvalidArgument(format!(
            "plugin requires runtime {wanted}, running {have}"
        )));
    }
    if wanted != have {
        warn!(
            "[Version] Plugin built for runtime {}, running {}; continuing",
            wanted, have
        );
    }
    Ok(())
}

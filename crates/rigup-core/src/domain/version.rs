//! Debian package version ordering.
//!
//! Format: `[epoch:]upstream[-revision]`. Comparison follows dpkg:
//! - the epoch compares numerically
//! - upstream and revision alternate non-digit and digit runs
//! - in non-digit runs `~` sorts before everything (even the end of the
//!   string), letters sort before other characters
//! - digit runs compare numerically

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebVersion {
    pub epoch: u64,
    pub upstream: String,
    pub revision: Option<String>,
}

impl DebVersion {
    /// Parse a version string
    ///
    /// Examples:
    /// - "1.8.1" → epoch=0, upstream="1.8.1", revision=None
    /// - "1.8.1-2" → epoch=0, upstream="1.8.1", revision=Some("2")
    /// - "2:4.1-1+deb12u1" → epoch=2, upstream="4.1", revision=Some("1+deb12u1")
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let s = s.trim();
        let invalid = || ValidationError::InvalidVersion(s.to_string());

        let (epoch, rest) = match s.split_once(':') {
            Some((e, r)) => (e.parse::<u64>().map_err(|_| invalid())?, r),
            None => (0, s),
        };

        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((u, r)) if !r.is_empty() => (u, Some(r.to_string())),
            Some(_) => return Err(invalid()),
            None => (rest, None),
        };

        if upstream.is_empty() || !upstream.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || ".+~-:".contains(c);
        if !upstream.chars().all(allowed) {
            return Err(invalid());
        }
        if let Some(rev) = &revision {
            if !rev.chars().all(|c| c.is_ascii_alphanumeric() || ".+~".contains(c)) {
                return Err(invalid());
            }
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision,
        })
    }

    pub fn compare(&self, other: &DebVersion) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_fragment(&self.upstream, &other.upstream))
            .then_with(|| {
                compare_fragment(
                    self.revision.as_deref().unwrap_or(""),
                    other.revision.as_deref().unwrap_or(""),
                )
            })
    }
}

/// Sort weight of a character within a non-digit run. `None` is end of string.
fn weight(c: Option<u8>) -> i32 {
    match c {
        Some(b'~') => -1,
        None => 0,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

fn compare_fragment(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let wa = weight(a.get(i).copied());
            let wb = weight(b.get(j).copied());
            if wa != wb {
                return wa.cmp(&wb);
            }
            i += 1;
            j += 1;
        }

        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }

        let mut first_diff = Ordering::Equal;
        while i < a.len() && a[i].is_ascii_digit() && j < b.len() && b[j].is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if i < a.len() && a[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}

impl FromStr for DebVersion {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DebVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        f.write_str(&self.upstream)?;
        if let Some(rev) = &self.revision {
            write!(f, "-{}", rev)?;
        }
        Ok(())
    }
}

impl Ord for DebVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for DebVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> DebVersion {
        DebVersion::parse(s).unwrap()
    }

    #[test]
    fn test_parse_full() {
        let ver = v("2:4.1-1+deb12u1");
        assert_eq!(ver.epoch, 2);
        assert_eq!(ver.upstream, "4.1");
        assert_eq!(ver.revision.as_deref(), Some("1+deb12u1"));
        assert_eq!(ver.to_string(), "2:4.1-1+deb12u1");
    }

    #[test]
    fn test_parse_revision_splits_on_last_dash() {
        let ver = v("1.0-beta-3");
        assert_eq!(ver.upstream, "1.0-beta");
        assert_eq!(ver.revision.as_deref(), Some("3"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DebVersion::parse("").is_err());
        assert!(DebVersion::parse("x:1.0").is_err());
        assert!(DebVersion::parse("abc").is_err());
        assert!(DebVersion::parse("1.0-").is_err());
        assert!(DebVersion::parse("1.0 beta").is_err());
    }

    #[test]
    fn test_numeric_runs() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("1.8.1-2") > v("1.8.1-1"));
        assert_eq!(v("1.08").cmp(&v("1.8")), Ordering::Equal);
    }

    #[test]
    fn test_epoch_dominates() {
        assert!(v("1:0.1") > v("9.9"));
    }

    #[test]
    fn test_tilde_sorts_first() {
        assert!(v("1.0~rc1") < v("1.0"));
        assert!(v("1.0~rc1") < v("1.0~rc2"));
        assert!(v("1.0~~") < v("1.0~"));
    }

    #[test]
    fn test_letters_before_symbols() {
        assert!(v("1.0a") < v("1.0+"));
        assert!(v("1.0") < v("1.0a"));
    }

    #[test]
    fn test_missing_revision_is_oldest() {
        assert!(v("1.8.1") < v("1.8.1-1"));
    }
}

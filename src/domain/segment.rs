use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const MAX_LEN: usize = 64;
const WILDCARD: &str = "*";

/// Normalized segment tag, e.g. `florist` or `bike-shop`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment(String);

impl Segment {
    /// Whether a campaign segment filter selects this segment.
    /// `*` selects every segment.
    pub fn matches_filter(&self, filter: &str) -> bool {
        let filter = filter.trim();
        filter == WILDCARD || filter.eq_ignore_ascii_case(&self.0)
    }
}

impl FromStr for Segment {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::ParsingError("Segment cannot be empty".into()));
        }
        if value.len() > MAX_LEN {
            return Err(Error::ParsingError("Segment too long".into()));
        }
        if value == WILDCARD {
            return Err(Error::ParsingError(
                "Wildcard is only valid as a campaign filter".into(),
            ));
        }
        if !value
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' '))
        {
            return Err(Error::ParsingError(
                "Segment contains invalid characters".into(),
            ));
        }
        Ok(Self(value.to_lowercase()))
    }
}

impl AsRef<str> for Segment {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use claims::assert_err;

    use super::*;

    #[test]
    fn filters_match_case_insensitively() {
        let segment: Segment = "Florist".parse().unwrap();
        assert!(segment.matches_filter("florist"));
        assert!(segment.matches_filter(" FLORIST "));
        assert!(!segment.matches_filter("bakery"));
    }

    #[test]
    fn wildcard_filter_matches_everything() {
        let segment: Segment = "bakery".parse().unwrap();
        assert!(segment.matches_filter("*"));
    }

    #[test]
    fn wildcard_is_not_a_segment() {
        assert_err!("*".parse::<Segment>());
    }

    #[test]
    fn punctuation_is_rejected() {
        assert_err!("bakery; drop".parse::<Segment>());
    }
}

use std::collections::HashSet;
use std::str::FromStr;

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Error, Result};

const MAX_LEN: usize = 256;

/// Name of the person we are reaching out to
#[derive(Debug, Clone, PartialEq)]
pub struct PersonName(String);

impl AsRef<str> for PersonName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for PersonName {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        lazy_static::lazy_static! {
            static ref INVALID_CHARS: HashSet<char> = vec!['/', '(', ')', '"', '<', '>', '\\', '{', '}']
                .into_iter()
                .collect();
        }

        let value = value.trim();
        if value.is_empty() {
            return Err(Error::ParsingError("Name cannot be empty".into()));
        }
        if value.graphemes(true).count() > MAX_LEN {
            return Err(Error::ParsingError("Name too long".into()));
        }
        if value.chars().any(|c| INVALID_CHARS.contains(&c)) {
            return Err(Error::ParsingError(
                "Name contains invalid characters".into(),
            ));
        }
        Ok(Self(value.to_string()))
    }
}

/// Trading name of a prospect's business
///
/// Looser than [`PersonName`]: brackets and slashes show up in real shop names,
/// but anything that could break out of an HTML template is rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessName(String);

impl AsRef<str> for BusinessName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for BusinessName {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::ParsingError("Business name cannot be empty".into()));
        }
        if value.graphemes(true).count() > MAX_LEN {
            return Err(Error::ParsingError("Business name too long".into()));
        }
        if value.chars().any(|c| matches!(c, '<' | '>' | '"' | '{' | '}')) {
            return Err(Error::ParsingError(
                "Business name contains invalid characters".into(),
            ));
        }
        Ok(Self(value.to_string()))
    }
}

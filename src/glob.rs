use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::LabFilesError;

/// Shell-style filename pattern: `*` matches any run of characters, `?`
/// exactly one, everything else literally. Matching is case-sensitive and
/// never crosses a `/`.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, filename: &str) -> bool {
        self.regex.is_match(filename)
    }
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl FromStr for GlobPattern {
    type Err = LabFilesError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Err(LabFilesError::InvalidPattern(value.to_string()));
        }
        let mut expression = String::with_capacity(value.len() + 8);
        expression.push('^');
        let mut buffer = [0u8; 4];
        for ch in value.chars() {
            match ch {
                '*' => expression.push_str("[^/]*"),
                '?' => expression.push_str("[^/]"),
                other => expression.push_str(&regex::escape(other.encode_utf8(&mut buffer))),
            }
        }
        expression.push('$');
        let regex = Regex::new(&expression)
            .map_err(|err| LabFilesError::InvalidPattern(format!("{value}: {err}")))?;
        Ok(Self {
            source: value.to_string(),
            regex,
        })
    }
}

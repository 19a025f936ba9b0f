//! Loads a filter file into a sequence of opaque regex predicates.
//!
//! One regular expression per line; blank lines and lines starting with `#`
//! are ignored. The packlist poller treats these as opaque `Filter`s and
//! never inspects their pattern text.

use regex::Regex;

use crate::error::{Result, SessionError};

pub struct Filter(Regex);

impl Filter {
    pub fn is_match(&self, name: &str) -> bool {
        self.0.is_match(name)
    }
}

pub fn load_filters(text: &str) -> Result<Vec<Filter>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|pattern| {
            Regex::new(pattern)
                .map(Filter)
                .map_err(|e| SessionError::ProtocolParse(format!("bad filter {pattern:?}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_and_comment_lines() {
        let filters = load_filters("# comment\n\nfoo.*bar\n").unwrap();
        assert_eq!(filters.len(), 1);
        assert!(filters[0].is_match("foobar"));
    }

    #[test]
    fn rejects_invalid_regex() {
        assert!(load_filters("([unterminated").is_err());
    }

    #[test]
    fn each_filter_is_independent() {
        let filters = load_filters("A\nB\n").unwrap();
        assert!(filters[0].is_match("xAx"));
        assert!(!filters[0].is_match("xBx"));
        assert!(filters[1].is_match("xBx"));
    }
}

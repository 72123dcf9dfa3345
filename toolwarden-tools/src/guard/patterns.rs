use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest input evaluated against regex patterns.
pub const DEFAULT_MAX_INPUT_LEN: usize = 8 * 1024;

const REGEX_SIZE_LIMIT: usize = 1 << 20;
const REGEX_DFA_SIZE_LIMIT: usize = 2 << 20;
const REGEX_METACHARACTERS: &[char] = &[
    '\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$',
];

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Empty pattern")]
    Empty,

    #[error("Invalid pattern '{pattern}': {reason}")]
    Invalid { pattern: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Literal,
    Regex,
}

/// How a regex pattern is applied. Literals always require equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchoring {
    /// The regex may match anywhere in the input.
    Substring,
    /// The regex must match the entire input.
    Whole,
}

#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    kind: PatternKind,
    compiled: Option<Regex>,
}

impl Pattern {
    /// Classify `raw` as a regex if it contains regex metacharacters,
    /// otherwise as a literal.
    pub fn parse(raw: &str, anchoring: Anchoring) -> Result<Self, PatternError> {
        if raw.contains(REGEX_METACHARACTERS) {
            Self::regex(raw, anchoring)
        } else {
            Self::literal(raw)
        }
    }

    pub fn literal(raw: &str) -> Result<Self, PatternError> {
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self {
            raw: raw.to_string(),
            kind: PatternKind::Literal,
            compiled: None,
        })
    }

    pub fn regex(raw: &str, anchoring: Anchoring) -> Result<Self, PatternError> {
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        let source = match anchoring {
            Anchoring::Substring => raw.to_string(),
            Anchoring::Whole => format!("^(?:{})$", raw),
        };
        let compiled = RegexBuilder::new(&source)
            .size_limit(REGEX_SIZE_LIMIT)
            .dfa_size_limit(REGEX_DFA_SIZE_LIMIT)
            .build()
            .map_err(|e| PatternError::Invalid {
                pattern: raw.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            raw: raw.to_string(),
            kind: PatternKind::Regex,
            compiled: Some(compiled),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    fn is_match(&self, input: &str) -> bool {
        match &self.compiled {
            Some(regex) => regex.is_match(input),
            None => self.raw == input,
        }
    }
}

/// Result of evaluating a pattern list against one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(String),
    NoMatch,
    /// The input exceeded the evaluation bound; regex patterns were skipped.
    Exceeded,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched(_))
    }
}

/// Ordered pattern list; first match wins.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    max_input_len: usize,
}

impl PatternSet {
    pub fn new(patterns: Vec<Pattern>, max_input_len: usize) -> Self {
        Self {
            patterns,
            max_input_len,
        }
    }

    pub fn compile<S: AsRef<str>>(
        raws: &[S],
        anchoring: Anchoring,
        max_input_len: usize,
    ) -> Result<Self, PatternError> {
        let patterns = raws
            .iter()
            .map(|raw| Pattern::parse(raw.as_ref(), anchoring))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(patterns, max_input_len))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn find(&self, input: &str) -> MatchOutcome {
        let bounded = input.len() <= self.max_input_len;
        let mut skipped_regex = false;

        for pattern in &self.patterns {
            if pattern.kind == PatternKind::Regex && !bounded {
                skipped_regex = true;
                continue;
            }
            if pattern.is_match(input) {
                return MatchOutcome::Matched(pattern.raw.clone());
            }
        }

        if skipped_regex {
            MatchOutcome::Exceeded
        } else {
            MatchOutcome::NoMatch
        }
    }

    pub fn matches(&self, input: &str) -> bool {
        self.find(input).is_match()
    }
}

/// True if any pattern in `patterns` matches `input`.
pub fn matches(patterns: &[Pattern], input: &str) -> bool {
    PatternSet::new(patterns.to_vec(), DEFAULT_MAX_INPUT_LEN).matches(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_classification() {
        let literal = Pattern::parse("pwd", Anchoring::Whole).unwrap();
        assert_eq!(literal.kind(), PatternKind::Literal);

        let regex = Pattern::parse(r"git\s+status", Anchoring::Whole).unwrap();
        assert_eq!(regex.kind(), PatternKind::Regex);
    }

    #[test]
    fn test_literal_requires_exact_equality() {
        let set = PatternSet::compile(&["ls"], Anchoring::Substring, DEFAULT_MAX_INPUT_LEN).unwrap();
        assert!(set.matches("ls"));
        assert!(!set.matches("ls -la"));
        assert!(!set.matches("false"));
    }

    #[test]
    fn test_substring_regex() {
        let set =
            PatternSet::compile(&[r"\bsudo\b"], Anchoring::Substring, DEFAULT_MAX_INPUT_LEN).unwrap();
        assert!(set.matches("echo hi && sudo reboot"));
        assert!(!set.matches("pseudocode"));
    }

    #[test]
    fn test_whole_regex_is_anchored() {
        let set = PatternSet::compile(
            &[r"git\s+(status|diff)"],
            Anchoring::Whole,
            DEFAULT_MAX_INPUT_LEN,
        )
        .unwrap();
        assert!(set.matches("git status"));
        assert!(!set.matches("git status; rm x"));
        assert!(!set.matches("sudo git status"));
    }

    #[test]
    fn test_first_match_wins() {
        let set = PatternSet::compile(
            &[r"rm\s", r"rm\s+-rf"],
            Anchoring::Substring,
            DEFAULT_MAX_INPUT_LEN,
        )
        .unwrap();
        assert_eq!(set.find("rm -rf x"), MatchOutcome::Matched(r"rm\s".to_string()));
    }

    #[test]
    fn test_oversized_input_reports_exceeded() {
        let set = PatternSet::compile(&[r"a+b"], Anchoring::Substring, 16).unwrap();
        let long = "a".repeat(64);
        assert_eq!(set.find(&long), MatchOutcome::Exceeded);
    }

    #[test]
    fn test_oversized_input_still_checks_literals() {
        let long = "x".repeat(64);
        let set = PatternSet::compile(&[r"a+b", long.as_str()], Anchoring::Substring, 16).unwrap();
        assert!(set.matches(&long));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let result = Pattern::parse("(unclosed", Anchoring::Substring);
        assert!(matches!(result, Err(PatternError::Invalid { .. })));
        assert!(matches!(Pattern::literal(""), Err(PatternError::Empty)));
    }

    #[test]
    fn test_free_function() {
        let patterns = vec![Pattern::literal("whoami").unwrap()];
        assert!(matches(&patterns, "whoami"));
        assert!(!matches(&patterns, "whoami --help"));
    }
}

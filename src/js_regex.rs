use std::fmt;

#[derive(Debug, Clone)]
pub(crate) struct Regex {
    backend: fancy_regex::Regex,
}

impl Regex {
    /// Compiles a pattern with script-style flags (`g`, `i`, `m`, `s`, `u`, `y`).
    /// `g`, `u` and `y` do not change compilation and are handled by callers.
    pub(crate) fn with_flags(source: &str, flags: &str) -> Result<Self, RegexError> {
        let mut builder = RegexBuilder::new(source);
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'g' | 'u' | 'y' => {}
                other => {
                    return Err(RegexError {
                        message: format!("invalid regular expression flag '{other}'"),
                    });
                }
            }
        }
        builder.build()
    }

    pub(crate) fn captures_from_pos(
        &self,
        input: &str,
        start: usize,
    ) -> Result<Option<Captures>, RegexError> {
        let captures = self
            .backend
            .captures_from_pos(input, start)
            .map_err(RegexError::from)?;
        Ok(captures.as_ref().map(Captures::from_backend))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RegexBuilder {
    pattern: String,
    case_insensitive: bool,
    multi_line: bool,
    dot_matches_new_line: bool,
}

impl RegexBuilder {
    pub(crate) fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            case_insensitive: false,
            multi_line: false,
            dot_matches_new_line: false,
        }
    }

    pub(crate) fn case_insensitive(&mut self, enabled: bool) -> &mut Self {
        self.case_insensitive = enabled;
        self
    }

    pub(crate) fn multi_line(&mut self, enabled: bool) -> &mut Self {
        self.multi_line = enabled;
        self
    }

    pub(crate) fn dot_matches_new_line(&mut self, enabled: bool) -> &mut Self {
        self.dot_matches_new_line = enabled;
        self
    }

    pub(crate) fn build(&self) -> Result<Regex, RegexError> {
        let mut builder = fancy_regex::RegexBuilder::new(&self.pattern);
        builder.case_insensitive(self.case_insensitive);
        builder.multi_line(self.multi_line);
        builder.dot_matches_new_line(self.dot_matches_new_line);
        let backend = builder.build().map_err(RegexError::from)?;
        Ok(Regex { backend })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Captures {
    groups: Vec<Option<Match>>,
}

impl Captures {
    fn from_backend(captures: &fancy_regex::Captures<'_>) -> Self {
        let mut groups = Vec::with_capacity(captures.len());
        for idx in 0..captures.len() {
            let matched = captures.get(idx).map(Match::from_backend);
            groups.push(matched);
        }
        Self { groups }
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Match> {
        self.groups.get(index).and_then(Option::as_ref)
    }
}

/// A match with byte offsets into the searched input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Match {
    start: usize,
    end: usize,
}

impl Match {
    fn from_backend(matched: fancy_regex::Match<'_>) -> Self {
        Self {
            start: matched.start(),
            end: matched.end(),
        }
    }

    pub(crate) fn start(&self) -> usize {
        self.start
    }

    pub(crate) fn end(&self) -> usize {
        self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegexError {
    message: String,
}

impl fmt::Display for RegexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RegexError {}

impl From<fancy_regex::Error> for RegexError {
    fn from(value: fancy_regex::Error) -> Self {
        Self {
            message: value.to_string(),
        }
    }
}

/// Whether a capturing group opens while another capturing group is still open.
/// Group offsets recovered by suffix scanning are unreliable in that case.
pub(crate) fn has_nested_groups(source: &str) -> bool {
    let mut open_capturing = 0usize;
    let mut stack = Vec::new();
    let mut escaped = false;
    let mut in_class = false;
    let chars = source.chars().collect::<Vec<_>>();

    for (idx, ch) in chars.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => {
                let capturing = chars.get(idx + 1) != Some(&'?')
                    || matches!(
                        (chars.get(idx + 2), chars.get(idx + 3)),
                        (Some('<'), Some(next)) if *next != '=' && *next != '!'
                    );
                if capturing {
                    if open_capturing > 0 {
                        return true;
                    }
                    open_capturing += 1;
                }
                stack.push(capturing);
            }
            ')' if !in_class => {
                if stack.pop() == Some(true) {
                    open_capturing = open_capturing.saturating_sub(1);
                }
            }
            _ => {}
        }
    }
    false
}

/// Converts a byte offset into `input` into a char offset.
pub(crate) fn char_offset(input: &str, byte_offset: usize) -> usize {
    input
        .get(..byte_offset)
        .map(|prefix| prefix.chars().count())
        .unwrap_or_else(|| input.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_applied() -> Result<(), RegexError> {
        let regex = Regex::with_flags("abc", "gi")?;
        let captures = regex.captures_from_pos("xxABC", 0)?;
        let whole = captures.as_ref().and_then(|c| c.get(0)).map(Match::start);
        assert_eq!(whole, Some(2));
        assert!(Regex::with_flags("a", "q").is_err());
        Ok(())
    }

    #[test]
    fn nested_group_detection() {
        assert!(!has_nested_groups("(a)(b)"));
        assert!(has_nested_groups("((a)b)"));
        assert!(!has_nested_groups("(?:(a))"));
        assert!(!has_nested_groups("[(](a)"));
        assert!(has_nested_groups("(?<outer>x(y))"));
    }

    #[test]
    fn char_offsets_count_scalars() {
        assert_eq!(char_offset("ñab", 2), 1);
        assert_eq!(char_offset("abc", 10), 3);
    }
}

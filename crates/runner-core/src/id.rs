use std::fmt;

use serde::{Deserialize, Serialize};

/// Compound task identifier, unique within one run.
///
/// Renders to a human string (`suite-01-/bin/true`) and to a
/// filesystem-safe string via [`TaskId::str_filesystem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskId {
    /// Name of the suite the task belongs to.
    pub suite: String,
    /// 1-based sequence number within the suite.
    pub number: u32,
    /// The runnable URI, kept for readability of the rendered id.
    pub uri: String,
    /// Zero-padding width for `number`, the width of the suite size.
    pub no_digits: usize,
}

impl TaskId {
    /// Builds an identifier for task `number` of `suite`.
    pub fn new(suite: impl Into<String>, number: u32, uri: impl Into<String>, no_digits: usize) -> Self {
        Self {
            suite: suite.into(),
            number,
            uri: uri.into(),
            no_digits,
        }
    }

    /// Filesystem-safe rendition: anything outside `[A-Za-z0-9_.-]`
    /// becomes `_`.
    pub fn str_filesystem(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:0width$}-{}",
            self.suite,
            self.number,
            self.uri,
            width = self.no_digits.max(1)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_with_padding() {
        let id = TaskId::new("suite", 7, "/bin/true", 3);
        assert_eq!(id.to_string(), "suite-007-/bin/true");
    }

    #[test]
    fn filesystem_form_is_sanitized() {
        let id = TaskId::new("suite", 1, "/bin/echo hello", 1);
        assert_eq!(id.str_filesystem(), "suite-1-_bin_echo_hello");
    }
}

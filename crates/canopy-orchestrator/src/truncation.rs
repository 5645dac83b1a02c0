//! Automatic truncation of large tool outputs.
//!
//! Tool bodies can produce arbitrarily large output; feeding it all to the
//! model bloats the context window. The truncator caps output by line count
//! and byte size, keeping the head and appending an explicit notice about
//! what was elided.

use serde::{Deserialize, Serialize};

/// Limits for tool output truncation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationConfig {
    /// Maximum number of lines before truncation.
    pub max_lines: usize,
    /// Maximum size in bytes before truncation.
    pub max_bytes: usize,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self { max_lines: 2000, max_bytes: 50 * 1024 }
    }
}

/// Metadata about an applied truncation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationMetadata {
    /// Total number of lines in the original output.
    pub total_lines: usize,
    /// Total size of the original output in bytes.
    pub total_bytes: usize,
    /// Whether the output was truncated.
    pub is_truncated: bool,
    /// Line number where truncation occurred, if truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_at_line: Option<usize>,
}

/// Truncates oversized tool output, keeping the head.
#[derive(Debug, Clone, Default)]
pub struct OutputTruncator {
    config: TruncationConfig,
}

impl OutputTruncator {
    /// Creates a truncator with the given limits.
    #[must_use]
    pub fn new(config: TruncationConfig) -> Self {
        Self { config }
    }

    /// Truncates `output` if it exceeds the configured limits.
    ///
    /// # Arguments
    /// * `output` - The tool output to potentially truncate
    ///
    /// # Returns
    /// The (possibly truncated) output and metadata describing what happened.
    /// Untruncated output is returned unchanged.
    #[must_use]
    pub fn truncate(&self, output: &str) -> (String, TruncationMetadata) {
        let total_lines = output.lines().count();
        let total_bytes = output.len();

        if total_lines <= self.config.max_lines && total_bytes <= self.config.max_bytes {
            let metadata = TruncationMetadata {
                total_lines,
                total_bytes,
                is_truncated: false,
                truncated_at_line: None,
            };
            return (output.to_string(), metadata);
        }

        // Cut by lines first, then tighten by bytes if the head is still too big.
        let mut kept: Vec<&str> = output.lines().take(self.config.max_lines).collect();
        let mut head = kept.join("\n");
        while head.len() > self.config.max_bytes && kept.len() > 1 {
            kept.pop();
            head = kept.join("\n");
        }
        if head.len() > self.config.max_bytes {
            let mut cut = self.config.max_bytes;
            while cut > 0 && !head.is_char_boundary(cut) {
                cut -= 1;
            }
            head.truncate(cut);
        }

        let truncated_at = kept.len();
        let elided_lines = total_lines.saturating_sub(truncated_at);
        let notice = format!(
            "\n\n[OUTPUT TRUNCATED: showing {truncated_at} of {total_lines} lines \
             ({elided_lines} elided, {total_bytes} bytes total). \
             Narrow the request to see the rest.]"
        );

        let metadata = TruncationMetadata {
            total_lines,
            total_bytes,
            is_truncated: true,
            truncated_at_line: Some(truncated_at),
        };

        (head + &notice, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truncator(max_lines: usize, max_bytes: usize) -> OutputTruncator {
        OutputTruncator::new(TruncationConfig { max_lines, max_bytes })
    }

    #[test]
    fn test_no_truncation_under_limits() {
        let t = truncator(100, 10_000);
        let output = "line one\nline two";
        let (result, meta) = t.truncate(output);
        assert_eq!(result, output);
        assert!(!meta.is_truncated);
        assert_eq!(meta.total_lines, 2);
    }

    #[test]
    fn test_truncates_by_lines() {
        let t = truncator(5, 10_000);
        let output: String =
            (0..10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let (result, meta) = t.truncate(&output);
        assert!(meta.is_truncated);
        assert_eq!(meta.total_lines, 10);
        assert_eq!(meta.truncated_at_line, Some(5));
        assert!(result.contains("line 4"));
        assert!(!result.contains("line 9"));
        assert!(result.contains("OUTPUT TRUNCATED"));
    }

    #[test]
    fn test_truncates_by_bytes() {
        let t = truncator(1000, 50);
        let output: String = (0..20).map(|i| format!("row {i:04}")).collect::<Vec<_>>().join("\n");
        let (result, meta) = t.truncate(&output);
        assert!(meta.is_truncated);
        // Head (before the notice) must fit the byte budget.
        let head = result.split("\n\n[OUTPUT TRUNCATED").next().unwrap();
        assert!(head.len() <= 50);
    }

    #[test]
    fn test_exact_limit_not_truncated() {
        let t = truncator(3, 10_000);
        let output = "a\nb\nc";
        let (result, meta) = t.truncate(output);
        assert!(!meta.is_truncated);
        assert_eq!(result, output);
    }

    #[test]
    fn test_multibyte_boundary_respected() {
        let t = truncator(1000, 10);
        let output = "héllo wörld with accénts and more text";
        let (result, meta) = t.truncate(output);
        assert!(meta.is_truncated);
        // Must not panic and must produce valid UTF-8 (implied by String).
        assert!(result.contains("OUTPUT TRUNCATED"));
    }
}

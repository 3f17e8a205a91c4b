//! Finish-marker detection for agent loops.

use serde::{Deserialize, Serialize};

/// Markers recognised when no explicit set is configured.
pub const DEFAULT_MARKERS: &[&str] = &["[[done]]", "<<TASK_COMPLETE>>"];

/// How assistant text is rendered for the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Markers stripped, for people reading the answer.
    #[default]
    Final,
    /// Markers retained, for process watchers keyed on them.
    Full,
}

/// Case-insensitive substring scan for a fixed set of markers.
///
/// Matching folds ASCII letters only, so byte offsets in the lowered text
/// line up with the original. Non-ASCII letters must match exactly;
/// [`EngineConfig::validate`](crate::EngineConfig::validate) rejects
/// non-ASCII markers.
#[derive(Debug, Clone)]
pub struct SentinelDetector {
    markers: Vec<String>,
}

impl Default for SentinelDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MARKERS.iter().copied())
    }
}

impl SentinelDetector {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers = markers
            .into_iter()
            .map(|m| m.as_ref().trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    /// First configured marker present in `text`.
    #[must_use]
    pub fn detect(&self, text: &str) -> Option<&str> {
        let lowered = text.to_ascii_lowercase();
        self.markers
            .iter()
            .find(|m| lowered.contains(m.as_str()))
            .map(String::as_str)
    }

    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.detect(text).is_some()
    }

    /// Remove every marker occurrence and trim what is left.
    #[must_use]
    pub fn strip(&self, text: &str) -> String {
        let mut out = text.to_string();
        for marker in &self.markers {
            loop {
                let lowered = out.to_ascii_lowercase();
                let Some(pos) = lowered.find(marker.as_str()) else {
                    break;
                };
                out.replace_range(pos..pos + marker.len(), "");
            }
        }
        out.trim().to_string()
    }

    #[must_use]
    pub fn render(&self, text: &str, mode: DisplayMode) -> String {
        match mode {
            DisplayMode::Final => self.strip(text),
            DisplayMode::Full => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_case_insensitively() {
        let detector = SentinelDetector::default();
        assert_eq!(detector.detect("All finished. [[DONE]]"), Some("[[done]]"));
        assert_eq!(
            detector.detect("<<task_complete>>"),
            Some("<<task_complete>>")
        );
        assert!(detector.matches("[[Done]]"));
        assert!(!detector.matches("done"));
        assert!(!detector.matches("[[ done ]]"));
    }

    #[test]
    fn test_detects_regardless_of_surrounding_whitespace() {
        let detector = SentinelDetector::default();
        assert!(detector.matches("\n\n   [[done]]   \n"));
        assert!(detector.matches("result:[[done]]trailing"));
        assert!(detector.matches("\t<<TASK_COMPLETE>>\r\n"));
    }

    #[test]
    fn test_final_mode_strips_and_full_mode_retains() {
        let detector = SentinelDetector::default();
        let text = "Deleted tmp.txt.\n[[Done]]\n";
        assert_eq!(detector.render(text, DisplayMode::Final), "Deleted tmp.txt.");
        assert_eq!(detector.render(text, DisplayMode::Full), text);
    }

    #[test]
    fn test_strip_removes_every_occurrence() {
        let detector = SentinelDetector::default();
        assert_eq!(
            detector.strip("[[done]] a <<TASK_COMPLETE>> b [[DONE]]"),
            "a  b"
        );
    }

    #[test]
    fn test_non_ascii_text_keeps_offsets_aligned() {
        let detector = SentinelDetector::default();
        assert_eq!(detector.strip("Gelöscht ✓ [[DONE]] Ünd"), "Gelöscht ✓  Ünd");
        // only ASCII letters fold
        let detector = SentinelDetector::new(["ÉTÉ"]);
        assert!(detector.matches("ÉTÉ"));
        assert!(!detector.matches("été"));
    }

    #[test]
    fn test_custom_markers_ignore_blanks() {
        let detector = SentinelDetector::new(["  FINISHED ", ""]);
        assert!(detector.matches("we are finished"));
        assert!(!detector.matches("[[done]]"));
        assert_eq!(detector.strip("x Finished"), "x");
    }
}

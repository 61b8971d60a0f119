use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How many leading lines of a page may carry the printed page number.
pub const PAGE_NUMBER_SCAN_LINES: usize = 3;

/// Raw body of a Read operation, as returned by the OCR service and as stored
/// in the `full_texts` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadOperation {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "analyzeResult", default)]
    pub analyze_result: Option<AnalyzeResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeResult {
    #[serde(rename = "readResults", default)]
    pub read_results: Vec<Page>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default)]
    pub lines: Vec<Line>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub text: String,
}

/// Ordered pages of ordered OCR lines for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub pages: Vec<Page>,
}

impl Transcript {
    #[cfg(test)]
    pub fn from_pages(pages: Vec<Page>) -> Self {
        Self { pages }
    }

    /// Parse the stored OCR body. A body without `analyzeResult` is an error:
    /// it means the operation never completed.
    pub fn from_json(text: &str) -> Result<Self> {
        let op: ReadOperation = serde_json::from_str(text).context("failed to parse OCR result JSON")?;
        let result = op
            .analyze_result
            .context("failed to parse OCR result: missing analyzeResult")?;
        Ok(Self { pages: result.read_results })
    }

    pub fn line_count(&self) -> usize {
        self.pages.iter().map(|p| p.lines.len()).sum()
    }
}

impl Page {
    /// Build a page from plain strings.
    #[cfg(test)]
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            page: None,
            lines: lines.into_iter().map(|t| Line { text: t.into() }).collect(),
        }
    }

    /// The printed page number: the first purely numeric line among the first
    /// few lines, or "" when there is none.
    pub fn detect_page_number(&self) -> &str {
        self.lines
            .iter()
            .take(PAGE_NUMBER_SCAN_LINES)
            .map(|l| l.text.as_str())
            .find(|t| is_page_number(t))
            .unwrap_or("")
    }
}

fn is_page_number(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_number_from_first_lines() {
        let page = Page::from_lines(["THE KENYA GAZETTE", "14", "18th January, 2008"]);
        assert_eq!(page.detect_page_number(), "14");
    }

    #[test]
    fn page_number_only_within_scan_window() {
        let page = Page::from_lines(["a", "b", "c", "15"]);
        assert_eq!(page.detect_page_number(), "");
    }

    #[test]
    fn page_number_rejects_mixed_and_empty() {
        let page = Page::from_lines(["", "14a", " 14", "page"]);
        assert_eq!(page.detect_page_number(), "");
        assert_eq!(Page::default().detect_page_number(), "");
    }

    #[test]
    fn page_number_takes_first_match() {
        let page = Page::from_lines(["518518217", "516"]);
        assert_eq!(page.detect_page_number(), "518518217");
    }

    #[test]
    fn parses_read_operation_body() {
        let body = r#"{
            "status": "succeeded",
            "createdDateTime": "2024-01-01T00:00:00Z",
            "analyzeResult": {
                "version": "3.2.0",
                "readResults": [
                    {"page": 1, "angle": 0, "lines": [{"text": "14", "boundingBox": [0,0]}, {"text": "GAZETTE NOTICE NO. 43"}]},
                    {"page": 2, "lines": []}
                ]
            }
        }"#;
        let t = Transcript::from_json(body).unwrap();
        assert_eq!(t.pages.len(), 2);
        assert_eq!(t.pages[0].page, Some(1));
        assert_eq!(t.pages[0].lines[1].text, "GAZETTE NOTICE NO. 43");
        assert_eq!(t.line_count(), 2);
    }

    #[test]
    fn body_without_result_is_an_error() {
        let err = Transcript::from_json(r#"{"status": "running"}"#).unwrap_err();
        assert!(err.to_string().contains("analyzeResult"));
        assert!(Transcript::from_json("not json").is_err());
    }
}

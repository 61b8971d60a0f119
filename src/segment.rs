//! Splits an OCR transcript into gazette notices.
//!
//! A notice starts at a line containing the `GAZETTE NOTICE NO` marker and
//! runs until the next marker. OCR regularly merges the tail of one notice and
//! the head of the next into a single line, so text in front of a marker is
//! handed back to the notice that was open before it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::transcript::Transcript;

pub const NOTICE_MARKER: &str = "GAZETTE NOTICE NO";
pub const LABEL_PREFIX: &str = "GAZETTE NOTICE NO.";
pub const PRICE_MARKER: &str = "Price: KSh";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub content: String,
    pub page_number: String,
}

impl Section {
    pub fn new(page_number: impl Into<String>) -> Self {
        Self { content: String::new(), page_number: page_number.into() }
    }

    fn push_text(&mut self, text: &str) {
        self.content.push_str(text);
        self.content.push(' ');
    }
}

/// Mapping form used when sizing a section: `{'content': ..., 'page_number': ...}`.
impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{'content': '{}', 'page_number': '{}'}}", self.content, self.page_number)
    }
}

/// Notices keyed by label, in the order their labels first appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sections(IndexMap<String, Section>);

impl Sections {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&Section> {
        self.0.get(label)
    }

    pub fn insert(&mut self, label: impl Into<String>, section: Section) {
        self.0.insert(label.into(), section);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Section)> {
        self.0.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl IntoIterator for Sections {
    type Item = (String, Section);
    type IntoIter = indexmap::map::IntoIter<String, Section>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(String, Section)> for Sections {
    fn from_iter<T: IntoIterator<Item = (String, Section)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of a segmentation pass: the sections plus the label still open when
/// the document ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmentation {
    pub sections: Sections,
    pub open_label: Option<String>,
}

/// A line split at its first notice marker.
#[derive(Debug, PartialEq, Eq)]
struct MarkerSplit<'a> {
    before: &'a str,
    number: &'a str,
    body: &'a str,
}

/// Byte offset of the first marker that stands on its own: followed by `.`,
/// whitespace, a digit or the end of the line. `NOS.` and `NOTE` do not count.
fn find_marker(text: &str) -> Option<usize> {
    text.match_indices(NOTICE_MARKER).map(|(idx, _)| idx).find(|&idx| {
        match text[idx + NOTICE_MARKER.len()..].chars().next() {
            None => true,
            Some(c) => c == '.' || c.is_whitespace() || c.is_ascii_digit(),
        }
    })
}

/// Only the first marker is split. Anything after it, including a second
/// marker, belongs to the number fragment (up to the first colon) or the body.
fn split_at_marker(text: &str) -> Option<MarkerSplit<'_>> {
    let idx = find_marker(text)?;
    let (before, after) = (&text[..idx], &text[idx + NOTICE_MARKER.len()..]);
    let after = after.strip_prefix('.').unwrap_or(after);
    let (number, body) = match after.split_once(':') {
        Some((number, body)) => (number.trim(), body.trim()),
        None => (after.trim(), ""),
    };
    Some(MarkerSplit { before: before.trim(), number, body })
}

pub fn notice_label(number: &str) -> String {
    if number.is_empty() {
        LABEL_PREFIX.to_string()
    } else {
        format!("{} {}", LABEL_PREFIX, number)
    }
}

/// Walk the transcript and collect notices. Lines before the first marker are
/// dropped.
pub fn segment(transcript: &Transcript) -> Segmentation {
    let mut sections = Sections::new();
    let mut open: Option<String> = None;

    for page in &transcript.pages {
        let page_number = page.detect_page_number();
        for line in &page.lines {
            let text = line.text.as_str();
            if let Some(split) = split_at_marker(text) {
                if let Some(section) = open
                    .as_ref()
                    .filter(|_| !split.before.is_empty())
                    .and_then(|l| sections.0.get_mut(l))
                {
                    section.push_text(split.before);
                }
                let label = notice_label(split.number);
                let section = sections
                    .0
                    .entry(label.clone())
                    .or_insert_with(|| Section::new(page_number));
                section.push_text(split.body);
                open = Some(label);
            } else if let Some(section) = open.as_ref().and_then(|l| sections.0.get_mut(l)) {
                section.push_text(text);
            }
        }
    }

    Segmentation { sections, open_label: open }
}

/// Cut a price footer off the notice left open at the end of the document.
/// Returns true when something was removed.
pub fn trim_price_footer(segmentation: &mut Segmentation) -> bool {
    let Some(label) = segmentation.open_label.as_ref() else { return false };
    let Some(section) = segmentation.sections.0.get_mut(label) else { return false };
    match section.content.find(PRICE_MARKER) {
        Some(idx) => {
            section.content = section.content[..idx].trim().to_string();
            true
        }
        None => false,
    }
}

/// Segment and clean a transcript in one go.
pub fn split_notices(transcript: &Transcript) -> Sections {
    let mut segmentation = segment(transcript);
    trim_price_footer(&mut segmentation);
    segmentation.sections
}

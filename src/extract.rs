//! Prompting the model for land-registry fields and reading its answer.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::segment::{Section, Sections};

/// Instructions sent with every batch. The model receives the batch as a JSON
/// object of notice label to `{content, page_number}`.
pub const SYSTEM_PROMPT: &str = r#"You extract land related structured data from Kenya Gazette notices.
The user message is a JSON object mapping a notice label (e.g. "GAZETTE NOTICE NO. 43") to
{"content": <notice text>, "page_number": <page as printed>}. For every land related notice return:
  1. Names: full names of the registered proprietors, comma-separated, no ID numbers or addresses.
  2. Location: the location, including "district of" when mentioned. When no location is stated,
     use the place named after "Land Registrar" at the end of the notice.
  3. Title No: every number identifying the land (Title No., LR No., Parcel No., IR No., CR No.),
     keeping original special characters, comma-separated when there are several.
  4. Notice No: the numeric part of "GAZETTE NOTICE NO." only.
  5. Page No: the page number digits only.

Respond with a JSON array and nothing else, for example:
[
  {"Names": "Syprose Helida Odero", "Location": "Kisumu", "Title No": "Kisumu/Ojolla/4186", "Notice No": 43, "Page No": 14},
  {"Names": "Ibrahim Njama Mbugua, Anthony Mogusi Nyakoni", "Location": "district of Uasin Gishu", "Title No": "Uasin Gishu/Kimumu/1010", "Notice No": 50, "Page No": 14}
]

Keep in mind:
  1. Poor OCR sometimes merges two notices into one entry ("... Eldoret. GAZETTE NOTICE No. 50 THE REGISTERED LAND ACT ...").
     Return a separate object for each notice.
  2. OCR often repeats page numbers: "518518217" means 518, "19141914" means 1914.
  3. Many notices are not land related (probate and administration, court causes, planning
     completion notices). If none of the notices in the message is land related respond exactly:
     [{"Response": "None"}]
Responses are not reviewed by a human, so the format must always be respected."#;

/// Render a batch as the user message.
pub fn render_batch(sections: &Sections) -> Result<String> {
    serde_json::to_string_pretty(sections).context("serializing batch")
}

/// One land notice as read by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedRecord {
    pub names: Option<String>,
    pub location: Option<String>,
    pub title_no: Option<String>,
    pub notice_no: Option<String>,
    pub page_no: Option<i64>,
}

impl ExtractedRecord {
    /// Holder names as stored: the model's comma-separated string as one entry.
    pub fn holder_names(&self) -> Vec<String> {
        self.names.iter().filter(|s| !s.is_empty()).cloned().collect()
    }

    pub fn registration_numbers(&self) -> Vec<String> {
        self.title_no.iter().filter(|s| !s.is_empty()).cloned().collect()
    }
}

/// What came back for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub records: Vec<ExtractedRecord>,
    /// Entries carrying the "not land related" marker.
    pub discarded: usize,
    /// False when the answer was not a JSON array at all.
    pub usable: bool,
}

/// Models like to wrap JSON in markdown fences.
fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else { return t };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn as_text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(|i| as_text(Some(i))).collect();
            Some(parts.join(", "))
        }
        _ => None,
    }
}

fn as_int(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Parse a model answer. Anything that is not a JSON array yields no records;
/// there is no partial recovery.
pub fn parse_response(text: &str) -> ParsedResponse {
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(strip_code_fence(text)) else {
        return ParsedResponse::default();
    };
    let mut parsed = ParsedResponse { usable: true, ..Default::default() };
    for item in items {
        let Value::Object(obj) = item else { continue };
        if obj.get("Response").is_some_and(is_truthy) {
            parsed.discarded += 1;
            continue;
        }
        parsed.records.push(ExtractedRecord {
            names: as_text(obj.get("Names")),
            location: as_text(obj.get("Location")),
            title_no: as_text(obj.get("Title No")),
            notice_no: as_text(obj.get("Notice No")),
            page_no: as_int(obj.get("Page No")),
        });
    }
    parsed
}

/// The batch entry a record was read from, matched on the notice number.
pub fn source_section<'a>(sections: &'a Sections, record: &ExtractedRecord) -> Option<&'a Section> {
    let wanted = record.notice_no.as_deref()?;
    sections
        .iter()
        .find(|(label, _)| {
            let digits: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
            !digits.is_empty() && digits == wanted
        })
        .map(|(_, s)| s)
}

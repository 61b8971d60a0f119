//! Submission-style CSV export of stored extraction results.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::LazyLock;

use crate::db::SectionText;

pub const HOLDER_SUFFIX: &str = "name of the holder";
pub const REGISTRATION_SUFFIX: &str = "Registration numbers";
pub const LOCATION_SUFFIX: &str = "Land location";
pub const MISSING_PREDICTION: &str = "none";

/// Normalize a predicted value: lower-case, no whitespace, only letters,
/// digits and `/`. Comma-separated parts are cleaned one by one and keep their
/// commas. Falls back to the value as given if normalization fails.
pub fn normalize_value(value: &str) -> String {
    try_normalize(value).unwrap_or_else(|| value.to_string())
}

static RE_WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());
static RE_DISALLOWED: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\s/]").ok());

fn try_normalize(value: &str) -> Option<String> {
    let whitespace = RE_WHITESPACE.as_ref()?;
    let disallowed = RE_DISALLOWED.as_ref()?;
    let compact = whitespace.replace_all(value.trim(), "").to_lowercase();
    let cleaned = if compact.contains(',') {
        compact
            .split(',')
            .map(|part| disallowed.replace_all(part, "").into_owned())
            .collect::<Vec<_>>()
            .join(",")
    } else {
        disallowed.replace_all(&compact, "").into_owned()
    };
    Some(cleaned)
}

/// Volume 252 of 2022 is referenced without the `VOL` prefix.
pub fn submission_filename(filename: &str) -> String {
    if filename.contains("2022_VOL252") {
        filename.replace("VOL252", "252")
    } else {
        filename.to_string()
    }
}

fn row_id(filename: &str, notice: &str, suffix: &str) -> String {
    format!("{}_{}_{}", filename, notice, suffix)
}

/// The `(id, pred)` rows for one stored section, skipping empty fields.
pub fn section_rows(section: &SectionText) -> Vec<(String, String)> {
    let filename = submission_filename(&section.filename);
    let notice = section.gazette_notice_number.as_deref().unwrap_or("None");
    let mut rows = Vec::new();
    if !section.name_of_holder.is_empty() {
        let holders = section.name_of_holder.join(", ");
        rows.push((row_id(&filename, notice, HOLDER_SUFFIX), normalize_value(&holders)));
    }
    if !section.registration_number.is_empty() {
        let numbers = section.registration_number.join(", ");
        rows.push((row_id(&filename, notice, REGISTRATION_SUFFIX), normalize_value(&numbers)));
    }
    if let Some(location) = section.location.as_deref().filter(|l| !l.is_empty()) {
        rows.push((row_id(&filename, notice, LOCATION_SUFFIX), normalize_value(location)));
    }
    rows
}

/// Ids listed in the first column of a sample submission (header skipped).
pub fn read_sample_ids<R: Read>(reader: R) -> Result<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);
    let mut ids = Vec::new();
    for record in rdr.records() {
        let record = record.context("failed to parse sample submission")?;
        if let Some(id) = record.get(0) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub rows: usize,
    pub filled: usize,
}

/// Write `id,pred` rows for `sections`, then a `none` row for every sample id
/// that was not exported.
pub fn write_export<W: Write>(writer: W, sections: &[SectionText], sample_ids: &[String]) -> Result<ExportSummary> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["id", "pred"])?;
    let mut exported: HashSet<String> = HashSet::new();
    let mut summary = ExportSummary::default();
    for section in sections {
        for (id, pred) in section_rows(section) {
            wtr.write_record([id.as_str(), pred.as_str()])?;
            exported.insert(id);
            summary.rows += 1;
        }
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for id in sample_ids {
        if !exported.contains(id) && seen.insert(id.as_str()) {
            wtr.write_record([id.as_str(), MISSING_PREDICTION])?;
            summary.filled += 1;
        }
    }
    wtr.flush().context("writing CSV export")?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn section(filename: &str, notice: &str) -> SectionText {
        SectionText {
            id: Uuid::new_v4(),
            full_text_id: Uuid::new_v4(),
            section_content: String::new(),
            filename: filename.into(),
            page_number: Some(14),
            gazette_notice_number: Some(notice.into()),
            name_of_holder: vec!["Ibrahim Njama Mbugua, Anthony Mogusi Nyakoni".into()],
            registration_number: vec!["Eldoret Mun/Block 21 (King'ong'o)1544".into()],
            location: Some("district of Uasin Gishu".into()),
        }
    }

    #[test]
    fn normalizes_names_and_titles() {
        assert_eq!(normalize_value("Syprose Helida Odero"), "syprosehelidaodero");
        assert_eq!(
            normalize_value("Ibrahim Njama Mbugua, Anthony Mogusi Nyakoni"),
            "ibrahimnjamambugua,anthonymogusinyakoni"
        );
        assert_eq!(normalize_value("Eldoret Mun/Block 21 (King'ong'o)1544"), "eldoretmun/block21kingongo1544");
        assert_eq!(normalize_value("  "), "");
    }

    #[test]
    fn normalizing_many_values_reuses_patterns() {
        let values: Vec<String> = (0..500).map(|i| format!("Plot No. {} , Block A", i)).collect();
        let out: Vec<String> = values.iter().map(|v| normalize_value(v)).collect();
        assert_eq!(out[0], "plotno0,blocka");
        assert_eq!(out[499], "plotno499,blocka");
        assert!(RE_WHITESPACE.is_some() && RE_DISALLOWED.is_some());
    }

    #[test]
    fn volume_252_filename_fix() {
        assert_eq!(submission_filename("2022_VOL252"), "2022_252");
        assert_eq!(submission_filename("2021_VOL252"), "2021_VOL252");
    }

    #[test]
    fn rows_skip_empty_fields() {
        let mut s = section("2022_VOL252", "50");
        s.location = Some(String::new());
        s.registration_number.clear();
        let rows = section_rows(&s);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "2022_252_50_name of the holder");
    }

    #[test]
    fn export_fills_missing_sample_ids() {
        let sample = "id,pred\n2008_VOL110_50_name of the holder,x\n2008_VOL110_99_Land location,x\n2008_VOL110_99_Land location,x\n";
        let ids = read_sample_ids(sample.as_bytes()).unwrap();
        assert_eq!(ids.len(), 3);

        let mut out = Vec::new();
        let summary = write_export(&mut out, &[section("2008_VOL110", "50")], &ids).unwrap();
        assert_eq!(summary, ExportSummary { rows: 3, filled: 1 });
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id,pred");
        assert_eq!(lines[1], "2008_VOL110_50_name of the holder,\"ibrahimnjamambugua,anthonymogusinyakoni\"");
        assert_eq!(lines[3], "2008_VOL110_50_Land location,districtofuasingishu");
        assert_eq!(lines[4], "2008_VOL110_99_Land location,none");
        assert_eq!(lines.len(), 5);
    }
}

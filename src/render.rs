use serde::Serialize;

use crate::batch::{BatchPlan, SkippedSection};
use crate::export::ExportSummary;
use crate::pipeline::RunSummary;
use crate::segment::Sections;

pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to serialize json: {}", e),
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ErrorOut<'a> {
    pub code: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'a str>,
}

pub fn print_json_error(code: &str, message: &str, hint: Option<&str>) {
    let err = ErrorOut { code, message, hint };
    print_json(&err);
}

/// First characters of a notice body, on one line.
fn preview(content: &str, width: usize) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= width {
        return flat;
    }
    let cut: String = flat.chars().take(width).collect();
    format!("{}...", cut)
}

pub fn render_sections_text(sections: &Sections) {
    for (label, section) in sections.iter() {
        let page = if section.page_number.is_empty() { "-" } else { section.page_number.as_str() };
        println!("{} (page {}): {}", label, page, preview(&section.content, 72));
    }
    println!("{} sections", sections.len());
}

fn render_skipped_text(skipped: &[SkippedSection]) {
    if skipped.is_empty() {
        return;
    }
    println!("\nSkipped (over the per-section limit):");
    for s in skipped {
        println!("- {} ({} tokens)", s.label, s.tokens);
    }
}

pub fn render_plan_text(plan: &BatchPlan) {
    for (idx, batch) in plan.batches.iter().enumerate() {
        println!("Batch {} ({} tokens):", idx + 1, batch.tokens);
        for label in batch.sections.labels() {
            println!("- {}", label);
        }
    }
    println!("{} sections in {} batches", plan.section_count(), plan.batches.len());
    render_skipped_text(&plan.skipped);
}

pub fn render_summary_text(summary: &RunSummary) {
    println!("document:         {}", summary.doc_id);
    println!("sections:         {}", summary.sections);
    println!("batches:          {}", summary.batches);
    println!("records stored:   {}", summary.records_stored);
    println!("not land related: {}", summary.discarded);
    println!("unusable batches: {}", summary.unusable_batches);
    render_skipped_text(&summary.skipped);
}

pub fn render_export_text(path: &std::path::Path, summary: &ExportSummary) {
    println!("wrote {} rows ({} filled with none): {}", summary.rows + summary.filled, summary.filled, path.display());
}

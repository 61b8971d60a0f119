//! The read and extract runs, independent of the command line.

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::{batch_sections, BatchLimits, BatchPlan, SkippedSection};
use crate::db::{DocumentStore, FullText, NewSectionText};
use crate::extract::{parse_response, render_batch, source_section, SYSTEM_PROMPT};
use crate::llm::{ChatMessage, LlmRequest, ModelProviderAdapter};
use crate::ocr::ReadClient;
use crate::segment::{split_notices, Sections};
use crate::tokenizer::TokenCounter;
use crate::transcript::Transcript;

/// Store an OCR body that has already been fetched. The body must parse as a
/// transcript, so a broken file never reaches the database.
pub fn import_document(store: &impl DocumentStore, raw: &str, name: &str) -> Result<Uuid> {
    let transcript = Transcript::from_json(raw)?;
    let id = store.insert_full_text(Uuid::new_v4(), raw, name)?;
    info!(doc_id = %id, pages = transcript.pages.len(), lines = transcript.line_count(), "stored OCR result");
    Ok(id)
}

/// OCR a PDF and store the result. Nothing is stored when the analysis fails.
pub async fn read_document(store: &impl DocumentStore, client: &ReadClient, pdf: Vec<u8>, name: &str) -> Result<Uuid> {
    let outcome = client.read_document(pdf).await?;
    let id = store.insert_full_text(Uuid::new_v4(), &outcome.raw, name)?;
    info!(
        doc_id = %id,
        pages = outcome.transcript.pages.len(),
        lines = outcome.transcript.line_count(),
        "stored OCR result"
    );
    Ok(id)
}

pub fn load_document(store: &impl DocumentStore, doc_id: Uuid) -> Result<FullText> {
    match store.get_full_text_by_id(doc_id)? {
        Some(ft) => Ok(ft),
        None => bail!("document not found: {}", doc_id),
    }
}

/// Segment a stored document and plan its batches, without calling a model.
pub fn plan_document(full_text: &FullText, counter: &impl TokenCounter, limits: BatchLimits) -> Result<(Sections, BatchPlan)> {
    let transcript = Transcript::from_json(&full_text.content)?;
    let sections = split_notices(&transcript);
    let plan = batch_sections(sections.clone(), counter, limits);
    debug!(
        sections = sections.len(),
        batches = plan.batches.len(),
        skipped = plan.skipped.len(),
        "planned batches"
    );
    Ok((sections, plan))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub doc_id: String,
    pub sections: usize,
    pub batches: usize,
    pub skipped: Vec<SkippedSection>,
    pub records_stored: usize,
    pub discarded: usize,
    pub unusable_batches: usize,
}

pub struct ExtractOptions<'a> {
    pub model: &'a str,
    pub limits: BatchLimits,
}

/// Segment, batch and extract one stored document. Batches are sent one
/// after another; a transport failure aborts the run, an unreadable answer
/// only loses its own batch.
pub async fn extract_document(
    store: &impl DocumentStore,
    adapter: &dyn ModelProviderAdapter,
    counter: &impl TokenCounter,
    doc_id: Uuid,
    opts: ExtractOptions<'_>,
) -> Result<RunSummary> {
    let full_text = load_document(store, doc_id)?;
    let (sections, plan) = plan_document(&full_text, counter, opts.limits)?;
    let mut summary = RunSummary {
        doc_id: doc_id.to_string(),
        sections: sections.len(),
        batches: plan.batches.len(),
        skipped: plan.skipped.clone(),
        ..Default::default()
    };

    for (idx, batch) in plan.batches.iter().enumerate() {
        let user = render_batch(&batch.sections)?;
        debug!(
            batch = idx,
            notices = batch.len(),
            prompt_tokens = counter.count_tokens(SYSTEM_PROMPT) + counter.count_tokens(&user),
            "sending batch"
        );
        let req = LlmRequest {
            model: opts.model.to_string(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)],
            temperature: 0.0,
            max_tokens: None,
        };
        let res = adapter.send(req).await?;
        let parsed = parse_response(&res.content);
        if !parsed.usable {
            warn!(batch = idx, "model answer is not a JSON array; no records stored for this batch");
            summary.unusable_batches += 1;
            continue;
        }
        summary.discarded += parsed.discarded;
        for record in &parsed.records {
            let holder_names = record.holder_names();
            let registration_numbers = record.registration_numbers();
            let content = source_section(&batch.sections, record).map(|s| s.content.as_str()).unwrap_or("");
            store.insert_section_text(&NewSectionText {
                full_text_id: doc_id,
                content,
                filename: &full_text.name,
                page_no: record.page_no,
                notice_no: record.notice_no.as_deref(),
                holder_names: &holder_names,
                registration_numbers: &registration_numbers,
                location: record.location.as_deref(),
            })?;
            summary.records_stored += 1;
        }
    }

    info!(
        doc_id = %doc_id,
        records = summary.records_stored,
        skipped = summary.skipped.len(),
        "extraction finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::llm::{LlmResponse, MockAdapter};
    use crate::tokenizer::WordTokenizer;

    const FIXTURE: &str = r#"{
        "status": "succeeded",
        "analyzeResult": {"readResults": [
            {"page": 1, "lines": [
                {"text": "THE KENYA GAZETTE"},
                {"text": "14"},
                {"text": "GAZETTE NOTICE NO. 43: THE REGISTERED LAND ACT WHEREAS Syprose Helida Odero"},
                {"text": "is registered proprietor of that piece of land"},
                {"text": "Registrar, Kisumu. GAZETTE NOTICE NO. 44: IN THE HIGH COURT OF KENYA"},
                {"text": "PROBATE AND ADMINISTRATION"}
            ]},
            {"page": 2, "lines": [
                {"text": "15"},
                {"text": "GAZETTE NOTICE NO. 45: THE LAND REGISTRATION ACT Price: KSh 50"}
            ]}
        ]}
    }"#;

    struct FixedAnswer(&'static str);

    #[async_trait::async_trait]
    impl ModelProviderAdapter for FixedAnswer {
        async fn send(&self, _req: LlmRequest) -> Result<LlmResponse> {
            Ok(LlmResponse { content: self.0.to_string(), usage: None })
        }
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl ModelProviderAdapter for Unreachable {
        async fn send(&self, _req: LlmRequest) -> Result<LlmResponse> {
            bail!("network error: connection refused")
        }
    }

    fn opts() -> ExtractOptions<'static> {
        ExtractOptions { model: "test-model", limits: BatchLimits::default() }
    }

    #[test]
    fn import_rejects_unparsable_body() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(import_document(&store, "{\"status\": \"running\"}", "doc").is_err());
        let id = import_document(&store, FIXTURE, "2008_VOL110").unwrap();
        assert_eq!(load_document(&store, id).unwrap().name, "2008_VOL110");
    }

    #[test]
    fn plan_splits_fixture_into_three_notices() {
        let store = SqliteStore::in_memory().unwrap();
        let id = import_document(&store, FIXTURE, "doc").unwrap();
        let ft = load_document(&store, id).unwrap();
        let (sections, plan) = plan_document(&ft, &WordTokenizer, BatchLimits::default()).unwrap();
        let labels: Vec<_> = sections.labels().collect();
        assert_eq!(labels, ["GAZETTE NOTICE NO. 43", "GAZETTE NOTICE NO. 44", "GAZETTE NOTICE NO. 45"]);
        assert!(sections.get("GAZETTE NOTICE NO. 43").unwrap().content.ends_with("Registrar, Kisumu. "));
        assert_eq!(sections.get("GAZETTE NOTICE NO. 45").unwrap().content, "THE LAND REGISTRATION ACT");
        assert_eq!(sections.get("GAZETTE NOTICE NO. 45").unwrap().page_number, "15");
        assert_eq!(plan.batches.len(), 1);
    }

    #[tokio::test]
    async fn mock_extraction_stores_land_notices_only() {
        let store = SqliteStore::in_memory().unwrap();
        let id = import_document(&store, FIXTURE, "2008_VOL110").unwrap();
        let summary = extract_document(&store, &MockAdapter, &WordTokenizer, id, opts()).await.unwrap();
        assert_eq!(summary.sections, 3);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.records_stored, 2);
        assert_eq!(summary.discarded, 1);

        let rows = store.get_sections_by_doc_id(id).unwrap();
        let notices: Vec<_> = rows.iter().map(|r| r.gazette_notice_number.clone().unwrap_or_default()).collect();
        assert_eq!(notices, ["43", "45"]);
        assert_eq!(rows[0].filename, "2008_VOL110");
        assert_eq!(rows[0].page_number, Some(14));
        assert_eq!(rows[1].page_number, Some(15));
        assert!(rows[0].section_content.starts_with("THE REGISTERED LAND ACT"));
    }

    #[tokio::test]
    async fn unusable_answer_loses_only_that_batch() {
        let store = SqliteStore::in_memory().unwrap();
        let id = import_document(&store, FIXTURE, "doc").unwrap();
        let summary = extract_document(&store, &FixedAnswer("Sorry, I cannot help."), &WordTokenizer, id, opts())
            .await
            .unwrap();
        assert_eq!(summary.unusable_batches, 1);
        assert_eq!(summary.records_stored, 0);
        assert!(store.get_sections_by_doc_id(id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_aborts_the_run() {
        let store = SqliteStore::in_memory().unwrap();
        let id = import_document(&store, FIXTURE, "doc").unwrap();
        let err = extract_document(&store, &Unreachable, &WordTokenizer, id, opts()).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn oversized_notice_is_reported_not_sent() {
        let store = SqliteStore::in_memory().unwrap();
        let id = import_document(&store, FIXTURE, "doc").unwrap();
        let limits = BatchLimits { max_tokens: 2500, max_section_tokens: 20 };
        let summary = extract_document(
            &store,
            &MockAdapter,
            &WordTokenizer,
            id,
            ExtractOptions { model: "m", limits },
        )
        .await
        .unwrap();
        assert!(summary.skipped.iter().any(|s| s.label == "GAZETTE NOTICE NO. 43"));
        let rows = store.get_sections_by_doc_id(id).unwrap();
        assert!(rows.iter().all(|r| r.gazette_notice_number.as_deref() != Some("43")));
    }

    fn read_client(endpoint: &str) -> ReadClient {
        let policy = crate::ocr::PollPolicy {
            interval: std::time::Duration::from_millis(5),
            timeout: std::time::Duration::from_millis(500),
        };
        ReadClient::new(endpoint, "test-key", policy, std::time::Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn read_stores_result_under_document_name() {
        let stub = crate::ocr::test_support::spawn(&["running", "succeeded"]).await;
        let store = SqliteStore::in_memory().unwrap();
        let id = read_document(&store, &read_client(&stub.endpoint), b"%PDF".to_vec(), "2008_VOL110")
            .await
            .unwrap();
        let ft = load_document(&store, id).unwrap();
        assert_eq!(ft.name, "2008_VOL110");
        assert_eq!(ft.content, crate::ocr::test_support::SUCCEEDED_BODY);
        assert_eq!(store.full_text_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_or_stalled_read_stores_nothing() {
        let store = SqliteStore::in_memory().unwrap();
        for statuses in [&["failed"][..], &["running"][..]] {
            let stub = crate::ocr::test_support::spawn(statuses).await;
            let res = read_document(&store, &read_client(&stub.endpoint), b"%PDF".to_vec(), "doc").await;
            assert!(res.unwrap_err().downcast_ref::<crate::ocr::OcrError>().is_some());
        }
        assert_eq!(store.full_text_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        let err = extract_document(&store, &MockAdapter, &WordTokenizer, Uuid::new_v4(), opts()).await.unwrap_err();
        assert!(err.to_string().contains("document not found"));
    }
}

//! Schema-constrained extraction with a bounded repair step.
//!
//! ```text
//! Generate ─► Validate ─► Accept
//!                │
//!                └─(invalid)─► Repair ─► Validate ─► Accept
//!                                            │
//!                                            └─(invalid)─► Fail
//! ```
//!
//! [`StructuredExtractor::extract`] drives that machine. At most
//! [`MAX_REPAIRS`] repair calls are made per extraction; a reply that is
//! still invalid afterwards becomes [`PortalError::StructuredOutput`] carrying
//! the last raw reply. No partial or best-guess record is ever returned.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PortalError, Result};
use crate::generation::{CompletionOptions, Generator};
use crate::prompts;

pub const MAX_REPAIRS: u32 = 1;

/// A record the generative backend is asked to produce as JSON.
pub trait StructuredRecord: DeserializeOwned + Serialize + Send + Sized {
    /// Schema shown to the backend in the generate and repair prompts.
    fn schema_description() -> &'static str;

    /// Convert a parsed JSON reply into the record.
    fn from_json(value: serde_json::Value) -> std::result::Result<Self, String> {
        serde_json::from_value(value).map_err(|e| e.to_string())
    }

    /// Checks beyond what deserialisation enforces.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

enum State<T> {
    Generate,
    Validate { raw: String },
    Repair { raw: String, error: String },
    Accept(T),
    Fail { raw: String, error: String },
}

pub struct StructuredExtractor {
    generator: Arc<dyn Generator>,
    options: CompletionOptions,
}

impl StructuredExtractor {
    pub fn new(generator: Arc<dyn Generator>, options: CompletionOptions) -> Self {
        Self { generator, options }
    }

    /// Run `prompt` and return a validated `T`.
    pub async fn extract<T: StructuredRecord>(&self, prompt: &str) -> Result<T> {
        let mut repairs_left = MAX_REPAIRS;
        let mut state = State::Generate;

        loop {
            state = match state {
                State::Generate => {
                    let raw = self.generator.complete(prompt, &self.options).await?;
                    State::Validate { raw }
                }
                State::Validate { raw } => match validate_reply::<T>(&raw) {
                    Ok(record) => State::Accept(record),
                    Err(error) if repairs_left > 0 => State::Repair { raw, error },
                    Err(error) => State::Fail { raw, error },
                },
                State::Repair { raw, error } => {
                    repairs_left -= 1;
                    tracing::warn!(error = %error, "structured output invalid, requesting repair");
                    let repair_prompt = prompts::fix_format(T::schema_description(), &raw, &error);
                    let raw = self.generator.complete(&repair_prompt, &self.options).await?;
                    State::Validate { raw }
                }
                State::Accept(record) => {
                    tracing::debug!(repaired = repairs_left < MAX_REPAIRS, "structured output accepted");
                    return Ok(record);
                }
                State::Fail { raw, error } => {
                    tracing::error!(error = %error, "structured output invalid after repair");
                    return Err(PortalError::StructuredOutput {
                        message: error,
                        raw,
                    });
                }
            };
        }
    }
}

fn validate_reply<T: StructuredRecord>(raw: &str) -> std::result::Result<T, String> {
    let value = parse_json_reply(raw)?;
    let record = T::from_json(value)?;
    record.validate()?;
    Ok(record)
}

/// Parse the JSON in a model reply, tolerating Markdown code fences and
/// surrounding prose.
pub fn parse_json_reply(raw: &str) -> std::result::Result<serde_json::Value, String> {
    let text = strip_code_fence(raw.trim());
    if text.is_empty() {
        return Err("reply is empty".to_string());
    }
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }

    let start = text.find(['{', '[']);
    let end = text.rfind(['}', ']']);
    match (start, end) {
        (Some(start), Some(end)) if end > start => serde_json::from_str(&text[start..=end])
            .map_err(|e| format!("reply is not valid JSON: {}", e)),
        _ => Err("reply contains no JSON object or array".to_string()),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    // Skip an info string such as `json`.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

// ============ Records ============

/// Document summary and metadata produced by `analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(rename = "Summary", default)]
    pub summary: Vec<String>,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Author")]
    pub author: String,
    #[serde(rename = "DateCreated")]
    pub date_created: String,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "Publisher")]
    pub publisher: String,
    #[serde(rename = "Language")]
    pub language: String,
    #[serde(rename = "PageCount")]
    pub page_count: PageCount,
    #[serde(rename = "SentimentTone", alias = "SetimentTone")]
    pub sentiment_tone: String,
}

/// Page count as reported by the model: a number, or text such as
/// `"Not Available"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageCount {
    Number(u64),
    Text(String),
}

impl StructuredRecord for DocumentMetadata {
    fn schema_description() -> &'static str {
        r#"A JSON object with exactly these fields:
{
  "Summary": ["string", "..."],      // list of summary points
  "Title": "string",
  "Author": "string",
  "DateCreated": "string",
  "LastModified": "string",
  "Publisher": "string",
  "Language": "string",
  "PageCount": 0,                    // integer, or a string if unknown
  "SentimentTone": "string"
}
Use "Not Available" for any value the document does not state."#
    }
}

/// One page-level difference between the REFERENCE and ACTUAL documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub page: String,
    pub changes: String,
}

/// Ordered change records produced by `compare`. Empty means no differences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ComparisonReport(pub Vec<ChangeRecord>);

impl ComparisonReport {
    pub fn records(&self) -> &[ChangeRecord] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl StructuredRecord for ComparisonReport {
    fn schema_description() -> &'static str {
        r#"A JSON array, one element per page, in page order:
[
  { "page": "1", "changes": "description of what changed from REFERENCE to ACTUAL, or NO CHANGE" }
]"#
    }

    fn from_json(value: serde_json::Value) -> std::result::Result<Self, String> {
        let value = match value {
            serde_json::Value::Object(mut map) if map.contains_key("differences") => {
                map.remove("differences").unwrap_or_default()
            }
            other => other,
        };
        serde_json::from_value(value).map_err(|e| e.to_string())
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self.0.iter().position(|r| r.page.trim().is_empty()) {
            Some(i) => Err(format!("change record {} has an empty page", i)),
            None => Ok(()),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Page {
        Number(serde_json::Number),
        Text(String),
    }
    Ok(match Page::deserialize(deserializer)? {
        Page::Number(n) => n.to_string(),
        Page::Text(s) => s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies with the scripted responses in order, recording every prompt.
    struct Scripted {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| PortalError::Backend("script exhausted".to_string()))
        }
    }

    const VALID_METADATA: &str = r#"{
        "Summary": ["Contract renewal", "Fee increase"],
        "Title": "Service Agreement",
        "Author": "Acme",
        "DateCreated": "2024-01-02",
        "LastModified": "2024-02-03",
        "Publisher": "Acme",
        "Language": "English",
        "PageCount": 3,
        "SentimentTone": "Neutral"
    }"#;

    #[tokio::test]
    async fn test_valid_first_reply_needs_no_repair() {
        let generator = Scripted::new(&[VALID_METADATA]);
        let extractor = StructuredExtractor::new(generator.clone(), CompletionOptions::default());
        let meta: DocumentMetadata = extractor.extract("analyze").await.unwrap();
        assert_eq!(meta.title, "Service Agreement");
        assert_eq!(meta.page_count, PageCount::Number(3));
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_repair_runs_exactly_once() {
        let generator = Scripted::new(&["Sure! Here is the summary: {not json", VALID_METADATA]);
        let extractor = StructuredExtractor::new(generator.clone(), CompletionOptions::default());
        let meta: DocumentMetadata = extractor.extract("analyze").await.unwrap();
        assert_eq!(meta.summary.len(), 2);
        assert_eq!(generator.calls(), 2);

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts[0], "analyze");
        assert!(prompts[1].contains("{not json"));
        assert!(prompts[1].contains("SentimentTone"));
    }

    #[tokio::test]
    async fn test_fails_after_one_repair_with_raw_output() {
        let generator = Scripted::new(&["garbage", "still garbage", VALID_METADATA]);
        let extractor = StructuredExtractor::new(generator.clone(), CompletionOptions::default());
        let err = extractor
            .extract::<DocumentMetadata>("analyze")
            .await
            .unwrap_err();
        match err {
            PortalError::StructuredOutput { raw, .. } => assert_eq!(raw, "still garbage"),
            other => panic!("expected StructuredOutput, got {:?}", other),
        }
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_field_triggers_repair() {
        let partial = r#"{"Summary": [], "Title": "Only a title"}"#;
        let generator = Scripted::new(&[partial, VALID_METADATA]);
        let extractor = StructuredExtractor::new(generator.clone(), CompletionOptions::default());
        let meta: DocumentMetadata = extractor.extract("analyze").await.unwrap();
        assert_eq!(meta.author, "Acme");
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[1].contains("missing field"));
    }

    #[tokio::test]
    async fn test_backend_error_is_not_structured_error() {
        let generator = Scripted::new(&[]);
        let extractor = StructuredExtractor::new(generator, CompletionOptions::default());
        let err = extractor
            .extract::<ComparisonReport>("compare")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Backend);
    }

    #[test]
    fn test_parse_fenced_and_wrapped_json() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(parse_json_reply(fenced).unwrap()["a"], 1);
        let wrapped = "Here you go: [1, 2] hope that helps";
        assert_eq!(parse_json_reply(wrapped).unwrap(), serde_json::json!([1, 2]));
        assert!(parse_json_reply("   ").is_err());
        assert!(parse_json_reply("no json here").is_err());
    }

    #[test]
    fn test_metadata_accepts_misspelled_tone_and_text_page_count() {
        let value = serde_json::json!({
            "Title": "t", "Author": "a", "DateCreated": "d", "LastModified": "m",
            "Publisher": "p", "Language": "l", "PageCount": "Not Available",
            "SetimentTone": "Positive"
        });
        let meta = DocumentMetadata::from_json(value).unwrap();
        assert!(meta.summary.is_empty());
        assert_eq!(meta.sentiment_tone, "Positive");
        assert_eq!(meta.page_count, PageCount::Text("Not Available".to_string()));
    }

    #[test]
    fn test_comparison_shapes() {
        let bare = serde_json::json!([{ "page": 2, "changes": "Fee 10 → 12" }]);
        let report = ComparisonReport::from_json(bare).unwrap();
        assert_eq!(report.records()[0].page, "2");

        let wrapped = serde_json::json!({ "differences": [{ "page": "1", "changes": "NO CHANGE" }] });
        assert_eq!(ComparisonReport::from_json(wrapped).unwrap().records().len(), 1);

        let empty = ComparisonReport::from_json(serde_json::json!([])).unwrap();
        assert!(empty.is_empty());
        assert!(empty.validate().is_ok());

        let bad = ComparisonReport(vec![ChangeRecord {
            page: " ".to_string(),
            changes: "x".to_string(),
        }]);
        assert!(bad.validate().is_err());

        assert!(ComparisonReport::from_json(serde_json::json!({ "page": 1 })).is_err());
    }
}

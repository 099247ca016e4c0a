//! Prompt templates for the generative backend.

use crate::models::Turn;

/// Render prior turns as a plain transcript, oldest first.
pub fn render_history(history: &[Turn]) -> String {
    let mut out = String::new();
    for turn in history {
        out.push_str("User: ");
        out.push_str(turn.question.trim());
        out.push_str("\nAssistant: ");
        out.push_str(turn.answer.trim());
        out.push('\n');
    }
    out
}

/// Ask the backend to turn a follow-up into a standalone question.
pub fn contextualize_question(history: &[Turn], question: &str) -> String {
    format!(
        "Given a conversation history and the most recent user question, rewrite the \
question so it can be understood without the history. Resolve pronouns and \
ellipsis (\"it\", \"that page\", \"the other one\") using the history.\n\
Do NOT answer the question. Return ONLY the rewritten question, with no \
explanation, quotes, or prefix. If it is already standalone, return it unchanged.\n\n\
Conversation history:\n{}\n\
Most recent question: {}\n\n\
Standalone question:",
        render_history(history),
        question.trim()
    )
}

/// Context-grounded question answering.
pub fn context_qa(context: &str, history: &[Turn], question: &str) -> String {
    let history = if history.is_empty() {
        "(none)\n".to_string()
    } else {
        render_history(history)
    };
    format!(
        "You are an assistant for question-answering tasks. Use ONLY the retrieved \
context below to answer the question. If the answer is not in the context, \
reply exactly \"I don't know.\" Keep the answer concise, at most five sentences, \
and mention the source and page when the context provides them.\n\n\
Context:\n{}\n\n\
Conversation so far:\n{}\n\
Question: {}\n\n\
Answer:",
        context,
        history,
        question.trim()
    )
}

/// Reply the QA prompt asks for when the context has no answer.
pub const UNKNOWN_REPLY: &str = "I don't know.";

pub fn document_analysis(document_text: &str, schema: &str) -> String {
    format!(
        "You are an assistant specialized in document analysis and summarization.\n\n\
Instructions:\n\
- Analyze the provided document content.\n\
- Generate a concise summary and extract key metadata.\n\
- Return ONLY valid JSON matching the schema.\n\
- Do not include any additional text.\n\n\
Schema:\n{}\n\n\
Document Content:\n{}\n",
        schema, document_text
    )
}

pub fn document_comparison(combined_docs: &str, schema: &str) -> String {
    format!(
        "You will be provided with content from two documents. Your tasks are as follows:\n\n\
1. Compare the content of both documents and identify any differences.\n\
2. For each difference, note the page number where it occurs and describe the change \
from the REFERENCE document to the ACTUAL document.\n\
3. If a page has no differences, say \"NO CHANGE\" for that page.\n\
4. Return ONLY valid JSON matching the schema below, with no additional text.\n\n\
Schema:\n{}\n\n\
Documents:\n{}\n",
        schema, combined_docs
    )
}

/// Repair prompt: show the malformed reply and ask for schema-valid JSON only.
pub fn fix_format(schema: &str, malformed: &str, error: &str) -> String {
    format!(
        "The following output was supposed to be JSON matching the schema below, but it \
failed validation.\n\n\
Schema:\n{}\n\n\
Validation error:\n{}\n\n\
Output:\n{}\n\n\
Fix the formatting so the output satisfies the schema. Keep the original content. \
Return ONLY the corrected JSON, with no explanation and no Markdown fences.",
        schema, error, malformed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_rendered_in_order() {
        let history = vec![
            Turn::new("what changed?", "what changed?", "The fee rose."),
            Turn::new("on which page?", "on which page did the fee change?", "Page 2."),
        ];
        let rendered = render_history(&history);
        let first = rendered.find("what changed?").unwrap();
        let second = rendered.find("on which page?").unwrap();
        assert!(first < second);
        assert!(rendered.contains("Assistant: Page 2."));
    }

    #[test]
    fn test_contextualize_includes_history_and_question() {
        let history = vec![Turn::new("what changed?", "what changed?", "The fee rose.")];
        let prompt = contextualize_question(&history, "  on which page?  ");
        assert!(prompt.contains("The fee rose."));
        assert!(prompt.contains("Most recent question: on which page?\n"));
        assert!(prompt.contains("Return ONLY the rewritten question"));
    }
}

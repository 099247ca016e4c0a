//! Context-grounded answer synthesis.

use std::sync::Arc;

use crate::error::Result;
use crate::generation::{CompletionOptions, Generator};
use crate::models::{Answer, Turn, NO_ANSWER};
use crate::prompts;

pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
    options: CompletionOptions,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn Generator>, options: CompletionOptions) -> Self {
        Self { generator, options }
    }

    /// Answer `question` from `context` only.
    ///
    /// Blank context, an empty reply, or the prompt's "don't know" reply
    /// yield [`Answer::NoAnswer`]; backend failures are errors.
    pub async fn answer(&self, question: &str, context: &str, history: &[Turn]) -> Result<Answer> {
        if context.trim().is_empty() {
            return Ok(Answer::NoAnswer);
        }

        let prompt = prompts::context_qa(context, history, question);
        let reply = self.generator.complete(&prompt, &self.options).await?;
        let answer = classify(&reply);
        if !answer.is_answered() {
            tracing::info!("no answer found in retrieved context");
        }
        Ok(answer)
    }
}

fn classify(reply: &str) -> Answer {
    let text = reply.trim();
    let normalized = text
        .trim_end_matches(['.', '!'])
        .replace('’', "'")
        .to_lowercase();
    let unknown = prompts::UNKNOWN_REPLY.trim_end_matches('.').to_lowercase();

    if text.is_empty() || normalized == unknown || normalized == NO_ANSWER.to_lowercase() {
        Answer::NoAnswer
    } else {
        Answer::Text(text.to_string())
    }
}

// Generation agent
// Produces the answer draft from accumulated context in direct, synthesis,
// or clarification mode. The only agent whose provider failure is fatal to
// the current iteration: there is no safe default for a missing answer.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::errors::RagError;
use crate::llm::{with_retry, ChatMessage, CompletionProvider, CompletionRequest};
use crate::rag::context::{ExecutionContext, RegenerateHint};
use crate::rag::types::{Document, Draft, GenerationMode, PlanAction, PlanStep};

use super::{Agent, StepOutcome};

const DIRECT_SYSTEM_PROMPT: &str = "You are a helpful customer support assistant.\n\n\
Guidelines:\n\
- Answer based only on the provided context\n\
- Be accurate and specific\n\
- Cite sources using [Source N] notation\n\
- Be concise but complete\n\
- If the context is insufficient, acknowledge the limitation\n\
- Maintain a professional, friendly tone";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a customer support assistant.\n\
Your task is to synthesize information from multiple sources into a coherent answer.\n\n\
Guidelines:\n\
- Combine and compare information logically, noting similarities and differences\n\
- Resolve any contradictions\n\
- State which source contributed which part of the answer\n\
- Cite sources using [Source N] notation\n\
- Maintain accuracy to the source material";

const CLARIFICATION_SYSTEM_PROMPT: &str = "You are a customer support assistant.\n\
No relevant documentation was found for this question.\n\n\
Guidelines:\n\
- Give whatever partial, general help you safely can\n\
- State explicitly which information is missing and what you would need\n\
- Never invent policy details, figures, or sources\n\
- Do not use citation markers of any kind";

const CONVERSATIONAL_SYSTEM_PROMPT: &str = "You are a helpful customer support assistant.";

const STRICT_GROUNDING_NOTE: &str = "\n\nIMPORTANT: a previous draft contained claims not \
supported by the context. Use ONLY facts stated in the sources; if something is not in the \
context, say that it is not covered.";

const REPHRASE_NOTE: &str = "\n\nIMPORTANT: a previous draft did not actually help the user. \
Answer the question as asked, directly and plainly, before adding detail.";

pub struct Generator {
    completion: Arc<dyn CompletionProvider>,
    config: EngineConfig,
}

impl Generator {
    pub fn new(completion: Arc<dyn CompletionProvider>, config: EngineConfig) -> Self {
        Self { completion, config }
    }

    /// Format documents as a numbered context block, folding in the
    /// grader's key points.
    fn build_context(documents: &[Document]) -> String {
        let mut parts = Vec::new();
        for (i, doc) in documents.iter().enumerate() {
            parts.push(format!("[Source {}]", i + 1));
            parts.push(doc.content.clone());
            if !doc.key_points.is_empty() {
                parts.push(format!("Key points: {}", doc.key_points.join(", ")));
            }
            parts.push(String::new());
        }
        parts.join("\n")
    }

    fn system_prompt(mode: GenerationMode, has_context: bool, hint: Option<RegenerateHint>) -> String {
        let base = match mode {
            GenerationMode::Synthesis => SYNTHESIS_SYSTEM_PROMPT,
            GenerationMode::Clarification => CLARIFICATION_SYSTEM_PROMPT,
            GenerationMode::Direct if has_context => DIRECT_SYSTEM_PROMPT,
            GenerationMode::Direct => CONVERSATIONAL_SYSTEM_PROMPT,
        };
        match hint {
            Some(RegenerateHint::StricterGrounding) => format!("{base}{STRICT_GROUNDING_NOTE}"),
            Some(RegenerateHint::Rephrase) => format!("{base}{REPHRASE_NOTE}"),
            None => base.to_string(),
        }
    }

    /// Generate an answer draft. Provider failure after retries is fatal to
    /// the iteration and escalates to loop-level fallback.
    pub async fn generate(
        &self,
        ctx: &mut ExecutionContext,
        mode: GenerationMode,
    ) -> Result<Draft, RagError> {
        let started = Instant::now();
        // Zero usable documents always means clarification, not invention,
        // unless the query never needed retrieval in the first place.
        let mode = if ctx.documents.is_empty() && mode == GenerationMode::Synthesis {
            GenerationMode::Clarification
        } else {
            mode
        };

        let has_context = !ctx.documents.is_empty();
        let hint = ctx.regenerate_hint.take();
        let system = Self::system_prompt(mode, has_context, hint);

        let user = if has_context && mode != GenerationMode::Clarification {
            format!(
                "Context:\n{}\nQuestion: {}\n\nPlease provide a helpful answer based on the context above.",
                Self::build_context(&ctx.documents),
                ctx.query
            )
        } else {
            ctx.query.clone()
        };

        let mut messages = ctx.history.clone();
        messages.push(ChatMessage::system(system));
        messages.push(ChatMessage::user(user));
        let request = CompletionRequest::new(messages).with_max_tokens(1_000);

        let mut answer = with_retry(&self.config.retry, || {
            self.completion.complete(request.clone())
        })
        .await
        .map_err(RagError::Generation)?;

        if mode == GenerationMode::Clarification {
            // clarification answers never carry citations
            answer = strip_citations(&answer);
        }

        let cited_sources = cited_indices(&answer, ctx.documents.len());
        let confidence = if cited_sources.is_empty() {
            0.0
        } else {
            cited_sources
                .iter()
                .map(|&i| ctx.documents[i - 1].relevance_score)
                .sum::<f32>()
                / cited_sources.len() as f32
        };

        let draft = Draft {
            answer,
            cited_sources,
            confidence,
            mode,
        };

        ctx.record(
            "generator",
            &format!("generate_{}", mode.as_str()),
            format!("{} sources", ctx.documents.len()),
            format!(
                "{} chars, {} citations",
                draft.answer.len(),
                draft.cited_sources.len()
            ),
            started,
        );
        ctx.draft = Some(draft.clone());
        Ok(draft)
    }

    /// Map a plan action to the generation mode it implies.
    pub fn mode_for(step: &PlanStep, documents: &[Document]) -> GenerationMode {
        if documents.is_empty() {
            return GenerationMode::Clarification;
        }
        match step.action {
            PlanAction::Compare | PlanAction::Synthesize => GenerationMode::Synthesis,
            _ => GenerationMode::Direct,
        }
    }
}

/// True when the text contains any `[Source N]` citation marker.
pub(crate) fn has_citations(text: &str) -> bool {
    !cited_indices(text, usize::MAX).is_empty()
}

/// Extract 1-based `[Source N]` indices, keeping only those that point at
/// an actual document.
fn cited_indices(text: &str, source_count: usize) -> Vec<usize> {
    let mut indices = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find("[Source ") {
        rest = &rest[pos + "[Source ".len()..];
        if let Some(close) = rest.find(']') {
            if let Ok(n) = rest[..close].trim().parse::<usize>() {
                if n >= 1 && n <= source_count && !indices.contains(&n) {
                    indices.push(n);
                }
            }
        }
    }
    indices.sort_unstable();
    indices
}

/// Remove `[Source N]` markers, collapsing any doubled spaces left behind.
fn strip_citations(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("[Source ") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos..];
        match after.find(']') {
            Some(close) => rest = &after[close + 1..],
            None => {
                rest = after;
                break;
            }
        }
    }
    out.push_str(rest);
    out.replace("  ", " ").trim().to_string()
}

#[async_trait]
impl Agent for Generator {
    fn id(&self) -> &'static str {
        "generator"
    }

    fn name(&self) -> &'static str {
        "Answer Generator"
    }

    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        step: &PlanStep,
    ) -> Result<StepOutcome, RagError> {
        let mode = Self::mode_for(step, &ctx.documents);
        self.generate(ctx, mode).await?;
        Ok(StepOutcome::Generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fast_config, FailingCompletion, RuleCompletion};

    fn doc(id: &str, content: &str, score: f32) -> Document {
        Document {
            id: id.to_string(),
            content: content.to_string(),
            source: "kb".to_string(),
            category: None,
            relevance_score: score,
            key_points: vec![],
        }
    }

    #[tokio::test]
    async fn direct_generation_with_citations() {
        let completion = Arc::new(RuleCompletion::with_default(
            "You can return items within 30 days [Source 1].",
        ));
        let generator = Generator::new(completion, fast_config());
        let mut ctx = ExecutionContext::new("What is your return policy?", vec![]);
        ctx.set_documents(vec![doc("POL001", "Returns within 30 days", 0.9)]);

        let draft = generator
            .generate(&mut ctx, GenerationMode::Direct)
            .await
            .unwrap();

        assert_eq!(draft.cited_sources, vec![1]);
        assert!((draft.confidence - 0.9).abs() < 1e-6);
        assert_eq!(draft.mode, GenerationMode::Direct);
    }

    #[tokio::test]
    async fn clarification_mode_strips_citations() {
        // even if the model fabricates a marker, the draft must not carry it
        let completion = Arc::new(RuleCompletion::with_default(
            "I don't have details on that [Source 1]. I would need the policy document.",
        ));
        let generator = Generator::new(completion, fast_config());
        let mut ctx = ExecutionContext::new("What is your return policy?", vec![]);

        let draft = generator
            .generate(&mut ctx, GenerationMode::Clarification)
            .await
            .unwrap();

        assert!(!has_citations(&draft.answer));
        assert!(draft.cited_sources.is_empty());
        assert_eq!(draft.confidence, 0.0);
    }

    #[tokio::test]
    async fn synthesis_with_no_documents_degrades_to_clarification() {
        let completion = Arc::new(RuleCompletion::with_default("I could not find either policy."));
        let generator = Generator::new(completion, fast_config());
        let mut ctx = ExecutionContext::new("Compare policies", vec![]);

        let draft = generator
            .generate(&mut ctx, GenerationMode::Synthesis)
            .await
            .unwrap();

        assert_eq!(draft.mode, GenerationMode::Clarification);
    }

    #[tokio::test]
    async fn provider_outage_is_fatal() {
        let completion = Arc::new(FailingCompletion::always_unavailable());
        let generator = Generator::new(completion, fast_config());
        let mut ctx = ExecutionContext::new("query", vec![]);

        let result = generator.generate(&mut ctx, GenerationMode::Direct).await;
        assert!(matches!(result, Err(RagError::Generation(_))));
    }

    #[test]
    fn cited_indices_parses_and_bounds() {
        let text = "See [Source 1] and [Source 2]. Also [Source 9] is bogus. [Source 1] repeats.";
        assert_eq!(cited_indices(text, 2), vec![1, 2]);
        assert_eq!(cited_indices("no markers", 5), Vec::<usize>::new());
    }

    #[test]
    fn strip_citations_removes_markers() {
        let text = "Returns take 30 days [Source 1], shipping 5 [Source 2].";
        let stripped = strip_citations(text);
        assert!(!has_citations(&stripped));
        assert!(stripped.contains("Returns take 30 days"));
    }
}

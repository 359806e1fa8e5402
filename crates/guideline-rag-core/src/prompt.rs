//! Prompt construction for strict, excerpt-only answers.
//!
//! The system prompt combines three fixed parts: the safety policy, a
//! language directive, and the strict retrieval policy with the mandated
//! two-section output format. The user prompt carries the labeled excerpts
//! and the question.

use crate::evidence::{ANSWER_HEADER, EVIDENCE_HEADER, STRICT_FALLBACK};
use crate::models::RetrievalPair;

pub const SAFETY_POLICY: &str = "You are a public health awareness assistant.\n\
- Explain symptoms, risk factors, prevention, and screening in simple language, \
based only on trusted public health guidelines.\n\
- You are NOT a doctor. Never give a diagnosis, prescriptions, treatment plans, or exact doses.\n\
- If the user asks for medicines, exact treatment, or a diagnosis, gently decline and \
suggest consulting a licensed health professional.\n\
- Keep an educational, calm, supportive, and non-judgmental tone.\n";

/// A rendered prompt pair ready for a [`Generator`](crate::generation::Generator).
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Reply-language instruction.
///
/// The model mirrors the question's language. `language` is the caller's
/// preferred code and is only used when the question's language is unclear.
pub fn language_directive(language: &str) -> String {
    let mut directive = String::from(
        "\nLANGUAGE:\n\
- Reply in the same language the user wrote the question in.\n\
- Do not mention or name the language you are replying in.\n\
- Use easy, everyday words a non-technical reader understands.\n",
    );
    let preferred = match language.trim().to_lowercase().as_str() {
        "hi" => Some("Hindi"),
        "mr" => Some("Marathi"),
        _ => None,
    };
    if let Some(name) = preferred {
        directive.push_str(&format!(
            "- If the question's language is unclear, reply in {}.\n",
            name
        ));
    }
    directive
}

fn retrieval_policy() -> String {
    format!(
        "\nSTRICT RULES:\n\
- Use ONLY the supplied guideline excerpts.\n\
- If the excerpts do not answer the question, reply EXACTLY, character for character: {fallback}\n\
- Do not guess, speculate, or infer beyond the excerpts.\n\
\n\
MANDATORY OUTPUT FORMAT:\n\
{answer}\n\
- 2 to 6 short bullets of simple guidance taken strictly from the excerpts.\n\
\n\
{evidence}\n\
- Quote 1 to 2 exact lines from the excerpts, verbatim, each as a blockquote starting with \"> \".\n",
        fallback = STRICT_FALLBACK,
        answer = ANSWER_HEADER,
        evidence = EVIDENCE_HEADER,
    )
}

pub fn build_system_prompt(language: &str) -> String {
    let mut system = String::from(SAFETY_POLICY);
    system.push_str(&language_directive(language));
    system.push_str(&retrieval_policy());
    system
}

/// Excerpts labeled `[Excerpt n | Source: name | Page: p]`, separated by blank lines.
pub fn format_excerpts(pairs: &[RetrievalPair]) -> String {
    pairs
        .iter()
        .enumerate()
        .map(|(i, pair)| {
            let page = pair
                .chunk
                .page
                .map(|p| p.to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            format!(
                "[Excerpt {} | Source: {} | Page: {}]\n{}",
                i + 1,
                pair.chunk.source_name(),
                page,
                pair.chunk.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Raw excerpt texts joined by blank lines, without labels.
///
/// This is what evidence is checked against, so a model cannot pass by
/// quoting an excerpt label.
pub fn excerpts_blob(pairs: &[RetrievalPair]) -> String {
    pairs
        .iter()
        .map(|p| p.chunk.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_user_prompt(question: &str, pairs: &[RetrievalPair]) -> String {
    format!(
        "### Guideline Excerpts\n{excerpts}\n\n\
### User Question\n{question}\n\n\
### Mandatory Output Format\n\
{answer}\n\
- Give simple guidance strictly from the excerpts.\n\n\
{evidence}\n\
- Quote the exact supporting line(s) as blockquotes (> ).\n\n\
If the answer is not present, say exactly:\n{fallback}",
        excerpts = format_excerpts(pairs),
        question = question.trim(),
        answer = ANSWER_HEADER,
        evidence = EVIDENCE_HEADER,
        fallback = STRICT_FALLBACK,
    )
}

pub fn build_prompt(question: &str, language: &str, pairs: &[RetrievalPair]) -> Prompt {
    Prompt {
        system: build_system_prompt(language),
        user: build_user_prompt(question, pairs),
    }
}

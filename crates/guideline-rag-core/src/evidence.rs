//! Post-hoc evidence verification.
//!
//! A generated answer is only accepted when its "Guideline Evidence"
//! section quotes at least one line that appears verbatim (after
//! normalization) in the retrieved excerpts, and uses no wording that
//! signals inference. Any failure makes the caller substitute
//! [`STRICT_FALLBACK`].
//!
//! # Validation order
//!
//! 1. Blank answer → `empty_answer`.
//! 2. Answer equal to the fallback → pass, `fallback_ok`.
//! 3. No evidence section or an empty one → `missing_evidence_section`.
//! 4. Fallback text buried in the evidence → `evidence_is_fallback`.
//! 5. Inference vocabulary in the evidence → `inference_detected`.
//! 6. No quoted line long enough and contained in the excerpts →
//!    `evidence_not_verbatim`; otherwise pass, `evidence_ok`.
//!
//! The containment test is a heuristic: it can accept a short coincidental
//! overlap and reject a quote that differs by an OCR artifact. The minimum
//! quote length is set per script family through [`MinQuoteLength`].

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The single refusal string returned when no grounded answer exists.
pub const STRICT_FALLBACK: &str = "The guideline does not provide information on this topic.";

pub const ANSWER_HEADER: &str = "Direct Answer:";
pub const EVIDENCE_HEADER: &str = "Guideline Evidence:";

/// Headers that end the evidence section when they start a line.
const STOP_HEADERS: &[&str] = &["Sources", "Source", "Direct Answer", "Notes", "Disclaimer"];

/// Phrases that mark a model reasoning past its excerpts (Hindi and English).
pub const DEFAULT_INFERENCE_PHRASES: &[&str] = &[
    "अनुमान",
    "अंदाजा",
    "यह अनुमान लगाया जा सकता है",
    "यह माना जा सकता है",
    "शायद",
    "likely",
    "probably",
    "can be inferred",
    "suggests that",
    "it seems",
    "we can assume",
    "no direct reference",
];

/// Why an answer passed or failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceReason {
    EmptyAnswer,
    FallbackOk,
    MissingEvidenceSection,
    MissingBlockquote,
    EvidenceIsFallback,
    InferenceDetected,
    EvidenceNotVerbatim,
    EvidenceOk,
}

impl EvidenceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceReason::EmptyAnswer => "empty_answer",
            EvidenceReason::FallbackOk => "fallback_ok",
            EvidenceReason::MissingEvidenceSection => "missing_evidence_section",
            EvidenceReason::MissingBlockquote => "missing_blockquote",
            EvidenceReason::EvidenceIsFallback => "evidence_is_fallback",
            EvidenceReason::InferenceDetected => "inference_detected",
            EvidenceReason::EvidenceNotVerbatim => "evidence_not_verbatim",
            EvidenceReason::EvidenceOk => "evidence_ok",
        }
    }
}

/// Outcome of [`EvidenceValidator::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvidenceCheck {
    pub ok: bool,
    pub reason: EvidenceReason,
}

impl EvidenceCheck {
    fn pass(reason: EvidenceReason) -> Self {
        Self { ok: true, reason }
    }

    fn fail(reason: EvidenceReason) -> Self {
        Self { ok: false, reason }
    }
}

/// Broad script classes with different "meaningful quote" lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFamily {
    /// Latin, Cyrillic, Greek, Devanagari and other letter-based scripts.
    Alphabetic,
    /// Han, Kana, and Hangul, where one character carries a word or syllable.
    Logographic,
    /// Arabic and Hebrew.
    RightToLeft,
}

impl ScriptFamily {
    fn of_char(c: char) -> Option<ScriptFamily> {
        let cp = c as u32;
        match cp {
            0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF
            | 0xF900..=0xFAFF => Some(ScriptFamily::Logographic),
            0x0590..=0x05FF | 0x0600..=0x06FF | 0x0750..=0x077F | 0xFB1D..=0xFDFF
            | 0xFE70..=0xFEFF => Some(ScriptFamily::RightToLeft),
            _ if c.is_alphabetic() => Some(ScriptFamily::Alphabetic),
            _ => None,
        }
    }

    /// Dominant family of a line; ties and letterless lines are alphabetic.
    pub fn detect(text: &str) -> ScriptFamily {
        let (mut alpha, mut logo, mut rtl) = (0usize, 0usize, 0usize);
        for c in text.chars() {
            match ScriptFamily::of_char(c) {
                Some(ScriptFamily::Alphabetic) => alpha += 1,
                Some(ScriptFamily::Logographic) => logo += 1,
                Some(ScriptFamily::RightToLeft) => rtl += 1,
                None => {}
            }
        }
        if logo > alpha && logo >= rtl {
            ScriptFamily::Logographic
        } else if rtl > alpha && rtl > logo {
            ScriptFamily::RightToLeft
        } else {
            ScriptFamily::Alphabetic
        }
    }
}

/// Minimum normalized length, in characters, of a quote that counts as evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinQuoteLength {
    pub alphabetic: usize,
    pub logographic: usize,
    pub right_to_left: usize,
}

impl Default for MinQuoteLength {
    fn default() -> Self {
        Self {
            alphabetic: 12,
            logographic: 6,
            right_to_left: 12,
        }
    }
}

impl MinQuoteLength {
    pub fn for_family(&self, family: ScriptFamily) -> usize {
        match family {
            ScriptFamily::Alphabetic => self.alphabetic,
            ScriptFamily::Logographic => self.logographic,
            ScriptFamily::RightToLeft => self.right_to_left,
        }
    }

    pub fn for_line(&self, line: &str) -> usize {
        self.for_family(ScriptFamily::detect(line))
    }
}

fn horizontal_ws() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").expect("valid regex"))
}

fn blank_lines() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
}

fn stop_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives = STOP_HEADERS
            .iter()
            .map(|h| regex::escape(h))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\n\s*(?:{})\s*:", alternatives)).expect("valid regex")
    })
}

fn bullet_split() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n|- ").expect("valid regex"))
}

/// Canonicalize punctuation and whitespace before comparing text.
///
/// Non-breaking spaces become spaces, curly quotes become straight quotes,
/// CRLF becomes LF, runs of spaces/tabs collapse to one space, three or
/// more newlines collapse to two, and the result is trimmed.
pub fn normalize_text(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    let replaced: String = s
        .replace("\r\n", "\n")
        .chars()
        .map(|c| match c {
            '\u{00A0}' => ' ',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();
    let collapsed = horizontal_ws().replace_all(&replaced, " ");
    let collapsed = blank_lines().replace_all(&collapsed, "\n\n");
    collapsed.trim().to_string()
}

/// Text after `header` (case-insensitive) up to the next stop header.
///
/// Returns `None` when the header is absent.
pub fn extract_section(text: &str, header: &str) -> Option<String> {
    let lower_text = text.to_lowercase();
    let lower_header = header.to_lowercase();
    // Lowercasing can change byte lengths for some scripts; only trust the
    // offset when it maps back onto the same header in the original text.
    let start = match lower_text.find(&lower_header) {
        Some(pos)
            if text.is_char_boundary(pos)
                && text
                    .get(pos..pos + header.len())
                    .is_some_and(|s| s.eq_ignore_ascii_case(header)) =>
        {
            pos + header.len()
        }
        _ => {
            let pos = text.find(header)?;
            pos + header.len()
        }
    };

    let after = &text[start..];
    let end = stop_header().find(after).map(|m| m.start()).unwrap_or(after.len());
    Some(after[..end].trim().to_string())
}

/// Cheap guard: true when an evidence section exists but holds no `>` marker.
///
/// A model that paraphrases in prose instead of quoting is caught here
/// without running the full validator.
pub fn lacks_blockquote(answer: &str) -> bool {
    match extract_section(answer, EVIDENCE_HEADER) {
        Some(section) => !section.contains('>'),
        None => false,
    }
}

/// Checks generated answers against the excerpts they were built from.
#[derive(Debug, Clone)]
pub struct EvidenceValidator {
    /// Lowercased inference phrases.
    inference_phrases: Vec<String>,
    min_quote: MinQuoteLength,
}

impl Default for EvidenceValidator {
    fn default() -> Self {
        Self::new(DEFAULT_INFERENCE_PHRASES.iter().copied(), MinQuoteLength::default())
    }
}

impl EvidenceValidator {
    pub fn new<I, S>(inference_phrases: I, min_quote: MinQuoteLength) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            inference_phrases: inference_phrases
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            min_quote,
        }
    }

    /// Validate `raw_answer` against the concatenated excerpt texts.
    pub fn validate(&self, raw_answer: &str, excerpts_blob: &str) -> EvidenceCheck {
        if raw_answer.trim().is_empty() {
            return EvidenceCheck::fail(EvidenceReason::EmptyAnswer);
        }

        if normalize_text(raw_answer) == STRICT_FALLBACK {
            return EvidenceCheck::pass(EvidenceReason::FallbackOk);
        }

        let evidence = extract_section(raw_answer, EVIDENCE_HEADER)
            .map(|s| normalize_text(&s))
            .unwrap_or_default();
        if evidence.is_empty() {
            return EvidenceCheck::fail(EvidenceReason::MissingEvidenceSection);
        }

        if evidence
            .to_lowercase()
            .contains(&STRICT_FALLBACK.to_lowercase())
        {
            return EvidenceCheck::fail(EvidenceReason::EvidenceIsFallback);
        }

        if self.contains_inference_language(&evidence) {
            return EvidenceCheck::fail(EvidenceReason::InferenceDetected);
        }

        if !self.has_verbatim_quote(&evidence, excerpts_blob) {
            return EvidenceCheck::fail(EvidenceReason::EvidenceNotVerbatim);
        }

        EvidenceCheck::pass(EvidenceReason::EvidenceOk)
    }

    pub fn contains_inference_language(&self, evidence: &str) -> bool {
        let lowered = evidence.to_lowercase();
        self.inference_phrases
            .iter()
            .any(|p| lowered.contains(p.as_str()))
    }

    /// True when at least one candidate quote line is long enough for its
    /// script and appears verbatim in the normalized excerpts.
    pub fn has_verbatim_quote(&self, evidence: &str, excerpts_blob: &str) -> bool {
        let evidence = normalize_text(evidence);
        let excerpts = normalize_text(excerpts_blob);
        if evidence.is_empty() || excerpts.is_empty() {
            return false;
        }

        candidate_lines(&evidence).iter().any(|line| {
            let min_len = self.min_quote.for_line(line);
            quote_variants(line)
                .into_iter()
                .any(|q| q.chars().count() >= min_len && excerpts.contains(q))
        })
    }
}

/// Block-quoted lines with the marker stripped, or every line/bullet item
/// when the evidence uses no block quotes.
fn candidate_lines(evidence: &str) -> Vec<String> {
    let quoted: Vec<String> = evidence
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('>'))
        .map(|l| normalize_text(l.trim_start_matches('>')))
        .filter(|l| !l.is_empty())
        .collect();
    if !quoted.is_empty() {
        return quoted;
    }

    bullet_split()
        .split(evidence)
        .map(normalize_text)
        .filter(|l| !l.is_empty())
        .collect()
}

/// The line itself, plus the line without wrapping double quotes.
fn quote_variants(line: &str) -> Vec<&str> {
    let mut variants = vec![line];
    let unwrapped = line.trim_matches('"').trim();
    if unwrapped != line && !unwrapped.is_empty() {
        variants.push(unwrapped);
    }
    variants
}

//! Query risk classification and safety wrapping.
//!
//! Guardrails only wrap an answer: they prepend a notice for emergency or
//! sensitive questions and append the standard disclaimer. The evidence
//! portion of the answer is never inspected or altered.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    General,
    Sensitive,
    Emergency,
}

pub const EMERGENCY_KEYWORDS: &[&str] = &[
    "chest pain",
    "difficulty breathing",
    "trouble breathing",
    "cannot breathe",
    "can't breathe",
    "shortness of breath",
    "unconscious",
    "fainted",
    "stroke",
    "heart attack",
    "suicidal",
    "suicide",
    "self harm",
    "self-harm",
    "kill myself",
];

pub const SENSITIVE_KEYWORDS: &[&str] = &[
    "cancer",
    "tumor",
    "pregnant",
    "pregnancy",
    "miscarriage",
    "abortion",
    "mental health",
    "depression",
    "anxiety",
];

pub const EMERGENCY_NOTICE: &str = "⚠️ This may be a medical emergency.\n\
Contact your local emergency services or go to the nearest hospital or emergency room now.\n\n";

pub const SENSITIVE_NOTICE: &str = "⚠️ This is a sensitive health topic. \
The information below is general public health information and **not a diagnosis**.\n\n";

pub const STANDARD_DISCLAIMER: &str = "\n\n---\n\
**Important:** this assistant provides *public health awareness information only*.\n\
- It does **not** diagnose or treat any condition.\n\
- It cannot prescribe medicines or doses.\n\
- It may not reflect the latest local medical guidelines.\n\
For persistent, severe, or unclear symptoms, consult a registered medical professional \
or your local health authority.";

/// Classify a question by keyword. Emergency keywords win over sensitive ones.
pub fn classify_risk(query: &str) -> RiskLevel {
    let lowered = query.to_lowercase();
    if EMERGENCY_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        RiskLevel::Emergency
    } else if SENSITIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        RiskLevel::Sensitive
    } else {
        RiskLevel::General
    }
}

/// Notice prepended for a risk level (empty for general questions).
pub fn notice(risk: RiskLevel) -> &'static str {
    match risk {
        RiskLevel::Emergency => EMERGENCY_NOTICE,
        RiskLevel::Sensitive => SENSITIVE_NOTICE,
        RiskLevel::General => "",
    }
}

/// Wrap an answer with the notice for `risk` and the standard disclaimer.
pub fn wrap(risk: RiskLevel, answer: &str) -> String {
    let prefix = notice(risk);
    let mut out = String::with_capacity(prefix.len() + answer.len() + STANDARD_DISCLAIMER.len());
    out.push_str(prefix);
    out.push_str(answer);
    out.push_str(STANDARD_DISCLAIMER);
    out
}

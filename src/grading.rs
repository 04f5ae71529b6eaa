//! Grade calculation and judgement parsing
//!
//! Pure, deterministic layer: the judging model's structured per-question
//! output goes in, numeric grades come out. No I/O happens here.
//!
//! The rubric weighting is fixed: up to 4.5 points for program logic, up to
//! 4.5 for clean execution (forfeited entirely by any major error, docked
//! 1.5 per minor error), and up to 1 point for descriptive comments.

use serde::{Deserialize, Serialize};

/// The model's structured assessment of one question.
///
/// Field names are the external contract with the judging prompt; parsing is
/// strict on the numeric fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgement {
    #[serde(default)]
    pub feedback: String,
    pub number_of_minor_errors: u32,
    pub number_of_major_errors: u32,
    /// 0–10, program logic quality irrespective of runtime errors.
    pub correctness: f64,
    /// Count of descriptive comments in the student's code.
    pub descriptive_comments: f64,
}

/// One question's reported grade: the judgement plus the derived score.
#[derive(Debug, Clone, Serialize)]
pub struct GradeRecord {
    pub name: String,
    #[serde(flatten)]
    pub judgement: Judgement,
    pub grade: f64,
}

/// Error type for judgement parsing
#[derive(Debug)]
pub enum JudgementParseError {
    Json(serde_json::Error),
    NotAnObject,
    Entry {
        question: String,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for JudgementParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JudgementParseError::Json(e) => write!(f, "Judgement is not valid JSON: {}", e),
            JudgementParseError::NotAnObject => {
                write!(f, "Judgement is not a question-keyed JSON object")
            }
            JudgementParseError::Entry { question, source } => {
                write!(f, "Malformed judgement for '{}': {}", question, source)
            }
        }
    }
}

impl std::error::Error for JudgementParseError {}

impl From<serde_json::Error> for JudgementParseError {
    fn from(e: serde_json::Error) -> Self {
        JudgementParseError::Json(e)
    }
}

/// Score one judgement under the fixed rubric weighting. Range [0, 10].
pub fn score(judgement: &Judgement) -> f64 {
    let correctness = (0.45 * judgement.correctness).clamp(0.0, 4.5);
    let execution = if judgement.number_of_major_errors > 0 {
        0.0
    } else {
        (4.5 - 1.5 * f64::from(judgement.number_of_minor_errors)).max(0.0)
    };
    let comments = (0.5 * judgement.descriptive_comments).min(1.0);

    correctness + execution + comments
}

/// Strip an optional Markdown code-fence wrapper from the model's output.
///
/// Models frequently wrap the JSON in ```json ... ``` even when told not to;
/// the fenced and unfenced forms must parse identically.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") with the rest of the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse one commentary piece: a JSON object keyed by question name, each
/// value a [`Judgement`]. All-or-nothing: any malformed entry fails the
/// whole piece, and there is no partial-credit fallback.
pub fn parse_judgement_text(raw: &str) -> Result<Vec<GradeRecord>, JudgementParseError> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(raw))?;
    let object = value.as_object().ok_or(JudgementParseError::NotAnObject)?;

    let mut records = Vec::with_capacity(object.len());
    for (name, entry) in object {
        let judgement: Judgement =
            serde_json::from_value(entry.clone()).map_err(|source| {
                JudgementParseError::Entry {
                    question: name.clone(),
                    source,
                }
            })?;
        records.push(GradeRecord {
            name: name.clone(),
            grade: score(&judgement),
            judgement,
        });
    }

    Ok(records)
}

/// Grade every commentary piece the agent collected, merging the records in
/// order. A single unparseable piece fails the job.
pub fn grade_commentary(pieces: &[String]) -> Result<Vec<GradeRecord>, JudgementParseError> {
    let mut records = Vec::new();
    for piece in pieces {
        records.extend(parse_judgement_text(piece)?);
    }
    Ok(records)
}

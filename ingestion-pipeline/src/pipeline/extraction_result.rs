use common::storage::types::{bank_question::OPTION_COUNT, law::Law};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A question read from the model's answer that passed structural checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateQuestion {
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: u8,
    pub explanation: String,
    pub law: Law,
    pub law_reference: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscardedCandidate {
    pub index: usize,
    pub reason: String,
}

/// Classification of one element of the model's JSON array.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateParse {
    WellFormed(CandidateQuestion),
    Malformed(DiscardedCandidate),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionOutcome {
    pub candidates: Vec<CandidateQuestion>,
    pub discarded: Vec<DiscardedCandidate>,
}

impl ExtractionOutcome {
    pub fn discarded_count(&self) -> u32 {
        u32::try_from(self.discarded.len()).unwrap_or(u32::MAX)
    }
}

impl FromIterator<CandidateParse> for ExtractionOutcome {
    fn from_iter<I: IntoIterator<Item = CandidateParse>>(iter: I) -> Self {
        let mut outcome = ExtractionOutcome::default();
        for parsed in iter {
            match parsed {
                CandidateParse::WellFormed(candidate) => outcome.candidates.push(candidate),
                CandidateParse::Malformed(discarded) => outcome.discarded.push(discarded),
            }
        }
        outcome
    }
}

/// Inner text of the first ``` fenced block. A language tag on the opening
/// fence line (`json`, `JSON`, `jsonc`, ...) is skipped.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = text.get(start.checked_add(3)?..)?;
    let body = match after_fence.split_once('\n') {
        Some((tag, rest)) if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) => rest,
        _ => after_fence,
    };
    let end = body.find("```")?;
    body.get(..end).map(str::trim)
}

/// Turns the model's text answer into candidates.
///
/// Anything that is not a JSON array yields an empty outcome rather than an
/// error; a page without questions is a normal result.
pub fn parse_model_response(response: &str) -> ExtractionOutcome {
    let trimmed = response.trim();
    let payload = fenced_block(trimmed).unwrap_or(trimmed);

    let items = match serde_json::from_str::<Value>(payload) {
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            warn!(kind = json_kind(&other), "model response was not a JSON array");
            return ExtractionOutcome::default();
        }
        Err(err) => {
            warn!(error = %err, "model response was not valid JSON");
            return ExtractionOutcome::default();
        }
    };

    let outcome: ExtractionOutcome = items
        .iter()
        .enumerate()
        .map(|(index, item)| classify_candidate(index, item))
        .collect();

    for discarded in &outcome.discarded {
        warn!(
            index = discarded.index,
            reason = %discarded.reason,
            "discarding malformed candidate"
        );
    }
    debug!(
        candidates = outcome.candidates.len(),
        discarded = outcome.discarded.len(),
        "parsed model response"
    );

    outcome
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn classify_candidate(index: usize, item: &Value) -> CandidateParse {
    let malformed = |reason: &str| {
        CandidateParse::Malformed(DiscardedCandidate {
            index,
            reason: reason.to_string(),
        })
    };

    let Some(object) = item.as_object() else {
        return malformed("candidate is not an object");
    };

    let Some(text) = non_empty_str(object, "text") else {
        return malformed("missing question text");
    };

    let options = object
        .get("options")
        .and_then(Value::as_array)
        .filter(|options| options.len() == OPTION_COUNT)
        .and_then(|options| {
            options
                .iter()
                .map(|o| o.as_str().map(str::trim).filter(|o| !o.is_empty()))
                .map(|o| o.map(str::to_string))
                .collect::<Option<Vec<_>>>()
        });
    let Some(options) = options else {
        return malformed("expected exactly 4 non-empty options");
    };

    let correct_answer = object
        .get("correctAnswer")
        .and_then(Value::as_u64)
        .filter(|answer| *answer < OPTION_COUNT as u64)
        .and_then(|answer| u8::try_from(answer).ok());
    let Some(correct_answer) = correct_answer else {
        return malformed("correctAnswer must be an integer between 0 and 3");
    };

    let (law, unrecognised_law) = match object.get("law") {
        None | Some(Value::Null) => (Law::DEFAULT, None),
        Some(Value::String(raw)) => match Law::parse_tag(raw) {
            Some(law) => (law, None),
            None => (
                Law::DEFAULT,
                Some(raw.trim()).filter(|r| !r.is_empty()),
            ),
        },
        Some(_) => return malformed("law must be a string"),
    };

    let law_reference = unrecognised_law
        .or_else(|| non_empty_str(object, "lawReference"))
        .map_or_else(|| law.to_string(), str::to_string);

    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .map_or(DEFAULT_CONFIDENCE, |c| c.clamp(0.0, 1.0));

    CandidateParse::WellFormed(CandidateQuestion {
        text: text.to_string(),
        options,
        correct_answer,
        explanation: non_empty_str(object, "explanation")
            .unwrap_or_default()
            .to_string(),
        law,
        law_reference,
        confidence,
    })
}

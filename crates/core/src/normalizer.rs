//! Turns free-text provider output into the canonical answer shape for each
//! question type.

use crate::question::QuestionType;
use regex::Regex;
use std::sync::LazyLock;

static OPTION_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-F]").expect("option letter pattern is valid"));

/// Separators that may appear between bare option letters.
const LETTER_SEPARATORS: &[char] = &[',', '，', '、', '；', ';', '#', ' '];

/// Natural-language list separators, tried in order.
const PHRASE_SEPARATORS: &[&str] = &["、", "；", ";", "和", "以及"];

const TRUE_WORDS: &[&str] = &["正确", "对", "true", "√", "yes", "是"];
const FALSE_WORDS: &[&str] = &["错误", "错", "false", "×", "no", "否"];

pub const JUDGEMENT_TRUE: &str = "正确";
pub const JUDGEMENT_FALSE: &str = "错误";

/// Normalize `raw` for a question of the given type. `None` (unknown type)
/// behaves like a completion question.
pub fn normalize(raw: &str, question_type: Option<QuestionType>) -> String {
    let text = raw.trim();
    match question_type {
        Some(QuestionType::Single) => normalize_single(text),
        Some(QuestionType::Multiple) => normalize_multiple(text),
        Some(QuestionType::Judgement) => normalize_judgement(text),
        Some(QuestionType::Completion) | None => text.to_string(),
    }
}

fn normalize_single(text: &str) -> String {
    let mut chars = text.chars();
    if let (Some(c), None) = (chars.next(), chars.next())
        && ('A'..='F').contains(&c.to_ascii_uppercase())
    {
        tracing::warn!("Provider answered a single-choice question with option letter {text:?} instead of option content");
    }
    text.to_string()
}

fn normalize_multiple(text: &str) -> String {
    let letters_only = text
        .chars()
        .all(|c| ('A'..='F').contains(&c.to_ascii_uppercase()) || LETTER_SEPARATORS.contains(&c));
    if letters_only {
        let upper = text.to_ascii_uppercase();
        let letters: Vec<&str> = OPTION_LETTER.find_iter(&upper).map(|m| m.as_str()).collect();
        if !letters.is_empty() {
            return letters.join("#");
        }
    }

    if !text.contains('#')
        && let Some(sep) = PHRASE_SEPARATORS.iter().find(|sep| text.contains(**sep))
    {
        let parts: Vec<&str> = text
            .split(sep)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() > 1 {
            return parts.join("#");
        }
    }

    text.to_string()
}

fn normalize_judgement(text: &str) -> String {
    let lowered = text.to_lowercase();
    let candidate = lowered.trim_end_matches(['.', '。', '!', '！']);
    if TRUE_WORDS.contains(&candidate) {
        JUDGEMENT_TRUE.to_string()
    } else if FALSE_WORDS.contains(&candidate) {
        JUDGEMENT_FALSE.to_string()
    } else {
        text.to_string()
    }
}

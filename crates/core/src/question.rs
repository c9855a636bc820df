use serde::{Deserialize, Serialize};

/// Exam question categories understood by the normalizer and prompt builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Single,
    Multiple,
    Judgement,
    Completion,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multiple => "multiple",
            Self::Judgement => "judgement",
            Self::Completion => "completion",
        }
    }

    /// Parse a caller-supplied type tag. Unknown or empty tags yield `None`
    /// and are answered like completion questions.
    pub fn parse(tag: &str) -> Option<Self> {
        tag.parse().ok()
    }

    /// Choice questions need their option list to be meaningful.
    pub fn requires_options(&self) -> bool {
        matches!(self, Self::Single | Self::Multiple)
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "multiple" => Ok(Self::Multiple),
            "judgement" | "judgment" => Ok(Self::Judgement),
            "completion" => Ok(Self::Completion),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// A question as received from the caller. Fields are kept verbatim; the
/// cache fingerprint is whitespace-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    /// Raw type tag as sent by the caller.
    pub kind: String,
    pub options: String,
}

impl Question {
    pub fn new(
        text: impl Into<String>,
        kind: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            kind: kind.into(),
            options: options.into(),
        }
    }

    pub fn question_type(&self) -> Option<QuestionType> {
        QuestionType::parse(&self.kind)
    }
}

//! Persistence boundary for answered questions. The relational store lives
//! outside this crate; `MemoryQuestionStore` backs tests and single-process runs.

use crate::question::{Question, QuestionType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionRecord {
    pub question: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub options: String,
    pub answer: String,
    pub updated_at: DateTime<Utc>,
}

impl QuestionRecord {
    pub fn new(question: &Question, answer: impl Into<String>) -> Self {
        Self {
            question: question.text.clone(),
            kind: question.kind.clone(),
            options: question.options.clone(),
            answer: answer.into(),
            updated_at: Utc::now(),
        }
    }

    /// Question, type and answer must be non-empty; choice questions also
    /// need options. Records of unknown type are never stored.
    pub fn is_storable(&self) -> bool {
        if self.question.is_empty() || self.kind.is_empty() || self.answer.trim().is_empty() {
            return false;
        }
        match QuestionType::parse(&self.kind) {
            Some(kind) if kind.requires_options() => !self.options.trim().is_empty(),
            Some(_) => true,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The record failed `is_storable` and was not written.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("question store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Insert, or replace the answer of the record with the same
    /// (question, type, options).
    async fn upsert(&self, record: QuestionRecord) -> Result<UpsertOutcome, StoreError>;

    async fn find(&self, question: &Question) -> Result<Option<QuestionRecord>, StoreError>;
}

type RecordKey = (String, String, String);

#[derive(Debug, Default)]
pub struct MemoryQuestionStore {
    records: RwLock<HashMap<RecordKey, QuestionRecord>>,
}

impl MemoryQuestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QuestionStore for MemoryQuestionStore {
    async fn upsert(&self, record: QuestionRecord) -> Result<UpsertOutcome, StoreError> {
        if !record.is_storable() {
            return Ok(UpsertOutcome::Skipped);
        }
        let key = (
            record.question.clone(),
            record.kind.clone(),
            record.options.clone(),
        );
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        Ok(match records.insert(key, record) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn find(&self, question: &Question) -> Result<Option<QuestionRecord>, StoreError> {
        let key = (
            question.text.clone(),
            question.kind.clone(),
            question.options.clone(),
        );
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(&key).cloned())
    }
}

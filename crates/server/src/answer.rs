//! Question answering: cache lookup, prompt, dispatch, normalization, then
//! cache write and record persistence.

use arc_swap::ArcSwap;
use quizgate_core::cache::{AnswerCache, CacheError, Fingerprint};
use quizgate_core::config::Config;
use quizgate_core::error::GatewayError;
use quizgate_core::normalizer::normalize;
use quizgate_core::prompt::build_messages;
use quizgate_core::question::Question;
use quizgate_core::store::{QuestionRecord, QuestionStore, UpsertOutcome};
use quizgate_provider::{DispatchRequest, Dispatcher};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub answer: String,
    /// `None` when served from cache.
    pub proxy_name: Option<String>,
    pub model: Option<String>,
    pub cached: bool,
}

pub struct AnswerService {
    config: Arc<ArcSwap<Config>>,
    dispatcher: Arc<Dispatcher>,
    cache: Arc<dyn AnswerCache>,
    store: Arc<dyn QuestionStore>,
}

impl AnswerService {
    pub fn new(
        config: Arc<ArcSwap<Config>>,
        dispatcher: Arc<Dispatcher>,
        cache: Arc<dyn AnswerCache>,
        store: Arc<dyn QuestionStore>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            cache,
            store,
        }
    }

    pub async fn answer(
        &self,
        question: &Question,
        model: Option<String>,
    ) -> Result<Answer, GatewayError> {
        if question.text.trim().is_empty() {
            return Err(GatewayError::BadRequest("question text is empty".to_string()));
        }

        let cache_config = self.config.load().cache.clone();
        let key = Fingerprint::of(question);

        if cache_config.enabled {
            match self.cache.get(&key).await {
                Ok(Some(answer)) if !answer.is_empty() => {
                    tracing::info!(key = %key, "Answer served from cache");
                    return Ok(Answer {
                        answer,
                        proxy_name: None,
                        model: None,
                        cached: true,
                    });
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Cache lookup failed, treating as miss: {e}"),
            }
        }

        let request = DispatchRequest::new(build_messages(question)).with_model(model);
        let outcome = self.dispatcher.invoke(&request).await?;
        let answer = normalize(&outcome.content, question.question_type());
        tracing::info!(
            proxy = %outcome.proxy_name,
            model = %outcome.model,
            kind = %question.kind,
            "Answer: {answer}"
        );

        if cache_config.enabled
            && let Err(e) = self
                .cache
                .set(key, answer.clone(), Duration::from_secs(cache_config.ttl_secs))
                .await
        {
            tracing::warn!("Cache write failed: {e}");
        }

        match self.store.upsert(QuestionRecord::new(question, &answer)).await {
            Ok(UpsertOutcome::Skipped) => {
                tracing::debug!(kind = %question.kind, "Incomplete question record, not stored");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Question store write failed: {e}"),
        }

        Ok(Answer {
            answer,
            proxy_name: Some(outcome.proxy_name),
            model: Some(outcome.model),
            cached: false,
        })
    }

    pub async fn clear_cache(&self) -> Result<usize, CacheError> {
        let cleared = self.cache.clear().await?;
        tracing::info!(cleared, "Answer cache cleared");
        Ok(cleared)
    }

    /// Drop the cached answer for one question.
    pub async fn invalidate(&self, question: &Question) -> Result<bool, CacheError> {
        self.cache.delete(&Fingerprint::of(question)).await
    }

    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.cache.purge_expired().await
    }

    pub async fn cache_len(&self) -> Result<usize, CacheError> {
        self.cache.len().await
    }
}

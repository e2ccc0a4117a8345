#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use text_pipeline_server::aggregation::AggregationStrategy;
use text_pipeline_server::app_state::AppState;
use text_pipeline_server::engine::{EntityTagger, HandleFactory, Message, TextGenerator};
use text_pipeline_server::model_registry::ModelRegistry;
use text_pipeline_server::types::Entity;

/// Replies with the same content whatever the prompt.
pub struct FixedGenerator(pub String);

impl TextGenerator for FixedGenerator {
    fn generate(&self, messages: &[Message]) -> Result<Vec<Message>> {
        let mut conversation = messages.to_vec();
        conversation.push(Message::assistant(&self.0));
        Ok(conversation)
    }
}

/// Returns the same entity list for any text.
pub struct FixedTagger(pub Vec<Entity>);

impl EntityTagger for FixedTagger {
    fn tag(&self, _text: &str, strategy: AggregationStrategy) -> Result<Vec<Entity>> {
        if strategy != AggregationStrategy::Simple {
            return Err(anyhow!("expected simple aggregation, got {strategy:?}"));
        }
        Ok(self.0.clone())
    }
}

pub struct FailingTagger;

impl EntityTagger for FailingTagger {
    fn tag(&self, _text: &str, _strategy: AggregationStrategy) -> Result<Vec<Entity>> {
        Err(anyhow!("tensor shape mismatch"))
    }
}

pub fn entity(value: Value) -> Entity {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

pub fn alice_and_acme() -> Vec<Entity> {
    vec![
        entity(json!({"entity_group": "PER", "word": "Alice"})),
        entity(json!({"entity_group": "ORG", "word": "Acme"})),
    ]
}

/// Counts constructions and can be told to fail the first few.
pub struct StubFactory {
    pub reply: String,
    pub entities: Vec<Entity>,
    pub failing_tagger: bool,
    pub build_delay: Duration,
    pub failures_left: AtomicUsize,
    pub generator_builds: AtomicUsize,
    pub tagger_builds: AtomicUsize,
}

impl StubFactory {
    pub fn new() -> Self {
        Self {
            reply: "X".to_string(),
            entities: alice_and_acme(),
            failing_tagger: false,
            build_delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
            generator_builds: AtomicUsize::new(0),
            tagger_builds: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_failing_tagger(mut self) -> Self {
        self.failing_tagger = true;
        self
    }

    pub fn generator_builds(&self) -> usize {
        self.generator_builds.load(Ordering::SeqCst)
    }

    pub fn tagger_builds(&self) -> usize {
        self.tagger_builds.load(Ordering::SeqCst)
    }

    async fn build_step(&self) -> Result<()> {
        if !self.build_delay.is_zero() {
            rocket::tokio::time::sleep(self.build_delay).await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(anyhow!("weights unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl HandleFactory for StubFactory {
    async fn build_generator(&self) -> Result<Arc<dyn TextGenerator>> {
        self.generator_builds.fetch_add(1, Ordering::SeqCst);
        self.build_step().await?;
        Ok(Arc::new(FixedGenerator(self.reply.clone())))
    }

    async fn build_tagger(&self) -> Result<Arc<dyn EntityTagger>> {
        self.tagger_builds.fetch_add(1, Ordering::SeqCst);
        self.build_step().await?;
        if self.failing_tagger {
            return Ok(Arc::new(FailingTagger));
        }
        Ok(Arc::new(FixedTagger(self.entities.clone())))
    }
}

pub fn state_with(factory: Arc<StubFactory>) -> Arc<AppState> {
    AppState::new(ModelRegistry::default(), factory)
}

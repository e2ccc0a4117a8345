use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Quantized DictaLM 2.0 instruct weights (Mistral architecture).
pub const GENERATION_REPO: &str = "dicta-il/dictalm2.0-instruct-GGUF";
pub const GENERATION_FILE: &str = "dictalm2.0-instruct.Q4_K_M.gguf";
pub const GENERATION_TOKENIZER_REPO: &str = "dicta-il/dictalm2.0-instruct";

/// BERT token classifier; labels come from the repo's `config.json`.
pub const NER_REPO: &str = "dicta-il/dictabert-ner";

/// The two inference behaviours the service offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Generation,
    EntityTagging,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::Generation, Capability::EntityTagging];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Generation => "generation",
            Capability::EntityTagging => "entity-tagging",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generation" | "generate" => Ok(Capability::Generation),
            "entity-tagging" | "entity_tagging" | "ner" => Ok(Capability::EntityTagging),
            other => Err(format!(
                "unknown capability `{other}` (expected `generation` or `entity-tagging`)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Loaded,
    Error,
}

/// Where the weights for one capability live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub capability: Capability,
    pub model_id: String,
    /// Single weights file inside `model_id` (GGUF models only).
    pub weights_file: Option<String>,
    /// Repo holding `tokenizer.json` when it differs from `model_id`.
    pub tokenizer_repo: Option<String>,
}

impl ModelSpec {
    pub fn generation() -> Self {
        Self {
            capability: Capability::Generation,
            model_id: GENERATION_REPO.to_string(),
            weights_file: Some(GENERATION_FILE.to_string()),
            tokenizer_repo: Some(GENERATION_TOKENIZER_REPO.to_string()),
        }
    }

    pub fn entity_tagging() -> Self {
        Self {
            capability: Capability::EntityTagging,
            model_id: NER_REPO.to_string(),
            weights_file: None,
            tokenizer_repo: None,
        }
    }

    pub fn tokenizer_repo(&self) -> &str {
        self.tokenizer_repo.as_deref().unwrap_or(&self.model_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub capability: Capability,
    pub model_id: String,
    pub status: ModelStatus,
    pub last_updated: Option<SystemTime>,
    pub last_error: Option<String>,
}

impl ModelMetadata {
    pub fn new(spec: &ModelSpec) -> Self {
        Self {
            capability: spec.capability,
            model_id: spec.model_id.clone(),
            status: ModelStatus::Unloaded,
            last_updated: None,
            last_error: None,
        }
    }
}

/// Per-capability load status. Purely observational: handles live in `AppState`.
#[derive(Debug)]
pub struct ModelRegistry {
    pub models: RwLock<HashMap<Capability, ModelMetadata>>,
}

impl ModelRegistry {
    pub fn new(specs: &[ModelSpec]) -> Self {
        let map = specs
            .iter()
            .map(|spec| (spec.capability, ModelMetadata::new(spec)))
            .collect();

        Self {
            models: RwLock::new(map),
        }
    }

    pub fn list_models(&self) -> Vec<ModelMetadata> {
        let guard = self.models.read();
        let mut models: Vec<ModelMetadata> = guard.values().cloned().collect();
        models.sort_by_key(|m| m.capability.as_str());
        models
    }

    pub fn set_status(&self, capability: Capability, status: ModelStatus) -> Option<ModelMetadata> {
        let mut guard = self.models.write();
        if let Some(meta) = guard.get_mut(&capability) {
            meta.status = status;
            meta.last_updated = Some(SystemTime::now());
            if status == ModelStatus::Loaded {
                meta.last_error = None;
            }
            return Some(meta.clone());
        }
        None
    }

    pub fn set_error(&self, capability: Capability, message: impl Into<String>) -> Option<ModelMetadata> {
        let mut guard = self.models.write();
        if let Some(meta) = guard.get_mut(&capability) {
            meta.status = ModelStatus::Error;
            meta.last_updated = Some(SystemTime::now());
            meta.last_error = Some(message.into());
            return Some(meta.clone());
        }
        None
    }

    pub fn get_model(&self, capability: Capability) -> Option<ModelMetadata> {
        let guard = self.models.read();
        guard.get(&capability).cloned()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(&[ModelSpec::generation(), ModelSpec::entity_tagging()])
    }
}

use rocket::figment::Figment;
use serde::{Deserialize, Serialize};

use crate::engine::{self, SamplingParams};
use crate::model_registry::{
    Capability, ModelSpec, GENERATION_FILE, GENERATION_REPO, GENERATION_TOKENIZER_REPO, NER_REPO,
};

/// Service settings, read from the same figment as Rocket's own config
/// (`Rocket.toml`, `ROCKET_*` environment variables). Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub generation_repo: String,
    pub generation_file: String,
    pub generation_tokenizer_repo: String,
    pub ner_repo: String,
    pub max_new_tokens: usize,
    /// `<= 0` means greedy decoding.
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub seed: u64,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
    /// Resolve both handles in the background right after launch.
    pub preload: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            generation_repo: GENERATION_REPO.to_string(),
            generation_file: GENERATION_FILE.to_string(),
            generation_tokenizer_repo: GENERATION_TOKENIZER_REPO.to_string(),
            ner_repo: NER_REPO.to_string(),
            max_new_tokens: 256,
            temperature: 0.7,
            top_p: None,
            seed: 299792458,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            preload: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self, rocket::figment::Error> {
        figment.extract()
    }

    pub fn model_spec(&self, capability: Capability) -> ModelSpec {
        match capability {
            Capability::Generation => ModelSpec {
                capability,
                model_id: self.generation_repo.clone(),
                weights_file: Some(self.generation_file.clone()),
                tokenizer_repo: Some(self.generation_tokenizer_repo.clone()),
            },
            Capability::EntityTagging => ModelSpec {
                capability,
                model_id: self.ner_repo.clone(),
                weights_file: None,
                tokenizer_repo: None,
            },
        }
    }

    pub fn model_specs(&self) -> Vec<ModelSpec> {
        Capability::ALL
            .iter()
            .map(|capability| self.model_spec(*capability))
            .collect()
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            max_new_tokens: engine::clamp_new_tokens(self.max_new_tokens),
            temperature: (self.temperature > 0.0).then_some(self.temperature),
            top_p: self.top_p,
            seed: self.seed,
            repeat_penalty: self.repeat_penalty,
            repeat_last_n: self.repeat_last_n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_built_in_models() {
        let config = ServiceConfig::default();
        assert_eq!(config.model_spec(Capability::Generation), ModelSpec::generation());
        assert_eq!(
            config.model_spec(Capability::EntityTagging),
            ModelSpec::entity_tagging()
        );
        assert!(!config.preload);
    }

    #[test]
    fn empty_figment_falls_back_to_defaults() {
        let config = ServiceConfig::from_figment(&Figment::new()).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn figment_overrides_single_keys() {
        let figment = Figment::new()
            .merge(("max_new_tokens", 32))
            .merge(("ner_repo", "local/ner"))
            .merge(("port", 9000));
        let config = ServiceConfig::from_figment(&figment).unwrap();
        assert_eq!(config.max_new_tokens, 32);
        assert_eq!(config.model_spec(Capability::EntityTagging).model_id, "local/ner");
        assert_eq!(config.generation_repo, GENERATION_REPO);
    }

    #[test]
    fn non_positive_temperature_is_greedy() {
        let config = ServiceConfig {
            temperature: 0.0,
            ..ServiceConfig::default()
        };
        assert_eq!(config.sampling().temperature, None);
        assert_eq!(ServiceConfig::default().sampling().temperature, Some(0.7));
    }

    #[test]
    fn oversized_reply_budget_is_clamped() {
        let config = ServiceConfig {
            max_new_tokens: usize::MAX,
            ..ServiceConfig::default()
        };
        assert!(config.sampling().max_new_tokens < usize::MAX);
        assert_eq!(
            config.sampling().max_new_tokens,
            engine::clamp_new_tokens(usize::MAX)
        );
        assert_eq!(ServiceConfig::default().sampling().max_new_tokens, 256);
    }
}

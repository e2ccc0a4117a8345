use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::quantized_llama as qllama;
use hf_hub::api::sync::{Api, ApiRepo};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokenizers::decoders::wordpiece::WordPiece;
use tokenizers::decoders::DecoderWrapper;
use tokenizers::Tokenizer;

use crate::aggregation::{self, AggregationStrategy, TokenPrediction};
use crate::model_registry::ModelSpec;
use crate::types::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
        }
    }
}

/// Chat-style text generation. Blocking: callers run it off the async runtime.
pub trait TextGenerator: Send + Sync {
    /// Returns `messages` with the model's reply appended as the final message.
    fn generate(&self, messages: &[Message]) -> Result<Vec<Message>>;
}

/// Named-entity tagging. Blocking, like [`TextGenerator`].
pub trait EntityTagger: Send + Sync {
    fn tag(&self, text: &str, strategy: AggregationStrategy) -> Result<Vec<Entity>>;
}

/// Builds the expensive handles. `AppState` calls each method at most once
/// per successful construction.
#[async_trait]
pub trait HandleFactory: Send + Sync {
    async fn build_generator(&self) -> Result<Arc<dyn TextGenerator>>;

    async fn build_tagger(&self) -> Result<Arc<dyn EntityTagger>>;
}

/// Context positions always left for the prompt.
const MIN_PROMPT_TOKENS: usize = 256;

/// Caps a configured reply length so prompt and reply fit the model's context.
pub fn clamp_new_tokens(requested: usize) -> usize {
    requested.min(qllama::MAX_SEQ_LEN - MIN_PROMPT_TOKENS)
}

/// Prompt tokens that fit once `max_new_tokens` are reserved for the reply.
fn prompt_budget(max_new_tokens: usize) -> usize {
    qllama::MAX_SEQ_LEN
        .saturating_sub(max_new_tokens.saturating_add(10))
        .max(1)
}

/// Drops the first `n` tokens of `content`, given each token's byte offsets.
fn drop_leading_tokens<'a>(content: &'a str, offsets: &[(usize, usize)], n: usize) -> &'a str {
    match offsets.get(n) {
        Some(&(start, _)) => content.get(start..).unwrap_or(""),
        None => "",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_new_tokens: usize,
    /// `None` means greedy decoding.
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: u64,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
}

/// Loads candle models from the Hugging Face hub on the blocking pool.
pub struct CandleFactory {
    generation: ModelSpec,
    tagging: ModelSpec,
    sampling: SamplingParams,
}

impl CandleFactory {
    pub fn new(generation: ModelSpec, tagging: ModelSpec, sampling: SamplingParams) -> Arc<Self> {
        Arc::new(Self {
            generation,
            tagging,
            sampling,
        })
    }
}

#[async_trait]
impl HandleFactory for CandleFactory {
    async fn build_generator(&self) -> Result<Arc<dyn TextGenerator>> {
        let spec = self.generation.clone();
        let sampling = self.sampling.clone();
        let engine = tokio::task::spawn_blocking(move || CandleGenerator::load(&spec, sampling))
            .await
            .context("generator loader panicked")??;
        let engine: Arc<dyn TextGenerator> = Arc::new(engine);
        Ok(engine)
    }

    async fn build_tagger(&self) -> Result<Arc<dyn EntityTagger>> {
        let spec = self.tagging.clone();
        let engine = tokio::task::spawn_blocking(move || CandleTagger::load(&spec))
            .await
            .context("tagger loader panicked")??;
        let engine: Arc<dyn EntityTagger> = Arc::new(engine);
        Ok(engine)
    }
}

fn hub_repo(model_id: &str) -> Result<ApiRepo> {
    let api = Api::new().context("failed to initialise the Hugging Face hub client")?;
    Ok(api.model(model_id.to_string()))
}

fn fetch(repo: &ApiRepo, model_id: &str, filename: &str) -> Result<PathBuf> {
    repo.get(filename)
        .with_context(|| format!("failed to fetch `{filename}` from `{model_id}`"))
}

fn load_tokenizer(model_id: &str) -> Result<Tokenizer> {
    let repo = hub_repo(model_id)?;
    let path = fetch(&repo, model_id, "tokenizer.json")?;
    Tokenizer::from_file(&path).map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", path.display()))
}

/// Renders a conversation in the Mistral instruct format. The tokenizer adds
/// the leading `<s>`; a system message is folded into the next user turn.
pub fn render_mistral_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    let mut system: Option<&str> = None;
    for message in messages {
        match message.role {
            Role::System => system = Some(message.content.as_str()),
            Role::User => {
                prompt.push_str("[INST] ");
                if let Some(system) = system.take() {
                    prompt.push_str(system);
                    prompt.push_str("\n\n");
                }
                prompt.push_str(&message.content);
                prompt.push_str(" [/INST]");
            }
            Role::Assistant => {
                prompt.push_str(&message.content);
                prompt.push_str("</s>");
            }
        }
    }
    prompt
}

pub struct CandleGenerator {
    model_id: String,
    device: Device,
    model: Mutex<qllama::ModelWeights>,
    tokenizer: Tokenizer,
    eos_token: Option<u32>,
    sampling: SamplingParams,
}

impl CandleGenerator {
    pub fn load(spec: &ModelSpec, sampling: SamplingParams) -> Result<Self> {
        // CPU only
        let device = Device::Cpu;

        let filename = spec
            .weights_file
            .as_deref()
            .ok_or_else(|| anyhow!("no GGUF file configured for `{}`", spec.model_id))?;
        let repo = hub_repo(&spec.model_id)?;
        let model_path = fetch(&repo, &spec.model_id, filename)?;

        let mut file = std::fs::File::open(&model_path)
            .with_context(|| format!("failed to open {}", model_path.display()))?;
        let start = Instant::now();

        let content = gguf_file::Content::read(&mut file)
            .map_err(|e| e.with_path(&model_path))?;
        let mut total_size_in_bytes = 0usize;
        for (_, tensor) in content.tensor_infos.iter() {
            let elem_count = tensor.shape.elem_count();
            total_size_in_bytes +=
                elem_count * tensor.ggml_dtype.type_size() / tensor.ggml_dtype.block_size();
        }
        tracing::info!(
            model_id = %spec.model_id,
            tensors = content.tensor_infos.len(),
            size = %format_size(total_size_in_bytes),
            elapsed_s = start.elapsed().as_secs_f32(),
            "read gguf weights"
        );

        let model = qllama::ModelWeights::from_gguf(content, &mut file, &device)?;
        let tokenizer = load_tokenizer(spec.tokenizer_repo())?;
        let eos_token = tokenizer.token_to_id("</s>");
        if eos_token.is_none() {
            tracing::warn!(model_id = %spec.model_id, "tokenizer has no `</s>` token, generation stops at max_new_tokens");
        }

        Ok(Self {
            model_id: spec.model_id.clone(),
            device,
            model: Mutex::new(model),
            tokenizer,
            eos_token,
            sampling,
        })
    }

    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<tokenizers::Encoding> {
        self.tokenizer
            .encode(text, add_special_tokens)
            .map_err(|e| anyhow!("failed to tokenize prompt: {e}"))
    }

    /// Tokenizes the rendered conversation. When it is too long, the start of
    /// the last user turn is cut until it fits, so the `[INST]` framing survives.
    fn prompt_tokens(&self, messages: &[Message]) -> Result<Vec<u32>> {
        let budget = prompt_budget(self.sampling.max_new_tokens);
        let mut messages = messages.to_vec();
        loop {
            let ids = self
                .encode(&render_mistral_prompt(&messages), true)?
                .get_ids()
                .to_vec();
            if ids.len() <= budget {
                return Ok(ids);
            }

            let overflow = ids.len() - budget;
            let turn = messages
                .iter_mut()
                .rev()
                .find(|m| m.role == Role::User && !m.content.is_empty())
                .ok_or_else(|| {
                    anyhow!("prompt is {} tokens without user content, limit is {budget}", ids.len())
                })?;
            let content = self.encode(&turn.content, false)?;
            let kept = drop_leading_tokens(&turn.content, content.get_offsets(), overflow);
            let kept = if kept.len() < turn.content.len() {
                kept.to_string()
            } else {
                String::new()
            };
            tracing::warn!(
                model_id = %self.model_id,
                prompt_tokens = ids.len(),
                budget,
                "user turn truncated"
            );
            turn.content = kept;
        }
    }

    /// Samples a continuation of `prompt_tokens` and decodes only the new tokens.
    fn complete(&self, prompt_tokens: Vec<u32>) -> Result<String> {
        let params = &self.sampling;
        let mut logits_processor = LogitsProcessor::new(params.seed, params.temperature, params.top_p);
        let mut context = prompt_tokens.clone();
        let mut generated = Vec::with_capacity(params.max_new_tokens);

        // one sequence at a time: the KV cache lives inside the weights
        let mut model = self.model.lock();

        let mut input = Tensor::new(prompt_tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        let mut index_pos = 0;
        for _ in 0..params.max_new_tokens {
            let logits = model.forward(&input, index_pos)?.squeeze(0)?;
            index_pos += input.dim(1)?;

            let logits = if params.repeat_penalty == 1.0 {
                logits
            } else {
                let start = context.len().saturating_sub(params.repeat_last_n);
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    params.repeat_penalty,
                    &context[start..],
                )?
            };

            let next_token = logits_processor.sample(&logits)?;
            if Some(next_token) == self.eos_token {
                break;
            }
            context.push(next_token);
            generated.push(next_token);
            input = Tensor::new(&[next_token], &self.device)?.unsqueeze(0)?;
        }

        self.tokenizer
            .decode(&generated, true)
            .map_err(|e| anyhow!("failed to decode generated tokens: {e}"))
    }
}

impl TextGenerator for CandleGenerator {
    fn generate(&self, messages: &[Message]) -> Result<Vec<Message>> {
        let prompt_tokens = self.prompt_tokens(messages)?;
        let reply = self.complete(prompt_tokens)?;
        Ok(with_reply(messages, &reply))
    }
}

/// The conversation with the decoded reply appended verbatim.
fn with_reply(messages: &[Message], reply: &str) -> Vec<Message> {
    let mut conversation = messages.to_vec();
    conversation.push(Message::assistant(reply));
    conversation
}

/// Fields of a token-classification `config.json` that candle's BERT config doesn't expose.
#[derive(Debug, Deserialize)]
struct ClassifierConfig {
    hidden_size: usize,
    max_position_embeddings: usize,
    id2label: HashMap<String, String>,
}

impl ClassifierConfig {
    fn labels(&self) -> Result<Vec<String>> {
        let mut labels = vec![String::new(); self.id2label.len()];
        for (id, label) in &self.id2label {
            let index: usize = id
                .parse()
                .with_context(|| format!("non-numeric label id `{id}` in id2label"))?;
            let slot = labels
                .get_mut(index)
                .ok_or_else(|| anyhow!("label id {index} out of range in id2label"))?;
            *slot = label.clone();
        }
        if labels.is_empty() {
            bail!("id2label is empty");
        }
        Ok(labels)
    }
}

/// Swaps the tokenizer's decoder for WordPiece so `##` continuations merge
/// back into whole words in entity text.
fn use_wordpiece_decoder(tokenizer: &mut Tokenizer) {
    tokenizer.with_decoder(DecoderWrapper::WordPiece(WordPiece::default()));
}

/// Splits `len` content tokens into consecutive windows of at most `window` tokens.
fn window_ranges(len: usize, window: usize) -> Vec<Range<usize>> {
    let window = window.max(1);
    (0..len)
        .step_by(window)
        .map(|start| start..(start + window).min(len))
        .collect()
}

/// Picks the best label for each content token of one window. `rows` holds
/// the window's label probabilities with the `[CLS]`/`[SEP]` rows removed;
/// `ids` and `offsets` cover the whole input, so indices stay global.
fn window_predictions(
    text: &str,
    range: Range<usize>,
    ids: &[u32],
    offsets: &[(usize, usize)],
    rows: &[Vec<f32>],
    labels: &[String],
) -> Result<Vec<TokenPrediction>> {
    if rows.len() != range.len() {
        bail!("expected {} rows for window, got {}", range.len(), rows.len());
    }
    range
        .zip(rows)
        .map(|(pos, row)| {
            let (label, score) = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(label, score)| (label, *score))
                .ok_or_else(|| anyhow!("classifier produced no scores"))?;
            let label = labels
                .get(label)
                .ok_or_else(|| anyhow!("classifier label {label} has no name"))?;
            let (start, end) = offsets[pos];
            Ok(TokenPrediction {
                // position as if the whole input were one `[CLS] ... [SEP]` sequence
                index: pos + 1,
                id: ids[pos],
                label: label.clone(),
                score,
                start: aggregation::char_offset(text, start),
                end: aggregation::char_offset(text, end),
            })
        })
        .collect()
}

pub struct CandleTagger {
    model_id: String,
    device: Device,
    encoder: BertModel,
    classifier: Linear,
    tokenizer: Tokenizer,
    labels: Vec<String>,
    max_positions: usize,
    cls_id: u32,
    sep_id: u32,
}

impl CandleTagger {
    pub fn load(spec: &ModelSpec) -> Result<Self> {
        let device = Device::Cpu;
        let start = Instant::now();

        let repo = hub_repo(&spec.model_id)?;
        let config_path = fetch(&repo, &spec.model_id, "config.json")?;
        let raw_config = std::fs::read_to_string(&config_path)?;
        let bert_config: BertConfig = serde_json::from_str(&raw_config)
            .with_context(|| format!("invalid BERT config in `{}`", spec.model_id))?;
        let head_config: ClassifierConfig = serde_json::from_str(&raw_config)
            .with_context(|| format!("`{}` is not a token-classification model", spec.model_id))?;
        let labels = head_config.labels()?;

        let vb = match repo.get("model.safetensors") {
            Ok(weights) => unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)?
            },
            Err(_) => {
                let weights = fetch(&repo, &spec.model_id, "pytorch_model.bin")?;
                VarBuilder::from_pth(&weights, DType::F32, &device)?
            }
        };
        let encoder = BertModel::load(vb.clone(), &bert_config)?;
        let classifier = candle_nn::linear(head_config.hidden_size, labels.len(), vb.pp("classifier"))?;

        let mut tokenizer = load_tokenizer(spec.tokenizer_repo())?;
        use_wordpiece_decoder(&mut tokenizer);
        let cls_id = tokenizer
            .token_to_id("[CLS]")
            .ok_or_else(|| anyhow!("tokenizer for `{}` has no [CLS] token", spec.model_id))?;
        let sep_id = tokenizer
            .token_to_id("[SEP]")
            .ok_or_else(|| anyhow!("tokenizer for `{}` has no [SEP] token", spec.model_id))?;

        tracing::info!(
            model_id = %spec.model_id,
            labels = labels.len(),
            elapsed_s = start.elapsed().as_secs_f32(),
            "token classifier ready"
        );

        Ok(Self {
            model_id: spec.model_id.clone(),
            device,
            encoder,
            classifier,
            tokenizer,
            labels,
            max_positions: head_config.max_position_embeddings,
            cls_id,
            sep_id,
        })
    }

    /// Long inputs are classified in windows that fit the position limit.
    fn predict(&self, text: &str) -> Result<Vec<TokenPrediction>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow!("failed to tokenize input: {e}"))?;
        let ids = encoding.get_ids();
        let offsets = encoding.get_offsets();

        let windows = window_ranges(ids.len(), self.max_positions.saturating_sub(2));
        let mut tokens = Vec::with_capacity(ids.len());
        for range in &windows {
            let mut framed = Vec::with_capacity(range.len() + 2);
            framed.push(self.cls_id);
            framed.extend_from_slice(&ids[range.clone()]);
            framed.push(self.sep_id);

            let input_ids = Tensor::new(framed.as_slice(), &self.device)?.unsqueeze(0)?;
            let token_type_ids = input_ids.zeros_like()?;
            let hidden = self.encoder.forward(&input_ids, &token_type_ids)?;
            let logits = self.classifier.forward(&hidden)?.squeeze(0)?;
            let probs = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec2::<f32>()?;

            let rows = &probs[1..probs.len() - 1];
            tokens.extend(window_predictions(
                text,
                range.clone(),
                ids,
                offsets,
                rows,
                &self.labels,
            )?);
        }

        tracing::debug!(
            model_id = %self.model_id,
            tokens = ids.len(),
            windows = windows.len(),
            "classified input"
        );
        Ok(tokens)
    }
}

impl EntityTagger for CandleTagger {
    fn tag(&self, text: &str, strategy: AggregationStrategy) -> Result<Vec<Entity>> {
        let tokens = self.predict(text)?;
        aggregation::aggregate(&tokens, strategy, |ids| {
            self.tokenizer
                .decode(ids, true)
                .map_err(|e| anyhow!("failed to decode entity tokens: {e}"))
        })
    }
}

fn format_size(size: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let size_f = size as f64;
    if size_f > GB {
        format!("{:.2} GiB", size_f / GB)
    } else if size_f > MB {
        format!("{:.2} MiB", size_f / MB)
    } else if size_f > KB {
        format!("{:.2} KiB", size_f / KB)
    } else {
        format!("{size} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_user_turn_prompt() {
        let prompt = render_mistral_prompt(&[Message::user("hello")]);
        assert_eq!(prompt, "[INST] hello [/INST]");
    }

    #[test]
    fn system_message_folds_into_next_user_turn() {
        let prompt = render_mistral_prompt(&[
            Message {
                role: Role::System,
                content: "answer in Hebrew".to_string(),
            },
            Message::user("hi"),
            Message::assistant("shalom"),
            Message::user("again"),
        ]);
        assert_eq!(
            prompt,
            "[INST] answer in Hebrew\n\nhi [/INST]shalom</s>[INST] again [/INST]"
        );
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_value(Message::user("x")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "x"}));
    }

    #[test]
    fn labels_are_ordered_by_id() {
        let config: ClassifierConfig = serde_json::from_str(
            r#"{"hidden_size": 8, "max_position_embeddings": 512,
                "id2label": {"2": "I-PER", "0": "O", "1": "B-PER"}}"#,
        )
        .unwrap();
        assert_eq!(config.labels().unwrap(), ["O", "B-PER", "I-PER"]);
    }

    #[test]
    fn sparse_label_ids_are_rejected() {
        let config: ClassifierConfig = serde_json::from_str(
            r#"{"hidden_size": 8, "max_position_embeddings": 512,
                "id2label": {"0": "O", "5": "B-PER"}}"#,
        )
        .unwrap();
        assert!(config.labels().is_err());
    }

    #[test]
    fn reply_is_appended_untouched() {
        let conversation = with_reply(&[Message::user("hi")], "\n  shalom \n");
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[1].role, Role::Assistant);
        assert_eq!(conversation[1].content, "\n  shalom \n");
    }

    #[test]
    fn wordpiece_decoder_merges_continuations() {
        use tokenizers::models::wordpiece::WordPiece as WordPieceModel;

        let vocab: HashMap<String, u32> = [("[UNK]", 0), ("Ali", 1), ("##ce", 2)]
            .into_iter()
            .map(|(token, id)| (token.to_string(), id))
            .collect();
        let model = WordPieceModel::builder()
            .vocab(vocab)
            .unk_token("[UNK]".to_string())
            .build()
            .unwrap();
        let mut tokenizer = Tokenizer::new(model);

        assert_eq!(tokenizer.decode(&[1, 2], true).unwrap(), "Ali ##ce");
        use_wordpiece_decoder(&mut tokenizer);
        assert_eq!(tokenizer.decode(&[1, 2], true).unwrap(), "Alice");
    }

    #[test]
    fn windows_cover_every_token_once() {
        assert_eq!(window_ranges(5, 2), vec![0..2, 2..4, 4..5]);
        assert_eq!(window_ranges(510, 510), vec![0..510]);
        assert_eq!(window_ranges(1200, 510), vec![0..510, 510..1020, 1020..1200]);
        assert!(window_ranges(0, 510).is_empty());
        // a zero-sized window still makes progress
        assert_eq!(window_ranges(2, 0), vec![0..1, 1..2]);
    }

    #[test]
    fn window_predictions_keep_global_positions() {
        let text = "Alice met Acme";
        let ids = [10, 11, 12];
        let offsets = [(0, 5), (6, 9), (10, 14)];
        let labels = vec!["O".to_string(), "B-PER".to_string(), "B-ORG".to_string()];

        let mut tokens = Vec::new();
        for range in window_ranges(ids.len(), 2) {
            let rows: Vec<Vec<f32>> = range
                .clone()
                .map(|pos| match pos {
                    0 => vec![0.1, 0.8, 0.1],
                    1 => vec![0.9, 0.05, 0.05],
                    _ => vec![0.1, 0.1, 0.8],
                })
                .collect();
            tokens.extend(window_predictions(text, range, &ids, &offsets, &rows, &labels).unwrap());
        }

        let summary: Vec<(usize, u32, &str, usize, usize)> = tokens
            .iter()
            .map(|t| (t.index, t.id, t.label.as_str(), t.start, t.end))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, 10, "B-PER", 0, 5),
                (2, 11, "O", 6, 9),
                (3, 12, "B-ORG", 10, 14),
            ]
        );

        let entities = aggregation::aggregate(&tokens, AggregationStrategy::Simple, |ids| {
            Ok(format!("{ids:?}"))
        })
        .unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[1]["entity_group"], "ORG");
        assert_eq!(entities[1]["start"], 10);
    }

    #[test]
    fn window_predictions_reject_misaligned_rows() {
        let labels = vec!["O".to_string()];
        let result = window_predictions("ab", 0..2, &[1, 2], &[(0, 1), (1, 2)], &[vec![1.0]], &labels);
        assert!(result.is_err());
    }

    #[test]
    fn leading_tokens_are_cut_at_token_boundaries() {
        let content = "one two three";
        let offsets = [(0, 3), (4, 7), (8, 13)];
        assert_eq!(drop_leading_tokens(content, &offsets, 0), content);
        assert_eq!(drop_leading_tokens(content, &offsets, 2), "three");
        assert_eq!(drop_leading_tokens(content, &offsets, 3), "");

        // the instruction header is rendered around whatever survives
        let prompt = render_mistral_prompt(&[Message::user(drop_leading_tokens(content, &offsets, 1))]);
        assert_eq!(prompt, "[INST] two three [/INST]");
    }

    #[test]
    fn reply_budget_never_overflows() {
        assert_eq!(clamp_new_tokens(usize::MAX), qllama::MAX_SEQ_LEN - MIN_PROMPT_TOKENS);
        assert_eq!(clamp_new_tokens(256), 256);
        assert_eq!(prompt_budget(usize::MAX), 1);
        assert_eq!(prompt_budget(256), qllama::MAX_SEQ_LEN - 266);
        assert!(prompt_budget(clamp_new_tokens(usize::MAX)) >= MIN_PROMPT_TOKENS - 10);
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MiB");
    }
}

//! BiLSTM-CRF tagger: word encoder plus the CRF output layer, and its
//! on-disk layout.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Var};
use candle_nn::{VarBuilder, VarMap};
use crftag_core::{
    CRF_PREFIX, CrfTagger, EmissionFeatures, PotentialSnapshot, Tag, TagSpace, TrainingOutput,
    validate_checkpoint,
};
use tracing::info;

use crate::config::ModelConfig;
use crate::data::Vocabulary;
use crate::encoder::BiLstmEncoder;

pub const WEIGHTS_FILE: &str = "weights.safetensors";
pub const TAGS_FILE: &str = "tags.json";
pub const VOCAB_FILE: &str = "vocab.json";
pub const MODEL_CONFIG_FILE: &str = "model.json";

const ENCODER_PREFIX: &str = "encoder";

pub struct TaggerModel {
    varmap: VarMap,
    device: Device,
    config: ModelConfig,
    vocab: Vocabulary,
    encoder: BiLstmEncoder,
    crf: CrfTagger,
}

impl TaggerModel {
    /// Fresh, randomly initialized model.
    pub fn new(config: ModelConfig, vocab: Vocabulary, tags: TagSpace, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let encoder = BiLstmEncoder::new(
            vocab.len(),
            config.embed_dim,
            config.lstm_dim,
            vb.pp(ENCODER_PREFIX),
        )?;
        let crf = CrfTagger::new(tags, config.scorer(), vb)?;

        Ok(Self {
            varmap,
            device: device.clone(),
            config,
            vocab,
            encoder,
            crf,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn tags(&self) -> &TagSpace {
        self.crf.tags()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Trainable variables, for the optimizer.
    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn features(&self, words: &[u32]) -> Result<EmissionFeatures> {
        Ok(self.encoder.encode(words, &self.device)?)
    }

    /// CRF loss of the gold tags, attached to the graph.
    pub fn loss(&self, words: &[u32], gold: &[Tag], track_stats: bool) -> Result<TrainingOutput> {
        let features = self.features(words)?;
        Ok(self.crf.forward_loss(&features, gold, track_stats)?)
    }

    /// Potentials as plain numbers. Take one per evaluation pass.
    pub fn snapshot(&self) -> Result<PotentialSnapshot> {
        Ok(self.crf.potentials().snapshot()?)
    }

    pub fn predict_with(&self, snapshot: &PotentialSnapshot, words: &[u32]) -> Result<Vec<Tag>> {
        let features = self.features(words)?;
        Ok(self.crf.decode_with(snapshot, &features)?.tags)
    }

    /// Tag raw tokens, returning tag names.
    pub fn tag<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Vec<String>> {
        self.tag_with(&self.snapshot()?, tokens)
    }

    /// Like [`tag`](Self::tag), against a snapshot shared across many sentences.
    pub fn tag_with<S: AsRef<str>>(
        &self,
        snapshot: &PotentialSnapshot,
        tokens: &[S],
    ) -> Result<Vec<String>> {
        let tags = self.predict_with(snapshot, &self.vocab.encode(tokens))?;
        Ok(self
            .tags()
            .decode(&tags)?
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Write weights, tag space, vocabulary and shape to `dir`.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

        self.varmap
            .save(dir.join(WEIGHTS_FILE))
            .context("saving weights")?;
        fs::write(dir.join(TAGS_FILE), self.tags().to_json()?)?;
        fs::write(dir.join(VOCAB_FILE), self.vocab.to_json()?)?;
        fs::write(
            dir.join(MODEL_CONFIG_FILE),
            serde_json::to_string_pretty(&self.config)?,
        )?;

        info!(path = %dir.display(), "model saved");
        Ok(())
    }

    /// Rebuild a saved model. The weight file is checked against the tag
    /// space before any tensor is loaded.
    pub fn load<P: AsRef<Path>>(dir: P, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        let read = |name: &str| {
            fs::read_to_string(dir.join(name))
                .with_context(|| format!("reading {}", dir.join(name).display()))
        };

        let tags = TagSpace::from_json(&read(TAGS_FILE)?)?;
        let vocab = Vocabulary::from_json(&read(VOCAB_FILE)?)?;
        let config: ModelConfig =
            serde_json::from_str(&read(MODEL_CONFIG_FILE)?).context("parsing model config")?;

        let weights = dir.join(WEIGHTS_FILE);
        validate_checkpoint(&weights, CRF_PREFIX, tags.len())?;

        let mut model = Self::new(config, vocab, tags, device)?;
        model
            .varmap
            .load(&weights)
            .with_context(|| format!("loading {}", weights.display()))?;

        info!(path = %dir.display(), num_tags = model.tags().len(), "model loaded");
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sentence;
    use crftag_core::Score;

    fn small_model() -> TaggerModel {
        let sentences = vec![Sentence::new(
            vec!["the".into(), "cat".into(), "sat".into()],
            vec!["DT".into(), "NN".into(), "VB".into()],
        )];
        let vocab = Vocabulary::from_sentences(&sentences, 1);
        let tags = crate::data::build_tag_space(&sentences);
        let config = ModelConfig {
            embed_dim: 8,
            lstm_dim: 6,
            tag_dim: 4,
            scorer_dim: 8,
            ..ModelConfig::default()
        };
        TaggerModel::new(config, vocab, tags, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_tag_returns_known_names() {
        let model = small_model();
        let out = model.tag(&["the", "dog", "sat"]).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|t| model.tags().index_of(t).is_ok()));
    }

    #[test]
    fn test_shared_snapshot_matches_fresh() {
        let model = small_model();
        let snapshot = model.snapshot().unwrap();
        for tokens in [vec!["the", "cat"], vec!["sat", "the", "dog", "cat"]] {
            assert_eq!(
                model.tag_with(&snapshot, &tokens).unwrap(),
                model.tag(&tokens).unwrap()
            );
        }
    }

    #[test]
    fn test_loss_is_non_negative() {
        let model = small_model();
        let out = model.loss(&[1, 2, 3], &[0, 1, 2], true).unwrap();
        let loss = out.loss.value().unwrap();
        assert!(loss >= 0.0);
        assert_eq!(out.stats.unwrap().total(), 3);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let model = small_model();
        model.save(dir.path()).unwrap();

        let loaded = TaggerModel::load(dir.path(), &Device::Cpu).unwrap();
        assert_eq!(loaded.tags(), model.tags());
        assert_eq!(loaded.vocab(), model.vocab());
        assert_eq!(loaded.config(), model.config());

        let tokens = ["the", "cat", "sat"];
        assert_eq!(loaded.tag(&tokens).unwrap(), model.tag(&tokens).unwrap());
        assert_eq!(
            loaded.snapshot().unwrap().trans(),
            model.snapshot().unwrap().trans()
        );
    }

    #[test]
    fn test_load_rejects_mismatched_tag_space() {
        let dir = tempfile::tempdir().unwrap();
        small_model().save(dir.path()).unwrap();

        let other = TagSpace::from_names(["A", "B"]);
        fs::write(dir.path().join(TAGS_FILE), other.to_json().unwrap()).unwrap();
        assert!(TaggerModel::load(dir.path(), &Device::Cpu).is_err());
    }
}

//! Training loop for the BiLSTM-CRF tagger.

use std::fs;

use anyhow::{Result, bail};
use candle_core::{Device, Tensor, Var};
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW, SGD};
use crftag_core::Score;
use tracing::{info, warn};

use crate::config::{OptimizerKind, TrainConfig};
use crate::data::{EncodedSentence, Vocabulary, build_tag_space, encode_sentences, read_corpus};
use crate::eval::{Evaluation, TagScheme};
use crate::model::TaggerModel;

/// File the full training configuration is written to, next to the model.
pub const TRAIN_CONFIG_FILE: &str = "config.json";

enum Updater {
    Sgd(SGD),
    Adam(AdamW),
}

impl Updater {
    fn new(kind: OptimizerKind, vars: Vec<Var>, learning_rate: f64) -> candle_core::Result<Self> {
        Ok(match kind {
            OptimizerKind::Sgd => Self::Sgd(SGD::new(vars, learning_rate)?),
            OptimizerKind::Adam => Self::Adam(AdamW::new(
                vars,
                ParamsAdamW {
                    lr: learning_rate,
                    weight_decay: 0.0,
                    ..Default::default()
                },
            )?),
        })
    }

    fn backward_step(&mut self, loss: &Tensor) -> candle_core::Result<()> {
        match self {
            Self::Sgd(opt) => opt.backward_step(loss),
            Self::Adam(opt) => opt.backward_step(loss),
        }
    }
}

/// Summary of one epoch.
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: usize,
    pub mean_loss: f64,
    pub train_accuracy: f64,
    pub skipped: usize,
    pub dev: Option<Evaluation>,
}

pub struct Trainer {
    model: TaggerModel,
    updater: Updater,
    config: TrainConfig,
    rng: oorandom::Rand64,
}

impl Trainer {
    pub fn new(model: TaggerModel, config: TrainConfig) -> Result<Self> {
        config.validate()?;
        let updater = Updater::new(config.optimizer, model.vars(), config.learning_rate)?;
        let rng = oorandom::Rand64::new(config.seed as u128);
        Ok(Self {
            model,
            updater,
            config,
            rng,
        })
    }

    pub fn model(&self) -> &TaggerModel {
        &self.model
    }

    /// One pass over `data` in a fresh random order.
    ///
    /// A sentence whose loss cannot be computed is logged and skipped; the
    /// epoch carries on.
    pub fn train_epoch(&mut self, epoch: usize, data: &[EncodedSentence]) -> Result<EpochReport> {
        let mut order: Vec<usize> = (0..data.len()).collect();
        for i in (1..order.len()).rev() {
            let j = self.rng.rand_range(0..(i as u64 + 1)) as usize;
            order.swap(i, j);
        }

        let mut total_loss = 0.0;
        let mut steps = 0usize;
        let mut correct = 0usize;
        let mut total = 0usize;
        let mut skipped = 0usize;

        for (step, &idx) in order.iter().enumerate() {
            let sentence = &data[idx];
            let output = match self.model.loss(&sentence.words, &sentence.tags, true) {
                Ok(output) => output,
                Err(e) => {
                    warn!(sentence = idx, error = %e, "skipping sentence");
                    skipped += 1;
                    continue;
                }
            };

            total_loss += output.loss.value()?;
            steps += 1;
            if let Some(stats) = output.stats {
                correct += stats.correct;
                total += stats.total();
            }
            self.updater.backward_step(&output.loss)?;

            if self.config.log_interval > 0 && (step + 1) % self.config.log_interval == 0 {
                info!(
                    epoch,
                    step = step + 1,
                    of = data.len(),
                    loss = total_loss / steps as f64,
                    accuracy = ratio(correct, total),
                    "training"
                );
            }
        }

        Ok(EpochReport {
            epoch,
            mean_loss: if steps == 0 { 0.0 } else { total_loss / steps as f64 },
            train_accuracy: ratio(correct, total),
            skipped,
            dev: None,
        })
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Decode every sentence and score against its gold tags.
pub fn evaluate(model: &TaggerModel, data: &[EncodedSentence]) -> Result<Evaluation> {
    let tags = model.tags();
    let mut eval = Evaluation::new(TagScheme::detect(tags.names()));
    let snapshot = model.snapshot()?;
    for sentence in data {
        let predicted = model.predict_with(&snapshot, &sentence.words)?;
        eval.accumulate(&tags.decode(&sentence.tags)?, &tags.decode(&predicted)?);
    }
    Ok(eval)
}

/// Train end to end: read data, build the model, run the epochs, and save.
///
/// With a dev set the model is saved whenever the dev score improves;
/// without one it is saved after the last epoch.
pub fn run_training(config: TrainConfig) -> Result<Vec<EpochReport>> {
    config.validate()?;

    let train_sentences = read_corpus(&config.train)?;
    if train_sentences.is_empty() {
        bail!("no training sentences in {}", config.train.display());
    }
    let vocab = Vocabulary::from_sentences(&train_sentences, config.min_word_freq);
    let tags = build_tag_space(&train_sentences);
    info!(
        sentences = train_sentences.len(),
        words = vocab.len(),
        tags = tags.len(),
        "training data loaded"
    );

    let train = encode_sentences(&train_sentences, &vocab, &tags);
    let dev = match &config.dev {
        Some(path) => {
            let dev = encode_sentences(&read_corpus(path)?, &vocab, &tags);
            info!(sentences = dev.len(), "dev data loaded");
            Some(dev)
        }
        None => None,
    };

    let model = TaggerModel::new(config.model.clone(), vocab, tags, &Device::Cpu)?;
    let mut trainer = Trainer::new(model, config.clone())?;

    fs::create_dir_all(&config.output)?;
    fs::write(
        config.output.join(TRAIN_CONFIG_FILE),
        serde_json::to_string_pretty(&config)?,
    )?;

    let mut reports = Vec::with_capacity(config.epochs);
    let mut best = f64::NEG_INFINITY;
    for epoch in 1..=config.epochs {
        let mut report = trainer.train_epoch(epoch, &train)?;
        info!(
            epoch,
            loss = report.mean_loss,
            accuracy = report.train_accuracy,
            skipped = report.skipped,
            "epoch complete"
        );

        if let Some(dev) = &dev {
            let eval = evaluate(trainer.model(), dev)?;
            info!(epoch, "dev: {eval}");
            if eval.headline() > best {
                best = eval.headline();
                trainer.model().save(&config.output)?;
            }
            report.dev = Some(eval);
        }
        reports.push(report);
    }

    if dev.is_none() {
        trainer.model().save(&config.output)?;
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::data::Sentence;
    use std::path::Path;

    const CORPUS: &str = "\
the DT
cat NN
sat VB

a DT
dog NN
ran VB

the DT
dog NN
sat VB
";

    fn small_config(train: &Path, output: &Path) -> TrainConfig {
        let mut config = TrainConfig::new(train);
        config.output = output.to_path_buf();
        config.epochs = 30;
        config.learning_rate = 0.05;
        config.optimizer = OptimizerKind::Adam;
        config.model = ModelConfig {
            embed_dim: 8,
            lstm_dim: 8,
            tag_dim: 4,
            scorer_dim: 8,
            ..ModelConfig::default()
        };
        config
    }

    #[test]
    fn test_single_tag_loss_vanishes() {
        let sentences: Vec<Sentence> = (0..5)
            .map(|i| Sentence::new(vec![format!("w{i}"), "x".into()], vec!["X".into(); 2]))
            .collect();
        let vocab = Vocabulary::from_sentences(&sentences, 1);
        let tags = build_tag_space(&sentences);
        let data = encode_sentences(&sentences, &vocab, &tags);

        let dir = tempfile::tempdir().unwrap();
        let config = small_config(Path::new("unused"), dir.path());
        let model = TaggerModel::new(config.model.clone(), vocab, tags, &Device::Cpu).unwrap();
        let mut trainer = Trainer::new(model, config).unwrap();

        // One tag means one path: the partition function is the gold score.
        let report = trainer.train_epoch(1, &data).unwrap();
        assert!(report.mean_loss.abs() < 1e-4);
        assert_eq!(report.train_accuracy, 1.0);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn test_run_training_learns_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let train = dir.path().join("train.conll");
        fs::write(&train, CORPUS).unwrap();
        let output = dir.path().join("model");

        let mut config = small_config(&train, &output);
        config.dev = Some(train.clone());
        let reports = run_training(config).unwrap();

        assert_eq!(reports.len(), 30);
        assert!(reports.last().unwrap().mean_loss < reports[0].mean_loss);
        let best = reports
            .iter()
            .filter_map(|r| r.dev.as_ref())
            .map(Evaluation::accuracy)
            .fold(0.0, f64::max);
        assert_eq!(best, 1.0);

        assert!(output.join(TRAIN_CONFIG_FILE).exists());
        let model = TaggerModel::load(&output, &Device::Cpu).unwrap();
        assert_eq!(model.tag(&["a", "dog", "ran"]).unwrap(), vec!["DT", "NN", "VB"]);
    }

    #[test]
    fn test_empty_corpus_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let train = dir.path().join("empty.conll");
        fs::write(&train, "\n\n").unwrap();
        assert!(run_training(small_config(&train, dir.path())).is_err());
    }
}

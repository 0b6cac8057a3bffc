//! Training configuration, parsed from the command line and saved with the model.

use std::path::PathBuf;

use anyhow::{Result, ensure};
use clap::{Args, ValueEnum};
use crftag_core::{Activation, ScorerConfig};
use serde::{Deserialize, Serialize};

/// Which optimizer updates the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Sgd,
    Adam,
}

/// Network shape. Everything needed to rebuild the model before loading weights.
#[derive(Debug, Clone, PartialEq, Args, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Word embedding width
    #[arg(long, default_value_t = 64)]
    pub embed_dim: usize,

    /// Hidden width of each LSTM direction
    #[arg(long, default_value_t = 100)]
    pub lstm_dim: usize,

    /// Tag vector width
    #[arg(long, default_value_t = 20)]
    pub tag_dim: usize,

    /// Hidden width of the emission scorer
    #[arg(long, default_value_t = 100)]
    pub scorer_dim: usize,

    /// Scorer nonlinearity (tanh, relu, sigmoid)
    #[arg(long, default_value_t = Activation::Tanh)]
    pub activation: Activation,

    /// Dropout on the scorer hidden layer
    #[arg(long, default_value_t = 0.0)]
    pub dropout: f32,
}

impl ModelConfig {
    pub fn scorer(&self) -> ScorerConfig {
        ScorerConfig::bidirectional(self.lstm_dim, self.tag_dim, self.scorer_dim)
            .with_activation(self.activation)
            .with_dropout(self.dropout)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embed_dim: 64,
            lstm_dim: 100,
            tag_dim: 20,
            scorer_dim: 100,
            activation: Activation::Tanh,
            dropout: 0.0,
        }
    }
}

/// Everything the `train` binary needs.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Tagged training corpus
    #[arg(long)]
    pub train: PathBuf,

    /// Tagged development corpus, evaluated after every epoch
    #[arg(long)]
    pub dev: Option<PathBuf>,

    /// Output directory for the model
    #[arg(short, long, default_value = "models/crftag")]
    pub output: PathBuf,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 0.01)]
    pub learning_rate: f64,

    #[arg(long, value_enum, default_value_t = OptimizerKind::Sgd)]
    pub optimizer: OptimizerKind,

    /// Words seen fewer times map to `<unk>`
    #[arg(long, default_value_t = 1)]
    pub min_word_freq: usize,

    /// Shuffle seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Log running loss every N sentences
    #[arg(long, default_value_t = 1000)]
    pub log_interval: usize,

    #[command(flatten)]
    #[serde(flatten)]
    pub model: ModelConfig,
}

impl TrainConfig {
    /// Config with defaults for everything but the training file.
    pub fn new(train: impl Into<PathBuf>) -> Self {
        Self {
            train: train.into(),
            dev: None,
            output: PathBuf::from("models/crftag"),
            epochs: 10,
            learning_rate: 0.01,
            optimizer: OptimizerKind::Sgd,
            min_word_freq: 1,
            seed: 42,
            log_interval: 1000,
            model: ModelConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.epochs > 0, "epochs must be positive");
        ensure!(
            self.learning_rate.is_finite() && self.learning_rate > 0.0,
            "learning rate must be positive, got {}",
            self.learning_rate
        );
        ensure!(
            (0.0..1.0).contains(&self.model.dropout),
            "dropout must be in [0, 1), got {}",
            self.model.dropout
        );
        ensure!(
            self.model.embed_dim > 0 && self.model.lstm_dim > 0,
            "embedding and LSTM widths must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: TrainConfig,
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["train", "--train", "train.conll"]);
        assert_eq!(cli.config.train, PathBuf::from("train.conll"));
        assert_eq!(cli.config.epochs, 10);
        assert_eq!(cli.config.optimizer, OptimizerKind::Sgd);
        assert_eq!(cli.config.model, ModelConfig::default());
        cli.config.validate().unwrap();
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "train",
            "--train",
            "t.conll",
            "--optimizer",
            "adam",
            "--activation",
            "relu",
            "--lstm-dim",
            "32",
        ]);
        assert_eq!(cli.config.optimizer, OptimizerKind::Adam);
        assert_eq!(cli.config.model.activation, Activation::Relu);
        assert_eq!(cli.config.model.scorer().left_dim, 32);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TrainConfig::new("t.conll");
        config.learning_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = TrainConfig::new("t.conll");
        config.model.dropout = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_is_flat() {
        let config = TrainConfig::new("t.conll");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["lstm_dim"], 100);
        assert_eq!(json["activation"], "tanh");
        let back: TrainConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.model, config.model);
    }
}

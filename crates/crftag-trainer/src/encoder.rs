//! Word-level BiLSTM producing the two feature streams the CRF scores.

use candle_core::{Device, Tensor};
use candle_nn::rnn::{LSTM, LSTMConfig, RNN, lstm};
use candle_nn::{Embedding, Module, VarBuilder, embedding};
use crftag_core::{CrfError, EmissionFeatures, Result};

/// Embedding lookup followed by one LSTM per direction.
#[derive(Debug, Clone)]
pub struct BiLstmEncoder {
    embedding: Embedding,
    forward: LSTM,
    backward: LSTM,
}

impl BiLstmEncoder {
    pub fn new(vocab_size: usize, embed_dim: usize, lstm_dim: usize, vb: VarBuilder) -> Result<Self> {
        let embedding = embedding(vocab_size, embed_dim, vb.pp("embedding"))?;
        let forward = lstm(embed_dim, lstm_dim, LSTMConfig::default(), vb.pp("lstm_fwd"))?;
        let backward = lstm(embed_dim, lstm_dim, LSTMConfig::default(), vb.pp("lstm_bwd"))?;
        Ok(Self {
            embedding,
            forward,
            backward,
        })
    }

    /// Features for one sentence of word ids, both streams `[T, lstm_dim]`.
    pub fn encode(&self, words: &[u32], device: &Device) -> Result<EmissionFeatures> {
        let num_steps = words.len();
        if num_steps == 0 {
            return Err(CrfError::EmptySequence);
        }
        let ids = Tensor::new(words, device)?;
        // [1, T, E]
        let embedded = self.embedding.forward(&ids)?.unsqueeze(0)?;

        let left = run(&self.forward, &embedded)?;

        // The backward LSTM reads the sentence reversed; its outputs are
        // flipped back so row t still describes word t.
        let reversed: Vec<u32> = (0..num_steps as u32).rev().collect();
        let reversed = Tensor::new(reversed.as_slice(), device)?;
        let right = run(&self.backward, &embedded.index_select(&reversed, 1)?)?
            .index_select(&reversed, 0)?;

        EmissionFeatures::new(left, Some(right))
    }
}

fn run(layer: &LSTM, input: &Tensor) -> candle_core::Result<Tensor> {
    let states = layer.seq(input)?;
    layer.states_to_tensor(&states)?.squeeze(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    #[test]
    fn test_encode_shapes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = BiLstmEncoder::new(10, 6, 5, vb).unwrap();
        let features = encoder.encode(&[1, 4, 2], &Device::Cpu).unwrap();
        assert_eq!(features.num_steps(), 3);
        assert_eq!(features.left().dims(), &[3, 5]);
        assert_eq!(features.right().unwrap().dims(), &[3, 5]);
    }

    #[test]
    fn test_backward_stream_sees_right_context() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = BiLstmEncoder::new(10, 6, 5, vb).unwrap();
        let a = encoder.encode(&[1, 2, 3], &Device::Cpu).unwrap();
        let b = encoder.encode(&[1, 2, 7], &Device::Cpu).unwrap();

        // First word: left context identical, right context differs.
        let row = |t: &Tensor| t.get(0).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(row(a.left()), row(b.left()));
        assert_ne!(row(a.right().unwrap()), row(b.right().unwrap()));
    }
}

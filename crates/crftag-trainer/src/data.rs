//! Data loading for tagged training data.
//!
//! Files are CoNLL-style: one token per line with its tag in the last
//! column, a blank line between sentences, `#` lines ignored.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use crftag_core::{Tag, TagSpace};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single example: tokens and their tags, the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub tokens: Vec<String>,
    pub tags: Vec<String>,
}

impl Sentence {
    pub fn new(tokens: Vec<String>, tags: Vec<String>) -> Self {
        Self { tokens, tags }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Load a tagged corpus from disk.
pub fn read_corpus<P: AsRef<Path>>(path: P) -> Result<Vec<Sentence>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening corpus {}", path.display()))?;
    parse_corpus(BufReader::new(file), true)
        .with_context(|| format!("reading corpus {}", path.display()))
}

/// Load untagged text, one token per line (extra columns are ignored).
pub fn read_tokens<P: AsRef<Path>>(path: P) -> Result<Vec<Sentence>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening input {}", path.display()))?;
    parse_corpus(BufReader::new(file), false)
        .with_context(|| format!("reading input {}", path.display()))
}

/// Parse sentences from a reader.
///
/// With `tagged`, lines with fewer than two columns are skipped with a
/// warning. Without it, only the first column is kept and `tags` stay empty.
pub fn parse_corpus<R: BufRead>(reader: R, tagged: bool) -> Result<Vec<Sentence>> {
    let mut sentences = Vec::new();
    let mut tokens = Vec::new();
    let mut tags = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() {
            if !tokens.is_empty() {
                sentences.push(Sentence::new(
                    std::mem::take(&mut tokens),
                    std::mem::take(&mut tags),
                ));
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = if line.contains('\t') {
            line.split('\t').map(str::trim).collect()
        } else {
            line.split_whitespace().collect()
        };

        if tagged {
            match (fields.first(), fields.last()) {
                (Some(token), Some(tag)) if fields.len() >= 2 && !tag.is_empty() => {
                    tokens.push(token.to_string());
                    tags.push(tag.to_string());
                }
                _ => warn!(line = line_no + 1, "skipping line without a tag column"),
            }
        } else if let Some(token) = fields.first() {
            tokens.push(token.to_string());
        }
    }

    // Don't forget the last sentence
    if !tokens.is_empty() {
        sentences.push(Sentence::new(tokens, tags));
    }

    Ok(sentences)
}

/// Collect every tag seen in `sentences` (first-seen order) and freeze.
pub fn build_tag_space(sentences: &[Sentence]) -> TagSpace {
    let mut space = TagSpace::new();
    for tag in sentences.iter().flat_map(|s| s.tags.iter()) {
        // Cannot fail before freeze.
        let _ = space.insert(tag.as_str());
    }
    space.freeze();
    space
}

/// Word dictionary with a reserved unknown-word entry at index 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    words: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, u32>,
}

impl Vocabulary {
    /// Index of the unknown word.
    pub const UNK: u32 = 0;
    const UNK_WORD: &'static str = "<unk>";

    /// Keep words seen at least `min_freq` times, in first-seen order.
    pub fn from_sentences(sentences: &[Sentence], min_freq: usize) -> Self {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order = Vec::new();
        for token in sentences.iter().flat_map(|s| s.tokens.iter()) {
            let count = counts.entry(token.as_str()).or_insert_with(|| {
                order.push(token.as_str());
                0
            });
            *count += 1;
        }

        let mut words = vec![Self::UNK_WORD.to_string()];
        words.extend(
            order
                .into_iter()
                .filter(|w| counts[w] >= min_freq.max(1))
                .map(str::to_string),
        );
        Self::from_words(words)
    }

    fn from_words(words: Vec<String>) -> Self {
        let index = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u32))
            .collect();
        Self { words, index }
    }

    /// Number of entries, including the unknown word.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.len() <= 1
    }

    /// Id of `word`, or [`Self::UNK`].
    pub fn id(&self, word: &str) -> u32 {
        self.index.get(word).copied().unwrap_or(Self::UNK)
    }

    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<u32> {
        tokens.iter().map(|t| self.id(t.as_ref())).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let vocab: Vocabulary = serde_json::from_str(json).context("parsing vocabulary")?;
        Ok(Self::from_words(vocab.words))
    }
}

/// A sentence mapped to word ids and tag indices.
#[derive(Debug, Clone)]
pub struct EncodedSentence {
    pub tokens: Vec<String>,
    pub words: Vec<u32>,
    pub tags: Vec<Tag>,
}

/// Encode sentences, dropping (with a warning) any that use a tag outside `tags`.
pub fn encode_sentences(
    sentences: &[Sentence],
    vocab: &Vocabulary,
    tags: &TagSpace,
) -> Vec<EncodedSentence> {
    sentences
        .iter()
        .enumerate()
        .filter_map(|(i, s)| match tags.encode(&s.tags) {
            Ok(gold) => Some(EncodedSentence {
                tokens: s.tokens.clone(),
                words: vocab.encode(&s.tokens),
                tags: gold,
            }),
            Err(e) => {
                warn!(sentence = i, error = %e, "skipping sentence");
                None
            }
        })
        .collect()
}

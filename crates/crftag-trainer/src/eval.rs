//! Tagging quality: token accuracy, plus chunk precision/recall/F1 when the
//! tag set is a chunking scheme (BIO, BIOES, BMES).

use std::collections::HashSet;
use std::fmt;
use std::iter::zip;

/// How tags group into spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagScheme {
    /// Every tag stands alone (e.g. part-of-speech); only accuracy is reported.
    Plain,
    /// `B`/`I`/`E`/`S`/`M` prefixes with optional `-LABEL`, plus `O`.
    Chunked,
}

impl TagScheme {
    /// Chunked if every tag is `O` or a single prefix letter with an optional label.
    pub fn detect<S: AsRef<str>>(names: &[S]) -> Self {
        let mut has_begin = false;
        for name in names {
            let name = name.as_ref();
            if name == "O" {
                continue;
            }
            match split_tag(name) {
                Some((prefix, _)) => has_begin |= matches!(prefix, 'B' | 'S'),
                None => return Self::Plain,
            }
        }
        if has_begin { Self::Chunked } else { Self::Plain }
    }
}

/// `"B-PER"` -> `('B', "PER")`, `"M"` -> `('M', "")`.
fn split_tag(tag: &str) -> Option<(char, &str)> {
    let mut chars = tag.chars();
    let prefix = chars.next()?;
    if !matches!(prefix, 'B' | 'I' | 'E' | 'S' | 'M') {
        return None;
    }
    match chars.as_str() {
        "" => Some((prefix, "")),
        rest => rest.strip_prefix('-').map(|label| (prefix, label)),
    }
}

/// A labelled span `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub start: usize,
    pub end: usize,
    pub label: String,
}

/// Extract spans. Ill-formed continuations (an `I` after `O`, a label
/// change) open a new chunk rather than being dropped.
pub fn chunks<S: AsRef<str>>(tags: &[S]) -> Vec<Chunk> {
    let mut out = Vec::new();
    let mut open: Option<(usize, &str)> = None;

    for (i, tag) in tags.iter().enumerate() {
        let Some((prefix, label)) = split_tag(tag.as_ref()) else {
            close(&mut open, i, &mut out);
            continue;
        };
        let continues = matches!(open, Some((_, l)) if l == label);
        match prefix {
            'B' => {
                close(&mut open, i, &mut out);
                open = Some((i, label));
            }
            'S' => {
                close(&mut open, i, &mut out);
                open = Some((i, label));
                close(&mut open, i + 1, &mut out);
            }
            'E' => {
                if !continues {
                    close(&mut open, i, &mut out);
                    open = Some((i, label));
                }
                close(&mut open, i + 1, &mut out);
            }
            // I / M
            _ => {
                if !continues {
                    close(&mut open, i, &mut out);
                    open = Some((i, label));
                }
            }
        }
    }
    close(&mut open, tags.len(), &mut out);
    out
}

fn close(open: &mut Option<(usize, &str)>, end: usize, out: &mut Vec<Chunk>) {
    if let Some((start, label)) = open.take() {
        out.push(Chunk {
            start,
            end,
            label: label.to_string(),
        });
    }
}

/// Running evaluation over many sentences.
#[derive(Debug, Clone)]
pub struct Evaluation {
    scheme: TagScheme,
    correct_tokens: usize,
    total_tokens: usize,
    correct_sentences: usize,
    total_sentences: usize,
    gold_chunks: usize,
    predicted_chunks: usize,
    matched_chunks: usize,
}

impl Evaluation {
    pub fn new(scheme: TagScheme) -> Self {
        Self {
            scheme,
            correct_tokens: 0,
            total_tokens: 0,
            correct_sentences: 0,
            total_sentences: 0,
            gold_chunks: 0,
            predicted_chunks: 0,
            matched_chunks: 0,
        }
    }

    /// Add one sentence. Extra positions in the longer sequence are ignored.
    pub fn accumulate<G: AsRef<str>, P: AsRef<str>>(&mut self, gold: &[G], predicted: &[P]) {
        let matched = zip(gold, predicted)
            .filter(|(g, p)| g.as_ref() == p.as_ref())
            .count();
        self.correct_tokens += matched;
        self.total_tokens += gold.len();
        if matched == gold.len() && gold.len() == predicted.len() {
            self.correct_sentences += 1;
        }
        self.total_sentences += 1;

        if self.scheme == TagScheme::Chunked {
            let gold: HashSet<Chunk> = chunks(gold).into_iter().collect();
            let predicted = chunks(predicted);
            self.gold_chunks += gold.len();
            self.predicted_chunks += predicted.len();
            self.matched_chunks += predicted.iter().filter(|c| gold.contains(c)).count();
        }
    }

    pub fn scheme(&self) -> TagScheme {
        self.scheme
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct_tokens, self.total_tokens)
    }

    pub fn sentence_accuracy(&self) -> f64 {
        ratio(self.correct_sentences, self.total_sentences)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.matched_chunks, self.predicted_chunks)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.matched_chunks, self.gold_chunks)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 }
    }

    /// The number dev evaluation maximizes: F1 for chunked tags, accuracy otherwise.
    pub fn headline(&self) -> f64 {
        match self.scheme {
            TagScheme::Chunked => self.f1(),
            TagScheme::Plain => self.accuracy(),
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accuracy {:.2}% ({}/{}), sentences {:.2}%",
            self.accuracy() * 100.0,
            self.correct_tokens,
            self.total_tokens,
            self.sentence_accuracy() * 100.0
        )?;
        if self.scheme == TagScheme::Chunked {
            write!(
                f,
                ", chunks P {:.2}% R {:.2}% F1 {:.2}",
                self.precision() * 100.0,
                self.recall() * 100.0,
                self.f1() * 100.0
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(tags: &[&str]) -> Vec<(usize, usize, String)> {
        chunks(tags)
            .into_iter()
            .map(|c| (c.start, c.end, c.label))
            .collect()
    }

    #[test]
    fn test_detect_scheme() {
        assert_eq!(TagScheme::detect(&["O", "B-PER", "I-PER"]), TagScheme::Chunked);
        assert_eq!(TagScheme::detect(&["B", "M", "E", "S"]), TagScheme::Chunked);
        assert_eq!(TagScheme::detect(&["NN", "VB", "IN"]), TagScheme::Plain);
        assert_eq!(TagScheme::detect(&["O"]), TagScheme::Plain);
    }

    #[test]
    fn test_bio_chunks() {
        let tags = ["B-PER", "I-PER", "O", "B-LOC", "B-LOC", "I-ORG"];
        assert_eq!(
            spans(&tags),
            vec![
                (0, 2, "PER".into()),
                (3, 4, "LOC".into()),
                (4, 5, "LOC".into()),
                (5, 6, "ORG".into()),
            ]
        );
    }

    #[test]
    fn test_bioes_and_bmes_chunks() {
        let tags = ["S-PER", "B-LOC", "I-LOC", "E-LOC", "O"];
        assert_eq!(spans(&tags), vec![(0, 1, "PER".into()), (1, 4, "LOC".into())]);

        let words = ["B", "M", "E", "S", "B", "E"];
        assert_eq!(
            spans(&words),
            vec![(0, 3, String::new()), (3, 4, String::new()), (4, 6, String::new())]
        );
    }

    #[test]
    fn test_evaluation_scores() {
        let mut eval = Evaluation::new(TagScheme::Chunked);
        eval.accumulate(&["B-PER", "I-PER", "O"], &["B-PER", "I-PER", "O"]);
        eval.accumulate(&["B-LOC", "O", "B-PER"], &["B-LOC", "B-PER", "O"]);

        assert!((eval.accuracy() - 4.0 / 6.0).abs() < 1e-12);
        assert!((eval.sentence_accuracy() - 0.5).abs() < 1e-12);
        // gold: PER, LOC, PER; predicted: PER, LOC, PER(wrong span)
        assert!((eval.precision() - 2.0 / 3.0).abs() < 1e-12);
        assert!((eval.recall() - 2.0 / 3.0).abs() < 1e-12);
        assert!((eval.headline() - 2.0 / 3.0).abs() < 1e-12);
        assert!(eval.to_string().contains("F1"));
    }

    #[test]
    fn test_plain_headline_is_accuracy() {
        let mut eval = Evaluation::new(TagScheme::Plain);
        eval.accumulate(&["NN", "VB"], &["NN", "NN"]);
        assert_eq!(eval.headline(), 0.5);
        assert!(!eval.to_string().contains("F1"));
    }
}

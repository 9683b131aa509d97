//! Gold-standard segmentations and prediction scoring.
//!
//! Both the gold file and the prediction file are target format, spaced or
//! compact, one segmented word per line. Scoring works on boundary sets:
//! word-level exact match plus boundary precision/recall/F1 summed over
//! every word that has a gold entry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use tracing::debug;

use crate::target::{decode_target_line, render_compact, sample_lines};

const FALSE_PREFIXES: &[&str] = &["un!", "re!", "dis!"];
const FALSE_SUFFIXES: &[&str] = &[
    "!ed", "!ing", "!ness", "!ful", "!less", "!ly", "!ment", "!ish", "!en", "!er", "!est", "!s",
];

/// Surface word → gold boundary set.
#[derive(Debug, Default, Clone)]
pub struct GoldReference {
    entries: HashMap<String, BTreeSet<usize>>,
}

impl GoldReference {
    /// Parse a gold file. Later lines for the same surface word win.
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in sample_lines(text) {
            let (word, boundaries) = decode_target_line(line);
            if word.is_empty() {
                continue;
            }
            entries.insert(word, boundaries);
        }
        debug!(entries = entries.len(), "parsed gold reference");
        Self { entries }
    }

    pub fn boundaries(&self, word: &str) -> Option<&BTreeSet<usize>> {
        self.entries.get(word)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.entries.contains_key(word)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of comparing one predicted segmentation with gold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorClass {
    Correct,
    /// A common prefix split off a monomorphemic word.
    FalsePrefix,
    /// A common suffix split off a monomorphemic word.
    FalseSuffix,
    SpuriousBoundary,
    MissedBoundary,
    WrongPosition,
    Other,
    NoGold,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::FalsePrefix => "false_prefix",
            Self::FalseSuffix => "false_suffix",
            Self::SpuriousBoundary => "spurious_boundary",
            Self::MissedBoundary => "missed_boundary",
            Self::WrongPosition => "wrong_position",
            Self::Other => "other",
            Self::NoGold => "no_gold",
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Correct | Self::NoGold)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a predicted boundary set against gold for one word.
pub fn classify(word: &str, predicted: &BTreeSet<usize>, gold: &BTreeSet<usize>) -> ErrorClass {
    if predicted == gold {
        return ErrorClass::Correct;
    }

    if gold.is_empty() {
        let rendered = render_compact(word, predicted);
        if FALSE_PREFIXES.iter().any(|p| rendered.starts_with(p)) {
            return ErrorClass::FalsePrefix;
        }
        if FALSE_SUFFIXES.iter().any(|s| rendered.ends_with(s)) {
            return ErrorClass::FalseSuffix;
        }
        return ErrorClass::SpuriousBoundary;
    }
    if predicted.is_empty() {
        return ErrorClass::MissedBoundary;
    }

    let spurious = predicted.difference(gold).next().is_some();
    let missed = gold.difference(predicted).next().is_some();
    match (spurious, missed) {
        (true, true) => ErrorClass::WrongPosition,
        (true, false) => ErrorClass::SpuriousBoundary,
        (false, true) => ErrorClass::MissedBoundary,
        (false, false) => ErrorClass::Other,
    }
}

/// Per-word scoring row.
#[derive(Debug, Clone)]
pub struct WordScore {
    pub word: String,
    /// Compact gold form, if the word has a gold entry.
    pub gold: Option<String>,
    /// Compact predicted form.
    pub predicted: String,
    pub class: ErrorClass,
}

/// Aggregate scoring of a prediction file against a gold reference.
#[derive(Debug, Clone, Default)]
pub struct ScoreReport {
    pub words: Vec<WordScore>,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// Gold words that never appear in the predictions.
    pub gold_not_predicted: usize,
}

impl ScoreReport {
    /// Words with a gold entry.
    pub fn scored(&self) -> usize {
        self.words.iter().filter(|w| w.class != ErrorClass::NoGold).count()
    }

    pub fn correct(&self) -> usize {
        self.words.iter().filter(|w| w.class == ErrorClass::Correct).count()
    }

    pub fn no_gold(&self) -> usize {
        self.words.iter().filter(|w| w.class == ErrorClass::NoGold).count()
    }

    pub fn word_accuracy(&self) -> f64 {
        self.correct() as f64 / self.scored().max(1) as f64
    }

    pub fn precision(&self) -> f64 {
        self.true_positives as f64 / (self.true_positives + self.false_positives).max(1) as f64
    }

    pub fn recall(&self) -> f64 {
        self.true_positives as f64 / (self.true_positives + self.false_negatives).max(1) as f64
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        2.0 * p * r / (p + r).max(1e-9)
    }

    /// Error classes with counts, most frequent first.
    pub fn error_breakdown(&self) -> Vec<(ErrorClass, usize)> {
        let mut counts: BTreeMap<ErrorClass, usize> = BTreeMap::new();
        for w in self.words.iter().filter(|w| w.class.is_error()) {
            *counts.entry(w.class).or_default() += 1;
        }
        let mut out: Vec<_> = counts.into_iter().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        out
    }
}

/// Score a prediction file against a gold reference. Words are reported in
/// sorted order; duplicate predictions keep the last line.
pub fn score_predictions(predictions: &str, gold: &GoldReference) -> ScoreReport {
    let predicted: BTreeMap<String, BTreeSet<usize>> = sample_lines(predictions)
        .map(decode_target_line)
        .filter(|(word, _)| !word.is_empty())
        .collect();

    let mut report = ScoreReport::default();
    for (word, pred) in &predicted {
        let predicted_form = render_compact(word, pred);
        let Some(gold_set) = gold.boundaries(word) else {
            report.words.push(WordScore {
                word: word.clone(),
                gold: None,
                predicted: predicted_form,
                class: ErrorClass::NoGold,
            });
            continue;
        };

        report.true_positives += pred.intersection(gold_set).count();
        report.false_positives += pred.difference(gold_set).count();
        report.false_negatives += gold_set.difference(pred).count();
        report.words.push(WordScore {
            word: word.clone(),
            gold: Some(render_compact(word, gold_set)),
            predicted: predicted_form,
            class: classify(word, pred, gold_set),
        });
    }

    report.gold_not_predicted = gold
        .entries
        .keys()
        .filter(|w| !predicted.contains_key(*w))
        .count();
    report
}

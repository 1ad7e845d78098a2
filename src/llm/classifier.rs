//! Prompt complexity classification.
//!
//! Maps a prompt to a [`ComplexityTier`] using curated multilingual signal
//! lists (English, Spanish, French, German, Portuguese). Pure and
//! deterministic: no I/O, no randomness, one pass of a shared Aho-Corasick
//! automaton over the lowercased prompt.
//!
//! When signals from several tiers match, the stronger classification wins
//! in the order Complex > Simple > Medium, so an ambiguous prompt is never
//! routed to a weaker model than it might need.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};

/// Classification bucket driving model choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    /// Short imperative requests -> cheapest model
    Simple,
    /// Anything without clear signals, or scheduling-style requests
    Medium,
    /// Analysis, optimization, multi-step reasoning -> strongest allowed model
    Complex,
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Medium => write!(f, "medium"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

/// Result of classifying a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complexity {
    pub tier: ComplexityTier,
    /// In `0.5..=0.95`.
    pub confidence: f32,
    /// Patterns (or synthetic signals such as `long_prompt`) that decided the tier.
    pub matched_signals: Vec<String>,
}

/// Tunables for the classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Prompts at least this many characters long carry an extra complex signal.
    pub complex_min_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            complex_min_chars: 600,
        }
    }
}

const BASE_CONFIDENCE: f32 = 0.5;
const MAX_CONFIDENCE: f32 = 0.95;
const CONFIDENCE_PER_WEIGHT: f32 = 0.15;
const CONFLICT_PENALTY: f32 = 0.05;
const LONG_PROMPT_SIGNAL: &str = "long_prompt";

// Patterns match at the start of a word, so stems ("analy", "optimi")
// cover inflections across languages.
const COMPLEX_SIGNALS: &[(&str, f32)] = &[
    ("analy", 1.5),
    ("analiz", 1.5),
    ("anális", 1.5),
    ("analis", 1.5),
    ("trend", 1.0),
    ("tendenc", 1.0),
    ("tendanc", 1.0),
    ("productivity", 1.0),
    ("productividad", 1.0),
    ("productivité", 1.0),
    ("produktivität", 1.0),
    ("produtividade", 1.0),
    ("optimi", 1.5),
    ("otimiz", 1.5),
    ("compare", 1.0),
    ("compar", 0.5),
    ("vergleich", 1.0),
    ("over the last", 1.0),
    ("during the past", 1.0),
    ("en el último", 1.0),
    ("au cours des", 1.0),
    ("in den letzten", 1.0),
    ("nos últimos", 1.0),
    ("prioritiz", 1.0),
    ("prioritis", 1.0),
    ("prioriz", 1.0),
    ("plan my week", 1.5),
    ("plan my month", 1.5),
    ("planifica mi semana", 1.5),
    ("planifie ma semaine", 1.5),
    ("plane meine woche", 1.5),
    ("insight", 1.0),
    ("pattern", 1.0),
    ("recommend", 1.0),
    ("recomend", 1.0),
    ("why do i", 1.0),
    ("por qué", 0.5),
    ("pourquoi", 0.5),
    ("warum", 0.5),
    ("break down", 1.0),
    ("step by step", 1.0),
    ("work-life balance", 1.0),
];

const SIMPLE_SIGNALS: &[(&str, f32)] = &[
    ("create task", 1.5),
    ("create a task", 1.5),
    ("add task", 1.5),
    ("add a task", 1.5),
    ("new task", 1.5),
    ("remind me", 1.5),
    ("mark as done", 1.5),
    ("mark done", 1.5),
    ("delete task", 1.5),
    ("buy", 1.0),
    ("call", 0.5),
    ("crear tarea", 1.5),
    ("crea una tarea", 1.5),
    ("nueva tarea", 1.5),
    ("recuérdame", 1.5),
    ("comprar", 1.0),
    ("créer une tâche", 1.5),
    ("ajouter une tâche", 1.5),
    ("nouvelle tâche", 1.5),
    ("rappelle-moi", 1.5),
    ("acheter", 1.0),
    ("aufgabe erstellen", 1.5),
    ("neue aufgabe", 1.5),
    ("erinnere mich", 1.5),
    ("kaufen", 1.0),
    ("criar tarefa", 1.5),
    ("nova tarefa", 1.5),
    ("lembre-me", 1.5),
];

const MEDIUM_SIGNALS: &[(&str, f32)] = &[
    ("schedule", 1.0),
    ("reschedule", 1.0),
    ("meeting", 1.0),
    ("tomorrow", 0.5),
    ("next week", 0.5),
    ("recurring", 1.0),
    ("every week", 1.0),
    ("deadline", 1.0),
    ("move my", 1.0),
    ("reunión", 1.0),
    ("mañana", 0.5),
    ("próxima semana", 0.5),
    ("réunion", 1.0),
    ("demain", 0.5),
    ("semaine prochaine", 0.5),
    ("besprechung", 1.0),
    ("termin", 1.0),
    ("morgen", 0.5),
    ("nächste woche", 0.5),
    ("reunião", 1.0),
    ("amanhã", 0.5),
];

struct SignalTable {
    automaton: AhoCorasick,
    /// Parallel to the automaton's pattern ids.
    entries: Vec<(ComplexityTier, &'static str, f32)>,
}

static SIGNALS: LazyLock<SignalTable> = LazyLock::new(|| {
    let mut entries = Vec::new();
    for (tier, list) in [
        (ComplexityTier::Complex, COMPLEX_SIGNALS),
        (ComplexityTier::Simple, SIMPLE_SIGNALS),
        (ComplexityTier::Medium, MEDIUM_SIGNALS),
    ] {
        for (pattern, weight) in list {
            entries.push((tier, *pattern, *weight));
        }
    }
    let automaton = AhoCorasick::new(entries.iter().map(|(_, p, _)| *p))
        .expect("static classifier patterns are valid");
    SignalTable { automaton, entries }
});

/// Complexity classifier.
#[derive(Debug, Clone, Default)]
pub struct ComplexityClassifier {
    config: ClassifierConfig,
}

impl ComplexityClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify a prompt. Identical input always yields identical output.
    pub fn classify(&self, prompt: &str) -> Complexity {
        let normalized = normalize(prompt);
        if normalized.is_empty() {
            return Complexity {
                tier: ComplexityTier::Medium,
                confidence: BASE_CONFIDENCE,
                matched_signals: Vec::new(),
            };
        }

        let table = &*SIGNALS;
        let mut matched: BTreeSet<usize> = BTreeSet::new();
        for m in table.automaton.find_overlapping_iter(&normalized) {
            if at_word_start(&normalized, m.start()) {
                matched.insert(m.pattern().as_usize());
            }
        }

        let mut complex = TierScore::default();
        let mut simple = TierScore::default();
        let mut medium = TierScore::default();
        for idx in matched {
            let (tier, pattern, weight) = table.entries[idx];
            let score = match tier {
                ComplexityTier::Complex => &mut complex,
                ComplexityTier::Simple => &mut simple,
                ComplexityTier::Medium => &mut medium,
            };
            score.add(pattern, weight);
        }

        if normalized.chars().count() >= self.config.complex_min_chars {
            complex.add(LONG_PROMPT_SIGNAL, 1.0);
        }

        let (tier, winner, competing) = if !complex.is_empty() {
            (ComplexityTier::Complex, complex, simple.count() + medium.count())
        } else if !simple.is_empty() {
            (ComplexityTier::Simple, simple, medium.count())
        } else if !medium.is_empty() {
            (ComplexityTier::Medium, medium, 0)
        } else {
            return Complexity {
                tier: ComplexityTier::Medium,
                confidence: BASE_CONFIDENCE,
                matched_signals: Vec::new(),
            };
        };

        let raw = BASE_CONFIDENCE + CONFIDENCE_PER_WEIGHT * winner.weight
            - CONFLICT_PENALTY * competing as f32;
        let confidence = raw.clamp(BASE_CONFIDENCE, MAX_CONFIDENCE);

        tracing::trace!(
            %tier,
            confidence,
            signals = ?winner.signals,
            "classified prompt"
        );

        Complexity {
            tier,
            confidence,
            matched_signals: winner.signals,
        }
    }
}

/// Classify with the default configuration.
pub fn classify(prompt: &str) -> Complexity {
    ComplexityClassifier::default().classify(prompt)
}

#[derive(Default)]
struct TierScore {
    weight: f32,
    signals: Vec<String>,
}

impl TierScore {
    fn add(&mut self, pattern: &str, weight: f32) {
        self.weight += weight;
        self.signals.push(pattern.to_string());
    }

    fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    fn count(&self) -> usize {
        self.signals.len()
    }
}

/// Lowercase and collapse whitespace runs.
fn normalize(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn at_word_start(text: &str, byte_pos: usize) -> bool {
    text[..byte_pos]
        .chars()
        .next_back()
        .is_none_or(|c| !c.is_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prompt_is_medium_with_base_confidence() {
        let c = classify("");
        assert_eq!(c.tier, ComplexityTier::Medium);
        assert_eq!(c.confidence, 0.5);
        assert!(c.matched_signals.is_empty());

        assert_eq!(classify("   \n\t ").tier, ComplexityTier::Medium);
    }

    #[test]
    fn create_task_is_simple() {
        let c = classify("create task buy milk");
        assert_eq!(c.tier, ComplexityTier::Simple);
        assert!(c.matched_signals.contains(&"create task".to_string()));
        assert!(c.matched_signals.contains(&"buy".to_string()));
    }

    #[test]
    fn productivity_analysis_is_complex() {
        let c = classify("analyze my productivity trends over the last month");
        assert_eq!(c.tier, ComplexityTier::Complex);
        assert!(c.confidence > 0.9);
        assert!(c.confidence <= 0.95);
    }

    #[test]
    fn scheduling_request_is_medium() {
        let c = classify("Move my dentist meeting to tomorrow afternoon");
        assert_eq!(c.tier, ComplexityTier::Medium);
        assert!(!c.matched_signals.is_empty());
    }

    #[test]
    fn complex_beats_simple_when_both_match() {
        let c = classify("create task: analyze why my morning routine fails");
        assert_eq!(c.tier, ComplexityTier::Complex);
        assert!(c.matched_signals.iter().any(|s| s == "analy"));
        // Competing simple signals lower confidence but never below the floor.
        assert!(c.confidence >= 0.5);
    }

    #[test]
    fn simple_beats_medium_when_both_match() {
        let c = classify("remind me about the meeting tomorrow");
        assert_eq!(c.tier, ComplexityTier::Simple);
    }

    #[test]
    fn unmatched_prompt_defaults_to_medium() {
        let c = classify("what's up with the weather");
        assert_eq!(c.tier, ComplexityTier::Medium);
        assert_eq!(c.confidence, 0.5);
    }

    #[test]
    fn multilingual_signals_match() {
        assert_eq!(classify("crear tarea comprar pan").tier, ComplexityTier::Simple);
        assert_eq!(
            classify("analiza mi productividad en el último mes").tier,
            ComplexityTier::Complex
        );
        assert_eq!(
            classify("créer une tâche acheter du lait").tier,
            ComplexityTier::Simple
        );
        assert_eq!(
            classify("Besprechung auf nächste Woche verschieben").tier,
            ComplexityTier::Medium
        );
    }

    #[test]
    fn patterns_only_match_at_word_start() {
        // "buy" inside "rebuy" and "call" inside "recall" must not fire.
        let c = classify("rebuy recall");
        assert_eq!(c.tier, ComplexityTier::Medium);
        assert!(c.matched_signals.is_empty());
    }

    #[test]
    fn long_prompt_adds_complex_signal() {
        let long = "please look at this ".repeat(40);
        let c = classify(&long);
        assert_eq!(c.tier, ComplexityTier::Complex);
        assert_eq!(c.matched_signals, vec![LONG_PROMPT_SIGNAL.to_string()]);
    }

    #[test]
    fn confidence_is_capped() {
        let c = classify(
            "analyze and optimize my productivity trends, compare patterns, \
             recommend insights over the last quarter step by step",
        );
        assert_eq!(c.tier, ComplexityTier::Complex);
        assert_eq!(c.confidence, 0.95);
    }

    #[test]
    fn classification_is_deterministic() {
        let prompts = [
            "",
            "create task buy milk",
            "analyze my productivity trends over the last month",
            "reschedule standup",
            "¿por qué llego tarde?",
        ];
        for p in prompts {
            assert_eq!(classify(p), classify(p), "prompt: {p:?}");
        }
    }

    #[test]
    fn whitespace_is_collapsed_before_matching() {
        assert_eq!(
            classify("create    task\nbuy eggs").tier,
            ComplexityTier::Simple
        );
    }
}

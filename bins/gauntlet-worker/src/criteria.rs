// Criteria scorer: maps AI analysis metrics onto a challenge's weighted criteria
use crate::analysis::AiAnalysis;
use crate::evaluator::round_score;
use gauntlet_common::types::Criterion;

/// Which signal a criterion is scored from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    CodeQuality,
    Efficiency,
    BestPractices,
    /// The objective test score
    Objective,
    /// No matching metric, scored with the neutral default
    Neutral,
}

// Checked in order; "best practices" must win over "code quality" for names like
// "Clean code best practices".
const KEYWORDS: &[(Signal, &[&str])] = &[
    (
        Signal::BestPractices,
        &["bestpractice", "practice", "style", "convention", "idiom"],
    ),
    (
        Signal::CodeQuality,
        &["quality", "readab", "clean", "maintainab"],
    ),
    (
        Signal::Efficiency,
        &["efficien", "perform", "complexity", "optimi"],
    ),
    (
        Signal::Objective,
        &["correct", "function", "test", "accura"],
    ),
];

fn normalized(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Pick the signal for a criterion from its name, then its id
pub fn signal_for(criterion: &Criterion) -> Signal {
    for text in [&criterion.name, &criterion.criteria_id] {
        let text = normalized(text);
        for (signal, words) in KEYWORDS {
            if words.iter().any(|w| text.contains(w)) {
                return *signal;
            }
        }
    }
    Signal::Neutral
}

fn signal_value(signal: Signal, objective_score: f64, analysis: &AiAnalysis, neutral: f64) -> f64 {
    let value = match signal {
        Signal::CodeQuality => analysis.code_quality,
        Signal::Efficiency => analysis.efficiency,
        Signal::BestPractices => analysis.best_practices,
        Signal::Objective => objective_score,
        Signal::Neutral => neutral,
    };
    value.clamp(0.0, 100.0)
}

/// qualitative = sum(weight * signal) / sum(weight), on a 0-100 scale
pub fn score_qualitative(
    criteria: &[Criterion],
    objective_score: f64,
    analysis: &AiAnalysis,
    neutral: f64,
) -> f64 {
    let total_weight: f64 = criteria.iter().map(|c| c.weight).sum();
    if total_weight <= 0.0 {
        return round_score(neutral.clamp(0.0, 100.0));
    }

    let weighted: f64 = criteria
        .iter()
        .map(|c| c.weight * signal_value(signal_for(c), objective_score, analysis, neutral))
        .sum();

    round_score((weighted / total_weight).clamp(0.0, 100.0))
}

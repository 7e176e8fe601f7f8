//! Heuristic commit-message analysis.
//!
//! The [`Analyzer`] trait is the pluggable seam between the pipeline and the
//! scoring rules. [`HeuristicAnalyzer`] is the built-in implementation:
//! lexicon sentiment, keyword categories, priority, confidence, and
//! rule-based insights. It performs no I/O and holds no mutable state.
//!
//! Callers never see an analysis error: [`analyze_or_neutral`] turns any
//! `Err` or panic from an analyzer into [`Annotation::failed`].
//! [`run_analyze`] is the `ctrack analyze` command.

use anyhow::Result;
use chrono::Utc;
use regex::Regex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

use crate::models::{Annotation, Category, Priority, SentimentLabel};

/// Produces an [`Annotation`] for a commit message.
///
/// Implementations must be pure and must not block.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    fn analyze(&self, message: &str) -> Result<Annotation>;
}

/// Run `analyzer`, degrading any fault to the neutral failed annotation.
pub fn analyze_or_neutral(analyzer: &dyn Analyzer, message: &str) -> Annotation {
    match catch_unwind(AssertUnwindSafe(|| analyzer.analyze(message))) {
        Ok(Ok(annotation)) => annotation,
        Ok(Err(e)) => {
            log::warn!("analyzer '{}' failed: {:#}", analyzer.name(), e);
            Annotation::failed()
        }
        Err(_) => {
            log::warn!("analyzer '{}' panicked", analyzer.name());
            Annotation::failed()
        }
    }
}

const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::BugFix,
        &["fix", "bug", "issue", "error", "crash", "broken"],
    ),
    (
        Category::Feature,
        &["add", "new", "feature", "implement", "create"],
    ),
    (
        Category::Documentation,
        &["doc", "readme", "comment", "document"],
    ),
    (
        Category::Refactor,
        &["refactor", "clean", "optimize", "improve"],
    ),
    (
        Category::Security,
        &["security", "vulnerability", "auth", "password"],
    ),
    (
        Category::Performance,
        &["performance", "speed", "fast", "slow", "optimize"],
    ),
];

const URGENT_KEYWORDS: &[&str] = &["urgent", "critical", "fix", "bug", "security", "hotfix"];

const NEGATIVE_THRESHOLD: f64 = -0.3;

/// Word polarities in [-1, 1].
const LEXICON: &[(&str, f64)] = &[
    ("good", 0.7),
    ("great", 0.8),
    ("better", 0.5),
    ("best", 1.0),
    ("nice", 0.6),
    ("awesome", 1.0),
    ("excellent", 1.0),
    ("perfect", 1.0),
    ("happy", 0.8),
    ("love", 0.5),
    ("clean", 0.37),
    ("cleaner", 0.37),
    ("improved", 0.4),
    ("improvement", 0.4),
    ("enhanced", 0.3),
    ("easy", 0.43),
    ("easier", 0.43),
    ("elegant", 0.5),
    ("robust", 0.3),
    ("stable", 0.3),
    ("smooth", 0.4),
    ("fast", 0.2),
    ("faster", 0.2),
    ("bad", -0.7),
    ("worse", -0.4),
    ("worst", -1.0),
    ("broken", -0.4),
    ("crash", -0.5),
    ("crashes", -0.5),
    ("fail", -0.5),
    ("failed", -0.5),
    ("failing", -0.5),
    ("failure", -0.5),
    ("wrong", -0.5),
    ("incorrect", -0.5),
    ("ugly", -0.7),
    ("terrible", -1.0),
    ("horrible", -1.0),
    ("awful", -1.0),
    ("slow", -0.3),
    ("slower", -0.3),
    ("hacky", -0.4),
    ("nasty", -0.6),
    ("stupid", -0.8),
    ("annoying", -0.8),
    ("messy", -0.4),
    ("painful", -0.7),
    ("flaky", -0.5),
];

const NEGATORS: &[&str] = &["not", "no", "never", "without", "cannot", "dont", "doesnt", "isnt"];

const INTENSIFIERS: &[(&str, f64)] = &[("very", 1.3), ("really", 1.3), ("extremely", 1.5)];

fn issue_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#[0-9]+").expect("issue reference pattern is valid"))
}

/// Built-in keyword and lexicon analyzer.
#[derive(Debug, Clone, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Infallible analysis of one message.
    pub fn annotate(&self, message: &str) -> Annotation {
        let sentiment = round3(sentiment_polarity(message));
        let categories = detect_categories(message);
        let priority = assess_priority(message, sentiment, &categories);
        let confidence = confidence(message, &categories);
        let insights = insights(message, sentiment, &categories);

        Annotation {
            categories,
            priority,
            confidence_score: confidence,
            sentiment_score: sentiment,
            sentiment_label: SentimentLabel::from_score(sentiment),
            insights,
            produced_at: Utc::now(),
        }
    }
}

impl Analyzer for HeuristicAnalyzer {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn analyze(&self, message: &str) -> Result<Annotation> {
        Ok(self.annotate(message))
    }
}

/// Mean polarity of lexicon words, with negation and intensifiers applied
/// to the word that follows them. Clamped to [-1, 1].
fn sentiment_polarity(message: &str) -> f64 {
    let lower = message.to_lowercase();
    let words: Vec<String> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.replace('\'', ""))
        .filter(|w| !w.is_empty())
        .collect();

    let mut total = 0.0;
    let mut hits = 0usize;

    for (i, word) in words.iter().enumerate() {
        let Some(&(_, base)) = LEXICON.iter().find(|(w, _)| w == word) else {
            continue;
        };
        let mut score = base;
        if let Some(prev) = i.checked_sub(1).map(|p| words[p].as_str()) {
            if let Some(&(_, factor)) = INTENSIFIERS.iter().find(|(w, _)| *w == prev) {
                score *= factor;
            }
            let negated = NEGATORS.contains(&prev)
                || i.checked_sub(2)
                    .map(|p| NEGATORS.contains(&words[p].as_str()))
                    .unwrap_or(false);
            if negated {
                score *= -0.5;
            }
        }
        total += score;
        hits += 1;
    }

    if hits == 0 {
        return 0.0;
    }
    (total / hits as f64).clamp(-1.0, 1.0)
}

fn detect_categories(message: &str) -> Vec<Category> {
    let lower = message.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .collect()
}

fn assess_priority(message: &str, sentiment: f64, categories: &[Category]) -> Priority {
    let lower = message.to_lowercase();
    if URGENT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Priority::High;
    }
    if categories
        .iter()
        .any(|c| matches!(c, Category::BugFix | Category::Security))
    {
        return Priority::High;
    }
    if sentiment < NEGATIVE_THRESHOLD {
        return Priority::Medium;
    }
    Priority::Normal
}

fn confidence(message: &str, categories: &[Category]) -> f64 {
    let mut score: f64 = 0.5;
    if message.chars().count() > 50 {
        score += 0.2;
    }
    if !categories.is_empty() {
        score += 0.2;
    }
    if issue_reference().is_match(message) {
        score += 0.1;
    }
    round3(score.min(1.0))
}

fn insights(message: &str, sentiment: f64, categories: &[Category]) -> Vec<String> {
    let mut out = Vec::new();

    if sentiment < NEGATIVE_THRESHOLD {
        out.push("Negative sentiment detected - may indicate issues".to_string());
    }
    if categories.contains(&Category::BugFix) {
        out.push("Bug fix detected - requires careful review".to_string());
    }
    if categories.contains(&Category::Security) {
        out.push("Security-related change - high priority review needed".to_string());
    }
    if categories.contains(&Category::Feature) {
        out.push("New feature implementation".to_string());
    }
    if message.chars().count() < 10 {
        out.push("Short commit message - consider adding more details".to_string());
    }
    if categories.is_empty() {
        out.push("No specific category detected".to_string());
    }

    out
}

/// `ctrack analyze`: annotate one message and print the result.
pub fn run_analyze(message: &str) -> Result<()> {
    if message.trim().is_empty() {
        anyhow::bail!("message must not be empty");
    }

    let a = analyze_or_neutral(&HeuristicAnalyzer::new(), message);
    let categories: Vec<&str> = a.categories.iter().map(|c| c.as_str()).collect();

    println!("priority:   {}", a.priority.as_str());
    println!(
        "sentiment:  {} ({:.3})",
        a.sentiment_label.as_str(),
        a.sentiment_score
    );
    println!("confidence: {:.3}", a.confidence_score);
    if categories.is_empty() {
        println!("categories: none");
    } else {
        println!("categories: {}", categories.join(", "));
    }
    for insight in &a.insights {
        println!("  - {}", insight);
    }

    Ok(())
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(message: &str) -> Annotation {
        HeuristicAnalyzer::new().annotate(message)
    }

    #[test]
    fn test_critical_security_fix() {
        let a = analyze("fix: critical security vulnerability");
        assert!(a.categories.contains(&Category::BugFix));
        assert!(a.categories.contains(&Category::Security));
        assert_eq!(a.priority, Priority::High);
        assert!(a.confidence_score >= 0.5);
        assert!(a.insights[0].starts_with("Bug fix detected"));
        assert!(a.insights[1].starts_with("Security-related change"));
    }

    #[test]
    fn test_categories_in_table_order() {
        let a = analyze("Optimize query speed and add docs");
        assert_eq!(
            a.categories,
            vec![
                Category::Feature,
                Category::Documentation,
                Category::Refactor,
                Category::Performance,
            ]
        );
    }

    #[test]
    fn test_category_match_is_case_insensitive() {
        let a = analyze("Update README");
        assert_eq!(a.categories, vec![Category::Documentation]);
        assert_eq!(a.priority, Priority::Normal);
    }

    #[test]
    fn test_no_category() {
        let a = analyze("Bump version");
        assert!(a.categories.is_empty());
        assert_eq!(a.priority, Priority::Normal);
        assert_eq!(a.confidence_score, 0.5);
        assert_eq!(a.insights, vec!["No specific category detected".to_string()]);
    }

    #[test]
    fn test_negative_sentiment_gives_medium_priority() {
        let a = analyze("Revert this terrible and ugly change");
        assert!(a.sentiment_score < -0.3, "score {}", a.sentiment_score);
        assert_eq!(a.sentiment_label, SentimentLabel::Negative);
        assert_eq!(a.priority, Priority::Medium);
        assert_eq!(
            a.insights[0],
            "Negative sentiment detected - may indicate issues"
        );
    }

    #[test]
    fn test_positive_sentiment() {
        let a = analyze("Great and elegant result");
        assert_eq!(a.sentiment_label, SentimentLabel::Positive);
    }

    #[test]
    fn test_negation_flips_polarity() {
        assert!(sentiment_polarity("this is not good") < 0.0);
        assert!(sentiment_polarity("this is good") > 0.0);
        assert_eq!(sentiment_polarity("merge branch"), 0.0);
    }

    #[test]
    fn test_confidence_components() {
        // base + category + issue reference
        let a = analyze("fix #42");
        assert_eq!(a.confidence_score, 0.8);

        // all components, capped at 1.0
        let long = "Implement the new caching layer for repository lookups, closes #1234";
        let a = analyze(long);
        assert_eq!(a.confidence_score, 1.0);
    }

    #[test]
    fn test_short_message_insight() {
        let a = analyze("wip");
        assert!(a
            .insights
            .iter()
            .any(|i| i.starts_with("Short commit message")));
    }

    fn has_urgent_keyword(message: &str) -> bool {
        let lower = message.to_lowercase();
        URGENT_KEYWORDS.iter().any(|k| lower.contains(k))
    }

    #[test]
    fn test_category_alone_gives_high_priority() {
        let a = analyze("Rotate auth password handling");
        assert!(!has_urgent_keyword("Rotate auth password handling"));
        assert_eq!(a.categories, vec![Category::Security]);
        assert_eq!(a.priority, Priority::High);

        let a = analyze("Handle error in parser");
        assert!(!has_urgent_keyword("Handle error in parser"));
        assert_eq!(a.categories, vec![Category::BugFix]);
        assert_eq!(a.priority, Priority::High);
    }

    #[test]
    fn test_category_outranks_negative_sentiment() {
        let message = "Terrible crash with broken input";
        let a = analyze(message);
        assert!(!has_urgent_keyword(message));
        assert!(a.sentiment_score < NEGATIVE_THRESHOLD, "score {}", a.sentiment_score);
        assert!(a.categories.contains(&Category::BugFix));
        assert_eq!(a.priority, Priority::High);
    }

    #[test]
    fn test_urgent_keyword_without_category() {
        let a = analyze("URGENT: roll back deploy");
        assert_eq!(a.priority, Priority::High);
    }

    struct Exploding;

    impl Analyzer for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn analyze(&self, _message: &str) -> Result<Annotation> {
            panic!("lexicon corrupted");
        }
    }

    struct Failing;

    impl Analyzer for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn analyze(&self, _message: &str) -> Result<Annotation> {
            anyhow::bail!("model unavailable")
        }
    }

    #[test]
    fn test_faults_degrade_to_neutral() {
        for analyzer in [&Exploding as &dyn Analyzer, &Failing as &dyn Analyzer] {
            let a = analyze_or_neutral(analyzer, "fix bug");
            assert!(a.is_failed());
            assert_eq!(a.confidence_score, 0.0);
            assert_eq!(a.priority, Priority::Normal);
            assert!(a.categories.is_empty());
        }
    }
}

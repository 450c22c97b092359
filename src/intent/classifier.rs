//! Rule-based (with optional LLM fallback) intent and complexity
//! classification, modelled directly on the teacher's
//! `complexity::PatternClassifier`: `LazyLock<Regex>` pattern tables per
//! signal, a score on a signals struct, and an entry point that never fails.

use super::types::{Entity, EntityKind, IntentClass, IntentRecord, Method, QuestionType};
use crate::config::Config;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

static WHAT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(what|was)\b").expect("invalid regex"));
static WHO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(who|wer)\b").expect("invalid regex"));
static WHERE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(where|wo)\b").expect("invalid regex"));
static WHEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(when|wann)\b").expect("invalid regex"));
static HOW_MUCH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(how\s+much|how\s+many|wie\s+viel|wie\s+viele)\b").expect("invalid regex")
});
static HOW_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(how|wie)\b").expect("invalid regex"));
static WHY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(why|warum|weshalb)\b").expect("invalid regex"));
static WHICH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(which|welche[rs]?)\b").expect("invalid regex"));

static RESEARCH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(research|investigate|in-depth|comprehensive|umfassend|recherchier|untersuch|erforsch)")
        .expect("invalid regex")
});
static ANALYSIS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(analy[sz]e?|assess|evaluate|compare|erläuter|beurteil|bewert|einschätz)")
        .expect("invalid regex")
});
static EXPLANATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(explain|describe|how\s+does|erklär|beschreib|wie\s+funktioniert)")
        .expect("invalid regex")
});

static ENUMERATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\b\d+\.\s|;\s*\w+;|\bund\b.*\bsowie\b|\band\b.*\balso\b)").expect("invalid regex")
});

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,2}\.\d{1,2}\.\d{2,4}\b|\b\d{4}\b").expect("invalid regex")
});
static AMOUNT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+([.,]\d+)?\s*(€|eur|euro))").expect("invalid regex")
});
static SECTION_REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"§{1,2}\s*\d+[a-zA-Z]?(\s+(Abs\.|Satz)\s*\d+)?(\s+[A-ZÄÖÜ][\w]{0,15})*")
        .expect("invalid regex")
});

const KNOWN_PLACES_AND_ORGS: &[&str] = &[
    "Baden-Württemberg",
    "Stuttgart",
    "Umweltbundesamt",
    "Bundesverwaltungsgericht",
    "Landratsamt",
];

/// Rule-only classification result, before any LLM fallback is applied.
#[derive(Debug, Clone)]
struct RuleClassification {
    intent_class: IntentClass,
    confidence: f64,
    complexity_score: f64,
    detected_domains: Vec<String>,
    question_type: QuestionType,
    entities: Vec<Entity>,
    raw_scores: HashMap<IntentClass, i32>,
}

/// Pattern-based intent/complexity classifier with an optional LLM
/// fallback stage for low-confidence rule results (spec.md §4.1).
pub struct IntentClassifier {
    config: Config,
    llm_client: Option<Arc<dyn LLMClient>>,
}

impl IntentClassifier {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            llm_client: None,
        }
    }

    pub fn with_llm_fallback(mut self, client: Arc<dyn LLMClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    fn question_type(query: &str) -> QuestionType {
        if HOW_MUCH_PATTERN.is_match(query) {
            QuestionType::HowMuch
        } else if WHAT_PATTERN.is_match(query) {
            QuestionType::What
        } else if WHO_PATTERN.is_match(query) {
            QuestionType::Who
        } else if WHERE_PATTERN.is_match(query) {
            QuestionType::Where
        } else if WHEN_PATTERN.is_match(query) {
            QuestionType::When
        } else if WHY_PATTERN.is_match(query) {
            QuestionType::Why
        } else if WHICH_PATTERN.is_match(query) {
            QuestionType::Which
        } else if HOW_PATTERN.is_match(query) {
            QuestionType::How
        } else {
            QuestionType::Statement
        }
    }

    fn interrogative_depth(query: &str) -> u32 {
        [
            &*WHAT_PATTERN,
            &*WHO_PATTERN,
            &*WHERE_PATTERN,
            &*WHEN_PATTERN,
            &*HOW_PATTERN,
            &*WHY_PATTERN,
            &*WHICH_PATTERN,
        ]
        .iter()
        .filter(|p| p.is_match(query))
        .count() as u32
            + query.matches('?').count() as u32
    }

    fn domain_weighted_sum(&self, lowercase_query: &str) -> (f64, Vec<String>) {
        let mut sum = 0.0;
        let mut domains = Vec::new();
        for (term, weight) in &self.config.domain_weights {
            if lowercase_query.contains(term.as_str()) {
                sum += weight;
                domains.push(term.clone());
            }
        }
        (sum, domains)
    }

    fn extract_entities(query: &str) -> Vec<Entity> {
        let mut entities = Vec::new();
        for m in DATE_PATTERN.find_iter(query) {
            entities.push(Entity {
                kind: EntityKind::Date,
                text: m.as_str().to_string(),
            });
        }
        for m in AMOUNT_PATTERN.find_iter(query) {
            entities.push(Entity {
                kind: EntityKind::Amount,
                text: m.as_str().to_string(),
            });
        }
        for m in SECTION_REFERENCE_PATTERN.find_iter(query) {
            entities.push(Entity {
                kind: EntityKind::SectionReference,
                text: m.as_str().trim().to_string(),
            });
        }
        for known in KNOWN_PLACES_AND_ORGS {
            if query.contains(known) {
                entities.push(Entity {
                    kind: EntityKind::Place,
                    text: known.to_string(),
                });
            }
        }
        entities
    }

    fn classify_rules(&self, query: &str) -> RuleClassification {
        let lowercase = query.to_lowercase();

        let sentence_count = query
            .split(|c| c == '.' || c == '!' || c == '?')
            .filter(|s| !s.trim().is_empty())
            .count()
            .max(1);
        let clause_count = lowercase.matches(',').count()
            + lowercase.matches(" und ").count()
            + lowercase.matches(" and ").count();
        let has_enumeration = ENUMERATION_PATTERN.is_match(query);
        let interrogative_depth = Self::interrogative_depth(query);
        let (domain_weighted_sum, detected_domains) = self.domain_weighted_sum(&lowercase);
        let requires_analysis = ANALYSIS_PATTERN.is_match(query);
        let requires_research_depth = RESEARCH_PATTERN.is_match(query);
        let is_explanation = EXPLANATION_PATTERN.is_match(query);

        let mut complexity_score = 1.0_f64;
        complexity_score += (sentence_count.saturating_sub(1)) as f64 * 0.8;
        complexity_score += clause_count as f64 * 0.6;
        complexity_score += domain_weighted_sum;
        if has_enumeration {
            complexity_score += 1.0;
        }
        complexity_score += interrogative_depth as f64 * 0.5;
        if requires_analysis {
            complexity_score += 2.0;
        }
        if requires_research_depth {
            complexity_score += 1.5;
        }
        let complexity_score = complexity_score.clamp(1.0, 10.0);

        let mut raw_scores: HashMap<IntentClass, i32> = HashMap::new();
        raw_scores.insert(IntentClass::QuickAnswer, 1);
        raw_scores.insert(
            IntentClass::Explanation,
            if is_explanation { 3 } else { 0 },
        );
        raw_scores.insert(
            IntentClass::Analysis,
            if requires_analysis { 3 } else { 0 },
        );
        raw_scores.insert(
            IntentClass::Research,
            if requires_research_depth { 3 } else { 0 },
        );

        let (intent_class, votes) = raw_scores
            .iter()
            .max_by_key(|(_, votes)| **votes)
            .map(|(class, votes)| (*class, *votes))
            .unwrap_or((IntentClass::QuickAnswer, 1));

        // Very complex queries are at minimum an analysis, even when no
        // keyword matched directly.
        let intent_class = if complexity_score >= 8.0 && votes <= 1 {
            IntentClass::Analysis
        } else {
            intent_class
        };

        let confidence = (0.5 + 0.1 * votes as f64 + 0.05 * detected_domains.len() as f64)
            .clamp(0.0, 1.0);

        RuleClassification {
            intent_class,
            confidence,
            complexity_score,
            detected_domains,
            question_type: Self::question_type(query),
            entities: Self::extract_entities(query),
            raw_scores,
        }
    }

    /// `analyse(query_text, language) -> IntentRecord` (spec.md §4.1).
    /// Never fails: on model unavailability, falls back to rule-only
    /// classification with `method = Method::Rule`, possibly with lower
    /// confidence.
    pub async fn analyse(&self, query_text: &str, _language: &str) -> IntentRecord {
        if query_text.trim().is_empty() {
            return IntentRecord::empty_query_fallback();
        }

        let rule = self.classify_rules(query_text);

        if rule.confidence >= 0.7 || self.llm_client.is_none() {
            return IntentRecord {
                intent_class: rule.intent_class,
                confidence: rule.confidence,
                method: Method::Rule,
                complexity_score: rule.complexity_score,
                detected_domains: rule.detected_domains,
                question_type: rule.question_type,
                entities: rule.entities,
                raw_scores: rule.raw_scores,
            };
        }

        let client = self.llm_client.as_ref().expect("checked above");
        match self.classify_with_llm(query_text, client).await {
            Some(record) => record,
            None => IntentRecord {
                intent_class: rule.intent_class,
                confidence: rule.confidence,
                method: Method::Rule,
                complexity_score: rule.complexity_score,
                detected_domains: rule.detected_domains,
                question_type: rule.question_type,
                entities: rule.entities,
                raw_scores: rule.raw_scores,
            },
        }
    }

    async fn classify_with_llm(
        &self,
        query_text: &str,
        client: &Arc<dyn LLMClient>,
    ) -> Option<IntentRecord> {
        let request = CompletionRequest::new()
            .with_system(
                "Classify the query. Respond with ONLY a JSON object: \
                 {\"intent_class\": \"quick_answer|explanation|analysis|research\", \
                 \"confidence\": 0.0-1.0, \"complexity_score\": 1-10, \
                 \"detected_domains\": [string]}",
            )
            .with_message(ChatMessage::user(query_text))
            .with_max_tokens(200)
            .with_temperature(0.0);

        let response = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            client.complete(request),
        )
        .await
        .ok()?
        .ok()?;

        let parsed: LlmIntentPayload = serde_json::from_str(response.content.trim()).ok()?;
        let intent_class = match parsed.intent_class.as_str() {
            "quick_answer" => IntentClass::QuickAnswer,
            "explanation" => IntentClass::Explanation,
            "analysis" => IntentClass::Analysis,
            "research" => IntentClass::Research,
            _ => return None,
        };

        let rule = self.classify_rules(query_text);
        Some(IntentRecord {
            intent_class,
            confidence: parsed.confidence.clamp(0.0, 1.0),
            method: Method::Hybrid,
            complexity_score: parsed.complexity_score.clamp(1.0, 10.0),
            detected_domains: parsed.detected_domains,
            question_type: rule.question_type,
            entities: rule.entities,
            raw_scores: rule.raw_scores,
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct LlmIntentPayload {
    intent_class: String,
    confidence: f64,
    complexity_score: f64,
    #[serde(default)]
    detected_domains: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_query_is_canned_fallback() {
        let classifier = IntentClassifier::new(Config::default());
        let record = classifier.analyse("   ", "de").await;
        assert_eq!(record.intent_class, IntentClass::QuickAnswer);
        assert_eq!(record.confidence, 0.0);
        assert_eq!(record.complexity_score, 1.0);
    }

    #[tokio::test]
    async fn simple_factual_query_is_low_complexity() {
        let classifier = IntentClassifier::new(Config::default());
        let record = classifier.analyse("What is a permit?", "en").await;
        assert_eq!(record.method, Method::Rule);
        assert!(record.complexity_score < 5.0);
        assert_eq!(record.question_type, QuestionType::What);
    }

    #[tokio::test]
    async fn complex_administrative_law_query_is_high_complexity() {
        let classifier = IntentClassifier::new(Config::default());
        let record = classifier
            .analyse(
                "Wie ist das Ermessen der Behörde im Verwaltungsverfahren nach VwVfG zu beurteilen? \
                 Analysiere die Rechtsprechung und erläutere die Ermessensfehler.",
                "de",
            )
            .await;
        assert!(record.complexity_score >= 7.0);
        assert_eq!(record.intent_class, IntentClass::Analysis);
        assert!(!record.detected_domains.is_empty());
    }

    #[tokio::test]
    async fn extracts_section_reference_entity() {
        let classifier = IntentClassifier::new(Config::default());
        let record = classifier
            .analyse("Was regelt § 58 LBO BW zur Abstandsfläche?", "de")
            .await;
        assert!(record
            .entities
            .iter()
            .any(|e| matches!(e.kind, EntityKind::SectionReference)));
    }

    #[test]
    fn question_type_detection() {
        assert_eq!(IntentClassifier::question_type("What is this?"), QuestionType::What);
        assert_eq!(IntentClassifier::question_type("Wer ist zuständig?"), QuestionType::Who);
        assert_eq!(
            IntentClassifier::question_type("Wie viele Anträge wurden gestellt?"),
            QuestionType::HowMuch
        );
        assert_eq!(
            IntentClassifier::question_type("This is a statement."),
            QuestionType::Statement
        );
    }
}

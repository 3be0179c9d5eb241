//! Request Classifier
//!
//! Decides whether an utterance asks for a brand new query or for a chart of
//! the previous result ("show this as a pie chart", "affichez sous forme de
//! camembert"). Patterns are matched case-insensitively and the chart phrase
//! is the one the pattern matched at the end of the construction.

use crate::chart::ChartTypeResolver;
use crate::error::{ChatError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    NewQuery,
    VisualizeFollowUp { phrase: String },
}

const EN_VERBS: &str = r"show|display|visuali[sz]e|plot|draw|render|create|generate|make|turn|put|give";
const FR_VERBS: &str = r"montrez|montre|montrer|affichez|affiche|afficher|visualisez|visualise|visualiser|générez|génère|générer|créez|crée|créer|tracez|trace|tracer|dessinez|dessine|présentez|présente|peux-tu|pouvez-vous|pourriez-vous|fais|faites";

pub struct RequestClassifier {
    patterns: Vec<Regex>,
    /// Vocabulary, longest phrase first
    phrases: Vec<&'static str>,
}

impl RequestClassifier {
    /// Build the pattern set from the resolver's chart vocabulary.
    pub fn new(resolver: &ChartTypeResolver) -> Result<Self> {
        let phrases = resolver.phrases();
        let chart = phrases
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");

        let sources = [
            // show it as a pie chart / plot this in a bar chart
            format!(r"(?i)\b(?:{EN_VERBS})\b.*?\b(?:as|in|into)\s+an?\s+(?P<chart>{chart})\b"),
            // affichez ... sous forme de camembert / visualisez ... en barres
            format!(
                r"(?i)\b(?:{FR_VERBS})\b.*?(?:sous\s+forme\s+d(?:e\s+|'\s*)(?:une?\s+)?|\ben\s+|\bcomme\s+une?\s+)(?P<chart>{chart})\b"
            ),
            // bare "as a scatter plot" / "sous forme de camembert"
            format!(r"(?i)\bas\s+an?\s+(?P<chart>{chart})\b"),
            format!(r"(?i)\bsous\s+forme\s+d(?:e\s+|'\s*)(?:une?\s+)?(?P<chart>{chart})\b"),
        ];

        let patterns = sources
            .iter()
            .map(|src| {
                Regex::new(src).map_err(|e| {
                    ChatError::Config(format!("Invalid visualization pattern: {}", e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns, phrases })
    }

    pub fn classify(&self, utterance: &str) -> RequestKind {
        for pattern in &self.patterns {
            if let Some(m) = pattern.captures(utterance).and_then(|c| c.name("chart")) {
                let matched = m.as_str().to_lowercase();
                if let Some(phrase) = self.phrases.iter().find(|p| **p == matched) {
                    info!("Detected visualization request for '{}'", phrase);
                    return RequestKind::VisualizeFollowUp {
                        phrase: phrase.to_string(),
                    };
                }
            }
        }
        RequestKind::NewQuery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RequestClassifier {
        RequestClassifier::new(&ChartTypeResolver::default()).unwrap()
    }

    fn follow_up(phrase: &str) -> RequestKind {
        RequestKind::VisualizeFollowUp {
            phrase: phrase.to_string(),
        }
    }

    #[test]
    fn test_english_follow_up() {
        let c = classifier();
        assert_eq!(c.classify("show this as a pie chart"), follow_up("pie chart"));
        assert_eq!(c.classify("Plot it as a Scatter Plot please"), follow_up("scatter plot"));
        assert_eq!(c.classify("Display the result in a bar chart"), follow_up("bar chart"));
    }

    #[test]
    fn test_french_follow_up() {
        let c = classifier();
        assert_eq!(
            c.classify("Affichez les résultats sous forme de nuage de points"),
            follow_up("nuage de points")
        );
        assert_eq!(
            c.classify("Pouvez-vous visualiser cette répartition sous forme de camembert ?"),
            follow_up("camembert")
        );
        assert_eq!(c.classify("peux-tu le montrer en barres"), follow_up("barres"));
    }

    #[test]
    fn test_bare_constructions() {
        let c = classifier();
        assert_eq!(c.classify("Sous forme de scatter plot maintenant."), follow_up("scatter plot"));
        assert_eq!(c.classify("and now as a histogram"), follow_up("histogram"));
    }

    #[test]
    fn test_longest_phrase_wins() {
        let c = classifier();
        assert_eq!(
            c.classify("montrez ça sous forme de graphique en camembert"),
            follow_up("graphique en camembert")
        );
    }

    #[test]
    fn test_plain_questions_are_new_queries() {
        let c = classifier();
        assert_eq!(c.classify("How many patients were admitted in 2023?"), RequestKind::NewQuery);
        assert_eq!(c.classify("Quel est le chiffre d'affaires total ?"), RequestKind::NewQuery);
        assert_eq!(c.classify("show me the revenue by service"), RequestKind::NewQuery);
        assert_eq!(c.classify("show the patients as a list"), RequestKind::NewQuery);
    }

    #[test]
    fn test_chart_word_earlier_in_sentence_is_ignored() {
        let c = classifier();
        assert_eq!(c.classify("show the revenue per area as a pie"), follow_up("pie"));
        assert_eq!(
            c.classify("affichez les ventes par ligne sous forme de radar"),
            follow_up("radar")
        );
    }

    #[test]
    fn test_english_construction_needs_an_article() {
        let c = classifier();
        assert_eq!(c.classify("show the patients in box 12"), RequestKind::NewQuery);
        assert_eq!(c.classify("list and show admissions in area B"), RequestKind::NewQuery);
        assert_eq!(c.classify("turn it into a line chart"), follow_up("line chart"));
    }
}

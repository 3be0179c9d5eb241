//! Chart-Type Resolution
//!
//! Users (and the LLM) describe charts informally: "scatter plot", "nuage de
//! points", "dispersion". Free text is normalized, scored against a fixed
//! bilingual synonym vocabulary with a token-order-insensitive similarity,
//! and mapped to one of the canonical [`ChartKind`]s.
//!
//! Each kind validates its own minimum table shape when the chart is built.

use crate::error::{ChatError, Result};
use crate::frame::{column_names, dataframe_to_records};
use itertools::Itertools;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use strsim::normalized_levenshtein;
use tracing::{info, warn};

/// Minimum similarity (0-100) for a fuzzy match to be accepted
pub const DEFAULT_MATCH_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
    Pie,
    Scatter,
    Box,
    Area,
    Radar,
    Map,
    Histogram,
}

impl ChartKind {
    pub const ALL: [ChartKind; 9] = [
        ChartKind::Line,
        ChartKind::Bar,
        ChartKind::Pie,
        ChartKind::Scatter,
        ChartKind::Box,
        ChartKind::Area,
        ChartKind::Radar,
        ChartKind::Map,
        ChartKind::Histogram,
    ];

    /// Canonical label
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Line => "line",
            ChartKind::Bar => "bar",
            ChartKind::Pie => "pie",
            ChartKind::Scatter => "scatter",
            ChartKind::Box => "box",
            ChartKind::Area => "area",
            ChartKind::Radar => "radar",
            ChartKind::Map => "map",
            ChartKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phrase → kind. Every canonical label maps to itself.
const SYNONYMS: &[(&str, ChartKind)] = &[
    ("line", ChartKind::Line),
    ("ligne", ChartKind::Line),
    ("linéaire", ChartKind::Line),
    ("courbe", ChartKind::Line),
    ("line chart", ChartKind::Line),
    ("line graph", ChartKind::Line),
    ("graphique linéaire", ChartKind::Line),
    ("graphique de ligne", ChartKind::Line),
    ("graphique en ligne", ChartKind::Line),
    ("bar", ChartKind::Bar),
    ("bars", ChartKind::Bar),
    ("barres", ChartKind::Bar),
    ("barras", ChartKind::Bar),
    ("bar chart", ChartKind::Bar),
    ("bar graph", ChartKind::Bar),
    ("column chart", ChartKind::Bar),
    ("graphique en barres", ChartKind::Bar),
    ("diagramme en barres", ChartKind::Bar),
    ("pie", ChartKind::Pie),
    ("pie chart", ChartKind::Pie),
    ("camembert", ChartKind::Pie),
    ("circulaire", ChartKind::Pie),
    ("graphique camembert", ChartKind::Pie),
    ("graphique en camembert", ChartKind::Pie),
    ("diagramme circulaire", ChartKind::Pie),
    ("scatter", ChartKind::Scatter),
    ("scatter plot", ChartKind::Scatter),
    ("scatter chart", ChartKind::Scatter),
    ("nuage de points", ChartKind::Scatter),
    ("dispersion", ChartKind::Scatter),
    ("graphique de dispersion", ChartKind::Scatter),
    ("diagramme de dispersion", ChartKind::Scatter),
    ("box", ChartKind::Box),
    ("box plot", ChartKind::Box),
    ("boxplot", ChartKind::Box),
    ("boîte", ChartKind::Box),
    ("boîte à moustaches", ChartKind::Box),
    ("graphique boîte à moustaches", ChartKind::Box),
    ("area", ChartKind::Area),
    ("area chart", ChartKind::Area),
    ("aire", ChartKind::Area),
    ("graphique en aire", ChartKind::Area),
    ("graphique area", ChartKind::Area),
    ("radar", ChartKind::Radar),
    ("radar chart", ChartKind::Radar),
    ("spider chart", ChartKind::Radar),
    ("graphique radar", ChartKind::Radar),
    ("diagramme radar", ChartKind::Radar),
    ("map", ChartKind::Map),
    ("mapbox", ChartKind::Map),
    ("carte", ChartKind::Map),
    ("graphique carte", ChartKind::Map),
    ("carte géographique", ChartKind::Map),
    ("histogram", ChartKind::Histogram),
    ("histogramme", ChartKind::Histogram),
];

/// Best vocabulary entry for a label
#[derive(Debug, Clone, PartialEq)]
pub struct ChartMatch {
    pub phrase: &'static str,
    pub kind: ChartKind,
    /// Similarity on a 0-100 scale
    pub score: f64,
}

/// Lowercase, trim and collapse internal whitespace
pub fn normalize_label(label: &str) -> String {
    label.split_whitespace().join(" ").to_lowercase()
}

/// Similarity of two strings after sorting their whitespace tokens, 0-100
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let sorted_a = a.split_whitespace().sorted().join(" ");
    let sorted_b = b.split_whitespace().sorted().join(" ");
    normalized_levenshtein(&sorted_a, &sorted_b) * 100.0
}

#[derive(Debug, Clone)]
pub struct ChartTypeResolver {
    threshold: f64,
}

impl Default for ChartTypeResolver {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl ChartTypeResolver {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// All known chart phrases, longest first
    pub fn phrases(&self) -> Vec<&'static str> {
        SYNONYMS
            .iter()
            .map(|(phrase, _)| *phrase)
            .sorted_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)))
            .collect()
    }

    /// Highest scoring vocabulary entry, regardless of threshold
    pub fn best_match(&self, label: &str) -> Option<ChartMatch> {
        let normalized = normalize_label(label);
        if normalized.is_empty() {
            return None;
        }

        let mut best: Option<ChartMatch> = None;
        for (phrase, kind) in SYNONYMS {
            let score = token_sort_ratio(&normalized, phrase);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(ChartMatch {
                    phrase,
                    kind: *kind,
                    score,
                });
            }
        }
        best
    }

    /// Map free text to a canonical kind, or `None` below the threshold
    pub fn resolve(&self, label: &str) -> Option<ChartKind> {
        match self.best_match(label) {
            Some(m) if m.score >= self.threshold => {
                info!(
                    "Chart type '{}' mapped to '{}' via '{}' (score {:.0})",
                    label, m.kind, m.phrase, m.score
                );
                Some(m.kind)
            }
            Some(m) => {
                warn!(
                    "Unknown or unsupported chart type '{}' (best: '{}' at {:.0})",
                    label, m.phrase, m.score
                );
                None
            }
            None => None,
        }
    }

    /// Resolve a label and build the chart for `frame`
    pub fn render(&self, label: &str, frame: &DataFrame) -> Result<Chart> {
        let kind = self
            .resolve(label)
            .ok_or_else(|| ChatError::UnresolvedChartType(label.to_string()))?;
        build_chart(kind, frame)
    }
}

/// Which columns play which role in a chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Encoding {
    Cartesian {
        x: String,
        y: String,
        color: Option<String>,
    },
    Pie {
        names: String,
        values: String,
    },
    Radar {
        series: String,
        axes: Vec<String>,
    },
    Geo {
        lat: String,
        lon: String,
    },
    Histogram {
        x: String,
    },
}

/// Renderer-agnostic chart specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub kind: ChartKind,
    pub title: String,
    pub encoding: Encoding,
    pub data: Vec<serde_json::Value>,
}

fn shape_error(kind: ChartKind, reason: impl Into<String>) -> ChatError {
    let reason = reason.into();
    warn!("Insufficient data for {} chart: {}", kind, reason);
    ChatError::ChartShapeMismatch { kind, reason }
}

fn require_columns(kind: ChartKind, columns: &[String], min: usize) -> Result<()> {
    if columns.len() < min {
        return Err(shape_error(
            kind,
            format!("needs at least {} columns, got {}", min, columns.len()),
        ));
    }
    Ok(())
}

fn require_rows(kind: ChartKind, frame: &DataFrame, min: usize) -> Result<()> {
    if frame.height() < min {
        return Err(shape_error(
            kind,
            format!("needs at least {} rows, got {}", min, frame.height()),
        ));
    }
    Ok(())
}

/// Build a chart of `kind`, validating the kind's minimum shape first
pub fn build_chart(kind: ChartKind, frame: &DataFrame) -> Result<Chart> {
    if frame.height() == 0 {
        return Err(shape_error(kind, "result is empty"));
    }
    let columns = column_names(frame);

    let (title, encoding) = match kind {
        ChartKind::Line | ChartKind::Scatter => {
            require_columns(kind, &columns, 2)?;
            require_rows(kind, frame, 2)?;
            let (x, y) = (columns[0].clone(), columns[1].clone());
            let title = if kind == ChartKind::Line {
                format!("{} over {}", y, x)
            } else {
                format!("{} versus {}", y, x)
            };
            (title, Encoding::Cartesian { x, y, color: None })
        }
        ChartKind::Bar => {
            require_columns(kind, &columns, 2)?;
            let (x, y) = (columns[0].clone(), columns[1].clone());
            let color = columns.get(2).cloned();
            let title = match &color {
                Some(c) => format!("{} by {} and {}", y, x, c),
                None => format!("{} by {}", y, x),
            };
            (title, Encoding::Cartesian { x, y, color })
        }
        ChartKind::Box => {
            require_columns(kind, &columns, 2)?;
            let (x, y) = (columns[0].clone(), columns[1].clone());
            (
                format!("Distribution of {} by {}", y, x),
                Encoding::Cartesian { x, y, color: None },
            )
        }
        ChartKind::Area => {
            require_columns(kind, &columns, 2)?;
            let (x, y) = (columns[0].clone(), columns[1].clone());
            (
                format!("{} over {}", y, x),
                Encoding::Cartesian { x, y, color: None },
            )
        }
        ChartKind::Pie => {
            require_columns(kind, &columns, 2)?;
            let (names, values) = (columns[0].clone(), columns[1].clone());
            (
                format!("{} by {}", values, names),
                Encoding::Pie { names, values },
            )
        }
        ChartKind::Radar => {
            require_columns(kind, &columns, 3)?;
            require_rows(kind, frame, 1)?;
            (
                "Radar chart".to_string(),
                Encoding::Radar {
                    series: columns[0].clone(),
                    axes: columns[1..].to_vec(),
                },
            )
        }
        ChartKind::Map => {
            let has = |name: &str| columns.iter().any(|c| c == name);
            if !(has("latitude") && has("longitude")) {
                return Err(shape_error(
                    kind,
                    "columns 'latitude' and 'longitude' are required",
                ));
            }
            (
                "Map".to_string(),
                Encoding::Geo {
                    lat: "latitude".to_string(),
                    lon: "longitude".to_string(),
                },
            )
        }
        ChartKind::Histogram => {
            require_columns(kind, &columns, 1)?;
            let x = columns[0].clone();
            (format!("Distribution of {}", x), Encoding::Histogram { x })
        }
    };

    Ok(Chart {
        kind,
        title,
        encoding,
        data: dataframe_to_records(frame)?,
    })
}

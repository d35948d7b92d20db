//! Insight repository and periodic curation.
//!
//! Insights are appended freely during a generation. Curation ranks them by a
//! heuristic importance score and keeps a bounded, non-redundant subset.

use std::collections::BTreeSet;

use log::info;
use parking_lot::Mutex;

use crate::schema::{ImportancePolicy, Insight, InsightConfig, IslandId};

/// Outcome of a curation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CurationReport {
    pub before: usize,
    pub retained: usize,
    /// Dropped for being too similar to a more important insight.
    pub redundant: usize,
    /// Dropped for exceeding the retention cap.
    pub overflow: usize,
}

/// Append-only (between curations) store of insights.
#[derive(Debug, Default)]
pub struct InsightRepository {
    insights: Mutex<Vec<Insight>>,
}

impl InsightRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_insights(insights: Vec<Insight>) -> Self {
        Self {
            insights: Mutex::new(insights),
        }
    }

    pub fn push(&self, insight: Insight) {
        self.insights.lock().push(insight);
    }

    /// The `n` most recently filed insights, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Insight> {
        let insights = self.insights.lock();
        let start = insights.len().saturating_sub(n);
        insights[start..].to_vec()
    }

    pub fn for_island(&self, island: IslandId) -> Vec<Insight> {
        self.insights
            .lock()
            .iter()
            .filter(|insight| insight.island == Some(island))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Insight> {
        self.insights.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.insights.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.insights.lock().is_empty()
    }

    /// Rescore, rank and deduplicate.
    ///
    /// Insights are visited in descending importance; one is kept unless its
    /// token Jaccard similarity to an already kept insight exceeds the
    /// threshold, until the retention cap is reached. Kept insights stay in
    /// filing order.
    pub fn curate(&mut self, config: &InsightConfig, generation: u64) -> CurationReport {
        let insights = self.insights.get_mut();
        let before = insights.len();

        let scorer = ImportanceScorer::new(&config.importance, generation, insights);
        for insight in insights.iter_mut() {
            insight.importance = scorer.score(insight);
        }

        let mut ranked: Vec<usize> = (0..before).collect();
        ranked.sort_by(|&a, &b| {
            insights[b]
                .importance
                .total_cmp(&insights[a].importance)
                .then(b.cmp(&a))
        });

        let tokens: Vec<BTreeSet<String>> =
            insights.iter().map(|insight| tokenize(&insight.text)).collect();

        let mut kept: Vec<usize> = Vec::new();
        let mut redundant = 0;
        for index in ranked {
            if kept.len() >= config.retention_cap {
                break;
            }
            let similar = kept
                .iter()
                .any(|&k| jaccard(&tokens[index], &tokens[k]) > config.similarity_threshold);
            if similar {
                redundant += 1;
            } else {
                kept.push(index);
            }
        }
        kept.sort_unstable();

        let mut remaining = std::mem::take(insights).into_iter().map(Some).collect::<Vec<_>>();
        *insights = kept
            .iter()
            .filter_map(|&index| remaining[index].take())
            .collect();

        let report = CurationReport {
            before,
            retained: insights.len(),
            redundant,
            overflow: before - insights.len() - redundant,
        };
        info!(
            "Curated insights: kept {} of {} ({} redundant, {} over cap)",
            report.retained, report.before, report.redundant, report.overflow
        );
        report
    }
}

/// Heuristic importance in `[0, 1]`.
///
/// Components, each in `[0, 1]`, are combined as a weighted mean:
/// - recency: filing generation over the current generation;
/// - performance: source score min-max normalized over the batch;
/// - novelty and actionability: keyword hits, saturating.
struct ImportanceScorer<'a> {
    policy: &'a ImportancePolicy,
    generation: u64,
    score_range: Option<(f64, f64)>,
}

impl<'a> ImportanceScorer<'a> {
    fn new(policy: &'a ImportancePolicy, generation: u64, insights: &[Insight]) -> Self {
        let score_range = insights
            .iter()
            .filter_map(|insight| insight.source_score)
            .filter(|score| score.is_finite())
            .fold(None, |range: Option<(f64, f64)>, score| match range {
                None => Some((score, score)),
                Some((lo, hi)) => Some((lo.min(score), hi.max(score))),
            });
        Self {
            policy,
            generation,
            score_range,
        }
    }

    fn score(&self, insight: &Insight) -> f64 {
        let weights = &self.policy.weights;
        let tokens = tokenize(&insight.text);

        let weighted = weights.recency * self.recency(insight)
            + weights.performance * self.performance(insight)
            + weights.novelty * self.keywords(&tokens, &self.policy.novelty_keywords)
            + weights.actionability * self.keywords(&tokens, &self.policy.actionability_keywords);

        let total = weights.total();
        if total > 0.0 { weighted / total } else { 0.0 }
    }

    fn recency(&self, insight: &Insight) -> f64 {
        if self.generation == 0 {
            return 1.0;
        }
        (insight.generation as f64 / self.generation as f64).min(1.0)
    }

    fn performance(&self, insight: &Insight) -> f64 {
        let Some(score) = insight.source_score.filter(|s| s.is_finite()) else {
            return 0.0;
        };
        match self.score_range {
            Some((lo, hi)) if hi - lo > f64::EPSILON => (score - lo) / (hi - lo),
            _ => 0.5,
        }
    }

    fn keywords(&self, tokens: &BTreeSet<String>, keywords: &[String]) -> f64 {
        let saturation = self.policy.keyword_saturation.max(1);
        let hits = keywords
            .iter()
            .filter(|keyword| tokens.contains(&keyword.to_lowercase()))
            .count();
        hits.min(saturation) as f64 / saturation as f64
    }
}

/// Lowercase alphanumeric tokens of `text`.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `|a ∩ b| / |a ∪ b|`; two empty sets are identical.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

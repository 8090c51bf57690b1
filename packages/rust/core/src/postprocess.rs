//! Final assembly: attribution flags, balance audit and normalization.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, warn};

use triangulate_markdown::normalize_answer;
use triangulate_shared::{ResearchResult, SearchResult, SourceKind};

use crate::aggregator::{CandidatePool, dedup_key};

const BALANCE_NOTE_PREFIX: &str =
    "[NOTE: This answer may not have equal representation from all source types.";

// ---------------------------------------------------------------------------
// Balance audit
// ---------------------------------------------------------------------------

/// Used-source share of one kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KindShare {
    pub kind: SourceKind,
    pub used: usize,
    /// Rounded share of all used sources.
    pub percent: u32,
    /// `percent` minus the fairness target.
    pub deviation: i64,
}

/// How evenly the used sources spread across the kinds in the pool.
///
/// Only kinds with at least one candidate are audited. The audit reads the
/// `used` flags; it detects imbalance and never corrects it.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceReport {
    pub shares: Vec<KindShare>,
    pub total_used: usize,
    /// Fairness target in percent: 100 divided by the number of kinds.
    pub target: u32,
    pub tolerance: f64,
}

impl BalanceReport {
    pub fn compute(sources: &[SearchResult], tolerance: f64) -> Self {
        let kinds: Vec<SourceKind> = SourceKind::ALL
            .into_iter()
            .filter(|kind| sources.iter().any(|s| s.source == *kind))
            .collect();
        let total_used = sources.iter().filter(|s| s.used).count();
        let target = if kinds.is_empty() {
            0
        } else {
            (100.0 / kinds.len() as f64).round() as u32
        };

        let shares = kinds
            .into_iter()
            .map(|kind| {
                let used = sources.iter().filter(|s| s.used && s.source == kind).count();
                let percent = if total_used == 0 {
                    0
                } else {
                    (used as f64 * 100.0 / total_used as f64).round() as u32
                };
                KindShare {
                    kind,
                    used,
                    percent,
                    deviation: i64::from(percent) - i64::from(target),
                }
            })
            .collect();

        Self {
            shares,
            total_used,
            target,
            tolerance,
        }
    }

    /// Kinds whose share is further from the target than the tolerance.
    pub fn imbalanced(&self) -> impl Iterator<Item = &KindShare> {
        self.shares
            .iter()
            .filter(|share| share.deviation.unsigned_abs() as f64 > self.tolerance)
    }

    /// True when nothing was used or every share is within tolerance.
    pub fn is_balanced(&self) -> bool {
        self.total_used == 0 || self.imbalanced().next().is_none()
    }

    /// Plain-text imbalance note, or `None` when balanced.
    pub fn note(&self) -> Option<String> {
        if self.is_balanced() {
            return None;
        }
        let details = self
            .imbalanced()
            .map(|share| {
                let direction = if share.deviation < 0 {
                    "underrepresented"
                } else {
                    "overrepresented"
                };
                format!(
                    "{} sources ({}%) are {direction}.",
                    share.kind.label(),
                    share.percent
                )
            })
            .collect::<Vec<_>>()
            .join(" ");
        Some(format!("{BALANCE_NOTE_PREFIX} {details}]"))
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Set `used` on every source whose URL appears in `used_urls`.
pub fn mark_used(sources: &mut [SearchResult], used_urls: &[String]) {
    let keys: HashSet<String> = used_urls.iter().map(|u| dedup_key(u)).collect();
    for source in sources {
        source.used = source
            .url
            .as_deref()
            .is_some_and(|url| keys.contains(&dedup_key(url)));
    }
}

/// Produce the outward result: flags, balance note, normalized Markdown.
pub fn finalize(
    query: &str,
    answer: &str,
    pool: CandidatePool,
    used_urls: &[String],
    tolerance: f64,
) -> ResearchResult {
    let mut sources = pool.into_sources();
    mark_used(&mut sources, used_urls);

    let report = BalanceReport::compute(&sources, tolerance);
    debug!(
        total_used = report.total_used,
        target = report.target,
        shares = ?report.shares.iter().map(|s| (s.kind.as_str(), s.percent)).collect::<Vec<_>>(),
        "balance audit"
    );

    let answer = match report.note() {
        Some(note) => {
            warn!(%note, "sources are not equally balanced in the answer");
            format!("{note}\n\n{answer}")
        }
        None => answer.to_string(),
    };

    ResearchResult {
        query: query.to_string(),
        answer: normalize_answer(&answer),
        sources,
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(counts: &[(SourceKind, usize, usize)]) -> Vec<SearchResult> {
        let mut out = Vec::new();
        for &(kind, total, used) in counts {
            for i in 0..total {
                let mut s = SearchResult::new(
                    kind,
                    Some(format!("https://{}.example/{i}", kind.as_str())),
                    "T",
                );
                s.used = i < used;
                out.push(s);
            }
        }
        out
    }

    #[test]
    fn three_equal_kinds_are_balanced() {
        let report = BalanceReport::compute(
            &sources(&[
                (SourceKind::AiSearch, 3, 2),
                (SourceKind::WebSearch, 3, 2),
                (SourceKind::Custom, 2, 2),
            ]),
            10.0,
        );
        assert_eq!(report.target, 33);
        assert!(report.is_balanced());
        assert_eq!(report.note(), None);
        let total: u32 = report.shares.iter().map(|s| s.percent).sum();
        assert!((99..=101).contains(&total));
    }

    #[test]
    fn skew_names_each_side() {
        let report = BalanceReport::compute(
            &sources(&[(SourceKind::AiSearch, 4, 3), (SourceKind::WebSearch, 4, 1)]),
            10.0,
        );
        assert_eq!(report.target, 50);
        assert_eq!(
            report.note().as_deref(),
            Some(
                "[NOTE: This answer may not have equal representation from all source types. \
                 AI search sources (75%) are overrepresented. Web search sources (25%) are underrepresented.]"
            )
        );
    }

    #[test]
    fn balance_law_note_iff_deviation_exceeds_tolerance() {
        for ai in 0..=6usize {
            for web in 0..=6usize {
                for custom in 0..=3usize {
                    let mut counts = vec![
                        (SourceKind::AiSearch, 6, ai),
                        (SourceKind::WebSearch, 6, web),
                    ];
                    if custom > 0 {
                        counts.push((SourceKind::Custom, 3, custom));
                    }
                    let report = BalanceReport::compute(&sources(&counts), 10.0);
                    let total = ai + web + custom;
                    if total == 0 {
                        assert!(report.note().is_none());
                        continue;
                    }
                    let sum: u32 = report.shares.iter().map(|s| s.percent).sum();
                    assert!((98..=102).contains(&sum), "{ai}/{web}/{custom} summed to {sum}");
                    let outside = report
                        .shares
                        .iter()
                        .any(|s| (i64::from(s.percent) - i64::from(report.target)).abs() > 10);
                    assert_eq!(report.note().is_some(), outside, "{ai}/{web}/{custom}");
                }
            }
        }
    }

    #[test]
    fn single_kind_is_always_balanced() {
        let report = BalanceReport::compute(&sources(&[(SourceKind::WebSearch, 5, 2)]), 10.0);
        assert_eq!(report.target, 100);
        assert!(report.is_balanced());
    }

    #[test]
    fn mark_used_matches_dedup_keys() {
        let mut list = sources(&[(SourceKind::WebSearch, 3, 0)]);
        mark_used(&mut list, &["https://web-search.example/1/".to_string()]);
        let used: Vec<bool> = list.iter().map(|s| s.used).collect();
        assert_eq!(used, vec![false, true, false]);
    }

    #[test]
    fn finalize_prepends_note_and_normalizes() {
        let pool = CandidatePool::new(sources(&[
            (SourceKind::AiSearch, 2, 0),
            (SourceKind::WebSearch, 2, 0),
        ]));
        let used = vec![
            "https://web-search.example/0".to_string(),
            "https://web-search.example/1".to_string(),
        ];
        let result = finalize("q", "<p>Answer &amp; more</p>", pool, &used, 10.0);

        assert!(result.answer.starts_with(BALANCE_NOTE_PREFIX));
        assert!(result.answer.contains("AI search sources (0%) are underrepresented."));
        assert!(result.answer.ends_with("Answer & more"));
        assert_eq!(result.sources.iter().filter(|s| s.used).count(), 2);
        assert_eq!(result.query, "q");
    }

    #[test]
    fn finalize_without_used_sources_skips_audit() {
        let pool = CandidatePool::new(sources(&[(SourceKind::AiSearch, 1, 0), (SourceKind::WebSearch, 1, 0)]));
        let result = finalize("q", "Plain answer.", pool, &[], 10.0);
        assert_eq!(result.answer, "Plain answer.");
    }
}

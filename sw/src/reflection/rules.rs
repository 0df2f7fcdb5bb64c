//! Intervention rules over self-reports

use tracing::debug;

use crate::config::ReflectionConfig;
use crate::domain::{Decision, InterventionReason, ReflectionSignal, SelfReport};

/// Evaluate a report against the ordered rule list
///
/// `history` holds earlier reflections for the same step, oldest first. The
/// first matching rule wins.
pub fn evaluate(
    report: &SelfReport,
    history: &[ReflectionSignal],
    config: &ReflectionConfig,
) -> Option<InterventionReason> {
    debug!(
        progress = report.progress,
        confidence = report.confidence,
        blockers = report.blockers.len(),
        history = history.len(),
        "evaluate: called"
    );

    if report.decision == Decision::Escalate {
        return Some(InterventionReason::AgentEscalated);
    }
    if report.confidence < config.low_confidence_threshold {
        return Some(InterventionReason::LowConfidence);
    }
    if config.multi_blocker_threshold > 0 && report.blockers.len() >= config.multi_blocker_threshold {
        return Some(InterventionReason::MultipleBlockers);
    }
    if confidence_declining(report, history, config) {
        return Some(InterventionReason::ConfidenceDeclining);
    }
    if stalled(report, history, config.stall_window) {
        return Some(InterventionReason::Stalled);
    }
    None
}

/// Confidence fell by more than the threshold across a full trend window
fn confidence_declining(report: &SelfReport, history: &[ReflectionSignal], config: &ReflectionConfig) -> bool {
    let window = config.trend_window;
    if window < 2 || history.len() + 1 < window {
        return false;
    }
    let first = history[history.len() + 1 - window].confidence;
    first.saturating_sub(report.confidence) > config.confidence_drop_threshold
}

/// Progress has been zero for `window` consecutive reports including this one
fn stalled(report: &SelfReport, history: &[ReflectionSignal], window: usize) -> bool {
    if window == 0 || report.progress != 0 || history.len() + 1 < window {
        return false;
    }
    history.iter().rev().take(window - 1).all(|r| r.progress == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(progress: u8, confidence: u8) -> SelfReport {
        SelfReport {
            progress,
            confidence,
            blockers: Vec::new(),
            files_completed: Vec::new(),
            decision: Decision::Continue,
            notes: None,
        }
    }

    fn history(points: &[(u8, u8)]) -> Vec<ReflectionSignal> {
        points
            .iter()
            .enumerate()
            .map(|(i, &(p, c))| ReflectionSignal::new("w", 1, i as u32, report(p, c), 0))
            .collect()
    }

    #[test]
    fn test_healthy_report() {
        let config = ReflectionConfig::default();
        assert_eq!(evaluate(&report(50, 80), &[], &config), None);
    }

    #[test]
    fn test_escalation_wins_over_everything() {
        let config = ReflectionConfig::default();
        let mut r = report(0, 0);
        r.decision = Decision::Escalate;
        r.blockers = (0..10).map(|i| format!("blocker {}", i)).collect();
        let hist = history(&[(0, 100), (0, 90)]);
        assert_eq!(evaluate(&r, &hist, &config), Some(InterventionReason::AgentEscalated));
    }

    #[test]
    fn test_low_confidence_threshold_is_strict() {
        let config = ReflectionConfig::default();
        assert_eq!(
            evaluate(&report(50, 39), &[], &config),
            Some(InterventionReason::LowConfidence)
        );
        assert_eq!(evaluate(&report(50, 40), &[], &config), None);
    }

    #[test]
    fn test_multiple_blockers() {
        let config = ReflectionConfig::default();
        let mut r = report(50, 80);
        r.blockers = vec!["a".into(), "b".into()];
        assert_eq!(evaluate(&r, &[], &config), None);
        r.blockers.push("c".into());
        assert_eq!(evaluate(&r, &[], &config), Some(InterventionReason::MultipleBlockers));
    }

    #[test]
    fn test_confidence_declining_needs_full_window() {
        let config = ReflectionConfig::default();
        // Only two reports so far with a window of three
        assert_eq!(evaluate(&report(50, 45), &history(&[(40, 90)]), &config), None);
        assert_eq!(
            evaluate(&report(50, 45), &history(&[(20, 90), (40, 70)]), &config),
            Some(InterventionReason::ConfidenceDeclining)
        );
    }

    #[test]
    fn test_confidence_drop_must_exceed_threshold() {
        let config = ReflectionConfig::default();
        assert_eq!(evaluate(&report(50, 60), &history(&[(20, 90), (40, 70)]), &config), None);
    }

    #[test]
    fn test_confidence_window_uses_oldest_in_window() {
        let config = ReflectionConfig::default();
        // The 100 falls outside the three-report window
        let hist = history(&[(10, 100), (20, 70), (30, 70)]);
        assert_eq!(evaluate(&report(40, 60), &hist, &config), None);
    }

    #[test]
    fn test_stalled() {
        let config = ReflectionConfig::default();
        assert_eq!(evaluate(&report(0, 80), &history(&[(0, 80)]), &config), None);
        assert_eq!(
            evaluate(&report(0, 80), &history(&[(0, 80), (0, 80)]), &config),
            Some(InterventionReason::Stalled)
        );
        assert_eq!(evaluate(&report(0, 80), &history(&[(10, 80), (0, 80)]), &config), None);
    }
}

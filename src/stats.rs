//! Generation statistics shown under an assistant turn.

use crate::types::{ConversationTurn, UsageMetrics};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationStats {
    pub usage: Option<UsageMetrics>,
    pub elapsed_ms: Option<u64>,
}

impl GenerationStats {
    /// None when the turn has neither usage nor timing
    pub fn from_turn(turn: &ConversationTurn) -> Option<Self> {
        Self::new(turn.usage, turn.elapsed_ms)
    }

    pub fn new(usage: Option<UsageMetrics>, elapsed_ms: Option<u64>) -> Option<Self> {
        if usage.is_none() && elapsed_ms.is_none() {
            return None;
        }
        Some(Self { usage, elapsed_ms })
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.elapsed_ms.map(|ms| ms as f64 / 1000.0)
    }

    /// Output tokens per second; only positive rates are reported
    pub fn tokens_per_second(&self) -> Option<f64> {
        let secs = self.duration_secs()?;
        if secs <= 0.0 {
            return None;
        }

        let output = self.usage.map(|u| u.completion_tokens).unwrap_or(0);
        let rate = output as f64 / secs;
        (rate > 0.0).then_some(rate)
    }
}

impl fmt::Display for GenerationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(usage) = self.usage {
            parts.push(format!("{} in", usage.prompt_tokens));
            parts.push(format!("{} out", usage.completion_tokens));
        }
        if let Some(rate) = self.tokens_per_second() {
            parts.push(format!("{:.1} t/s", rate));
        }
        if let Some(secs) = self.duration_secs() {
            parts.push(format!("{:.2}s", secs));
        }

        write!(f, "{}", parts.join(" · "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_stats_without_usage_or_timing() {
        assert!(GenerationStats::new(None, None).is_none());
        assert!(GenerationStats::from_turn(&ConversationTurn::assistant_placeholder()).is_none());
    }

    #[test]
    fn test_tokens_per_second() {
        let stats = GenerationStats::new(Some(UsageMetrics::new(20, 50)), Some(2000)).unwrap();

        assert_eq!(stats.duration_secs(), Some(2.0));
        assert_eq!(stats.tokens_per_second(), Some(25.0));
        assert_eq!(stats.to_string(), "20 in · 50 out · 25.0 t/s · 2.00s");
    }

    #[test]
    fn test_zero_rate_is_hidden() {
        let stats = GenerationStats::new(Some(UsageMetrics::new(20, 0)), Some(1500)).unwrap();

        assert!(stats.tokens_per_second().is_none());
        assert_eq!(stats.to_string(), "20 in · 0 out · 1.50s");
    }

    #[test]
    fn test_timing_only() {
        let stats = GenerationStats::new(None, Some(0)).unwrap();

        assert!(stats.tokens_per_second().is_none());
        assert_eq!(stats.to_string(), "0.00s");
    }
}

//! Instantaneous and exponentially-smoothed risk scoring.

use serde::{Deserialize, Serialize};

/// Contextual signals evaluated alongside rule matches for one token.
///
/// `repeated` and `quoted` are first-class scoring inputs but no detection
/// logic exists for them yet; callers wire them to `false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    pub near_tool_call: bool,
    pub in_think: bool,
    pub repeated: bool,
    pub quoted: bool,
}

/// Additive score adjustments for context signals. `quoted` is a dampening
/// signal and carries a negative value by default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Boosts {
    pub near_tool: f64,
    pub in_think: f64,
    pub repetition: f64,
    pub quoted: f64,
}

impl Default for Boosts {
    fn default() -> Self {
        Self {
            near_tool: 0.10,
            in_think: 0.10,
            repetition: 0.05,
            quoted: -0.10,
        }
    }
}

/// One matched rule's contribution to a score, as published in
/// `ScoreUpdate.contributors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contributor {
    pub category: String,
    pub weight: f64,
}

/// Result of scoring one token.
#[derive(Debug, Clone)]
pub struct Score {
    pub instant: f64,
    pub ewma: f64,
    pub contributors: Vec<Contributor>,
}

/// Per-session running EWMA over instantaneous token scores.
///
/// The decay factor is `α = 2/(span+1)`, the standard span-form smoothing
/// constant, applied once per evaluated token.
#[derive(Debug)]
pub struct Scorer {
    span: f64,
    ewma: f64,
    token_count: u64,
}

impl Scorer {
    pub fn new(ewma_span_tokens: u32) -> Self {
        Self {
            span: f64::from(ewma_span_tokens.max(1)),
            ewma: 0.0,
            token_count: 0,
        }
    }

    /// Tokens scored so far for this session.
    pub fn token_count(&self) -> u64 {
        self.token_count
    }

    /// Score one token: instant = max matched weight plus context boosts,
    /// clamped to [0,1]; then fold the instant value into the running EWMA.
    pub fn compute(&mut self, matched: &[Contributor], ctx: Context, boosts: &Boosts) -> Score {
        let base = matched.iter().fold(0.0_f64, |max, c| max.max(c.weight));
        let mut instant = base;
        if ctx.near_tool_call {
            instant += boosts.near_tool;
        }
        if ctx.in_think {
            instant += boosts.in_think;
        }
        if ctx.repeated {
            instant += boosts.repetition;
        }
        if ctx.quoted {
            instant += boosts.quoted;
        }
        let instant = instant.clamp(0.0, 1.0);

        self.token_count += 1;
        let alpha = 2.0 / (self.span + 1.0);
        self.ewma += alpha * (instant - self.ewma);

        Score {
            instant,
            ewma: self.ewma,
            contributors: matched.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contributor(weight: f64) -> Contributor {
        Contributor {
            category: "DECEPTION".to_string(),
            weight,
        }
    }

    #[test]
    fn test_instant_is_max_weight() {
        let mut scorer = Scorer::new(1000);
        let score = scorer.compute(
            &[contributor(0.3), contributor(0.75), contributor(0.5)],
            Context::default(),
            &Boosts::default(),
        );
        assert_eq!(score.instant, 0.75);
        assert_eq!(score.contributors.len(), 3);
    }

    #[test]
    fn test_boosts_apply_and_clamp() {
        let mut scorer = Scorer::new(1000);
        let ctx = Context {
            near_tool_call: true,
            in_think: true,
            repeated: true,
            quoted: false,
        };
        let score = scorer.compute(&[contributor(0.9)], ctx, &Boosts::default());
        // 0.9 + 0.1 + 0.1 + 0.05 clamps to 1.0.
        assert_eq!(score.instant, 1.0);
    }

    #[test]
    fn test_quoted_dampens() {
        let mut scorer = Scorer::new(1000);
        let ctx = Context {
            quoted: true,
            ..Context::default()
        };
        let score = scorer.compute(&[contributor(0.75)], ctx, &Boosts::default());
        assert!((score.instant - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_ewma_converges_with_span() {
        // span=5 → α=1/3; four 0.75 tokens walk the EWMA past 0.60.
        let mut scorer = Scorer::new(5);
        let boosts = Boosts::default();
        let mut last = 0.0;
        for _ in 0..4 {
            last = scorer
                .compute(&[contributor(0.75)], Context::default(), &boosts)
                .ewma;
        }
        assert!(last > 0.60, "ewma after 4 tokens: {last}");
        assert_eq!(scorer.token_count(), 4);
    }

    #[test]
    fn test_ewma_moves_slowly_at_default_span() {
        let mut scorer = Scorer::new(1000);
        let score = scorer.compute(&[contributor(1.0)], Context::default(), &Boosts::default());
        assert!(score.ewma < 0.01);
    }

    #[test]
    fn test_no_matches_scores_zero() {
        let mut scorer = Scorer::new(10);
        let score = scorer.compute(&[], Context::default(), &Boosts::default());
        assert_eq!(score.instant, 0.0);
        assert_eq!(score.ewma, 0.0);
    }
}

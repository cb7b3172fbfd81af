//! Content served behind the insight gate.
//!
//! The gate does not care what the insight is; anything implementing
//! [`InsightProvider`] can be plugged in.

use futures::future::BoxFuture;
use rand::seq::SliceRandom;
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;

/// One unit of premium insight content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Insight {
    /// Prediction text.
    pub prediction: String,
    /// Confidence percentage, two decimal places.
    pub confidence: Decimal,
}

/// Source of insight content.
pub trait InsightProvider: Send + Sync + 'static {
    /// Produce an insight for `subject`.
    fn next_insight<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Insight>;
}

const PLACEHOLDER_PREDICTIONS: [&str; 5] = [
    "Strong upward momentum detected. Bullish outlook for the next 30s.",
    "Market showing signs of resistance. Potential downward correction.",
    "Indicators suggest a low-volatility consolidation phase.",
    "Oversold conditions met. Statistical probability of a bounce is high.",
    "Current price action mimics a historical breakout pattern. Expect volatility UP.",
];

/// Fixed placeholder predictions with a random confidence in `[80, 95)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderInsights;

impl PlaceholderInsights {
    fn pick() -> Insight {
        let mut rng = rand::thread_rng();
        let prediction = PLACEHOLDER_PREDICTIONS
            .choose(&mut rng)
            .copied()
            .unwrap_or(PLACEHOLDER_PREDICTIONS[0]);
        // Hundredths of a percent: 8000..9500 is 80.00..94.99.
        let hundredths: i64 = rng.gen_range(8_000..9_500);
        Insight {
            prediction: prediction.to_string(),
            confidence: Decimal::new(hundredths, 2),
        }
    }
}

impl InsightProvider for PlaceholderInsights {
    fn next_insight<'a>(&'a self, _subject: &'a str) -> BoxFuture<'a, Insight> {
        let insight = Self::pick();
        Box::pin(async move { insight })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_placeholder_confidence_range() {
        let provider = PlaceholderInsights;
        for _ in 0..200 {
            let insight = provider.next_insight("0xalice").await;
            assert!(insight.confidence >= Decimal::new(80, 0));
            assert!(insight.confidence < Decimal::new(95, 0));
            assert_eq!(insight.confidence.scale(), 2);
            assert!(PLACEHOLDER_PREDICTIONS.contains(&insight.prediction.as_str()));
        }
    }
}

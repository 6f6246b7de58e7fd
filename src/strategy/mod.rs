//! Strategy engine.
//!
//! The correlation-crack strategy watches a small group of correlated
//! instruments and fires when exactly one of them breaks its reference
//! level while the rest hold theirs.

pub mod correlation_crack;
pub mod cross_detector;

pub use correlation_crack::{
    confidence_score, ChannelSink, CorrelationCrackConfig, CorrelationCrackStrategy, RunPhase,
    SignalSink, StrategyError, StrategyResult,
};
pub use cross_detector::{detect_cross, CrossResult, DEFAULT_CROSS_LOOKBACK};

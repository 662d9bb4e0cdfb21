//! Pattern screening: parameters, classifier and its verdicts.

pub mod classifier;
pub mod params;
pub mod result;

pub use classifier::PatternClassifier;
pub use params::{BreakoutRule, ClassifierParams, PriceRule, TrendTest};
pub use result::{Degenerate, RejectReason, ScreenResult, Verdict};

pub mod classifier;
pub mod patterns;

pub use classifier::{
    default_blocklist, default_whitelist, split_segments, Assessment, ClassifierConfig,
    RiskClassifier,
};
pub use patterns::{matches, Anchoring, MatchOutcome, Pattern, PatternError, PatternKind, PatternSet};

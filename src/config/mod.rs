pub mod normalizer;

pub use normalizer::{
    is_system_overrides_file, MatcherStrategy, NormalizerConfig, NormalizerConfigBuilder,
    TraceSelector, DEFAULT_SYSTEM_RULES,
};

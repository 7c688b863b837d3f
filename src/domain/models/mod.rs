pub mod config;
pub mod diagnosis;
pub mod run;
pub mod score;

pub use config::{
    Config, HealingConfig, LogFormat, LoggingConfig, PublishConfig, ReasoningConfig,
    ResultsConfig, RetryConfig, RotationPolicy, SandboxConfig, SandboxMode, ScoringConfig,
    StackTemplate,
};
pub use diagnosis::{Anchor, AnchorKind, BugCategory, Diagnosis, FixRecord};
pub use run::{HealingRequest, Phase, RunState, RunStatus, Stack, TimelineEvent};
pub use score::{RunResultRecord, ScoreBreakdown};

pub mod anchor_resolver;
pub mod diagnosis_gateway;
pub mod log_signals;
pub mod orchestrator;
pub mod patch_gateway;
pub mod publisher;
pub mod retry;
pub mod run_registry;
pub mod scoring;
pub mod source_tree;

pub use anchor_resolver::{AnchorDecision, AnchorResolver, DiagnosisContext};
pub use diagnosis_gateway::{DiagnosisGateway, DiagnosisRequest};
pub use log_signals::{LogSignalExtractor, LogSignals};
pub use orchestrator::{next_phase, Orchestrator, OrchestratorPorts, PhaseOutcome};
pub use patch_gateway::{PatchGateway, PatchRequest};
pub use publisher::{branch_name, PublishOutcome, Publisher};
pub use retry::RetryPolicy;
pub use run_registry::{RunEntry, RunRegistry};
pub use scoring::{ScoreCalculator, ScoreInputs};
pub use source_tree::SourceTree;

//! Application layer: use-case wiring over the orchestration services.

pub mod healing_service;

pub use healing_service::HealingService;

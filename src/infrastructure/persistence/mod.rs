//! Persisted run results

pub mod results_store;

pub use results_store::JsonResultsStore;

//! Vigil AI triage agent (S5)
//!
//! Consumes `alerts.contextualized` and produces the final triage result:
//! a deterministic weighted risk score, qualitative LLM analysis routed
//! through the model router, and merged remediation guidance. Results land
//! in `triage_results` and on `alerts.result`.

pub mod handler;
pub mod llm;
pub mod parse;
pub mod prompts;
pub mod scoring;
pub mod similar;

pub use handler::TriageHandler;

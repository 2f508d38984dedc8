pub mod auditor;
pub mod cache;
pub mod orchestrator;
pub mod payload;
pub mod retry;

#[cfg(test)]
mod test_support;

pub use auditor::{AuditError, CognitiveAuditor, HttpAuditor};
pub use orchestrator::{AuditSnapshot, Orchestrator, StatusRecord, TickOutcome};

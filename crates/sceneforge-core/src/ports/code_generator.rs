//! CodeGenerator port - produces component source for a scene plan.
//!
//! In production this is backed by an LLM; the core only depends on the
//! contract.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ScenePlan;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct GenerationError(pub String);

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Produce module-style component source (import/export syntax, no JSX).
    async fn generate(&self, plan: &ScenePlan) -> Result<String, GenerationError>;

    /// Propose a repaired source for a failed build. `None` means the
    /// generator has nothing better to offer.
    async fn repair(&self, _source: &str, _error: &str) -> Result<Option<String>, GenerationError> {
        Ok(None)
    }
}

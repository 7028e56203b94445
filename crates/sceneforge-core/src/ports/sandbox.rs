//! Sandbox port - restricted execution boundary for generated scripts.
//!
//! Generated code is untrusted: implementations must run it outside the
//! host process's trust domain and bound its time and memory.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the sandbox observed after running a script once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxReport {
    /// Whether the script assigned the global registration point.
    pub registered: bool,

    /// `name` of the registered component function, when it has one.
    pub component_name: Option<String>,

    /// Text content of one render of the registered component.
    #[serde(default)]
    pub rendered_text: String,

    /// Error a wrapped script caught while loading. The registered
    /// component is then the fallback.
    #[serde(default)]
    pub load_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("script did not register a component")]
    NotRegistered,

    #[error("sandbox timed out after {0:?}")]
    Timeout(Duration),

    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute `script` with stub host globals and report what it registered.
    async fn execute(&self, script: &str) -> Result<SandboxReport, SandboxError>;
}

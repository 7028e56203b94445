//! Build pipeline - turns untrusted generated module source into a
//! self-registering classic script.
//!
//! Steps:
//! 1. structural pre-check and comment stripping (`syntax`)
//! 2. component detection (`detect`)
//! 3. import/export rewriting (`rewrite`)
//! 4. scope wrapping and registration (`wrap`)
//! 5. one execution in the sandbox
//!
//! Any failure yields the deterministic fallback script instead; `build`
//! has no error path.

pub mod analysis;
pub mod detect;
pub mod fallback;
pub mod repair;
pub mod rewrite;
pub mod syntax;
pub mod wrap;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::ports::{Sandbox, SandboxReport};

pub use self::analysis::{Diagnostic, DiagnosticCode, Severity, analyze};
pub use self::detect::{DetectedExport, DetectionMethod, ExportTarget, detect_component};
pub use self::fallback::{FALLBACK_COMPONENT_NAME, fallback_script};
pub use self::repair::{Repair, RepairStep, repair_source};
pub use self::syntax::{SyntaxIssue, check_structure};

/// Global the host page reads the loaded component from.
pub const REGISTRATION_GLOBAL: &str = "window.__REMOTION_COMPONENT";

/// Set by a wrapped script when its module body throws while loading.
pub const LOAD_ERROR_GLOBAL: &str = "window.__REMOTION_LOAD_ERROR";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxIssue),

    #[error("no component export found")]
    MissingExport,
}

/// Output of the pure transform steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedModule {
    pub script: String,
    pub export: DetectedExport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Compiled { report: SandboxReport },
    Fallback { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Script to publish: the transformed module, or the fallback.
    pub script: String,
    pub outcome: BuildOutcome,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildOutput {
    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Fallback { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            BuildOutcome::Fallback { error } => Some(error),
            BuildOutcome::Compiled { .. } => None,
        }
    }

    pub fn diagnostic_lines(&self) -> Vec<String> {
        self.diagnostics.iter().map(ToString::to_string).collect()
    }
}

/// Transform steps 1-4. Pure; does not execute anything.
pub fn transform(source: &str) -> Result<TransformedModule, TransformError> {
    let scanned = syntax::scan(source);
    if let Some(issue) = scanned.issue {
        return Err(TransformError::Syntax(issue));
    }
    let export = detect_component(&scanned.stripped).ok_or(TransformError::MissingExport)?;
    let body = rewrite::rewrite_exports(&rewrite::rewrite_imports(&scanned.stripped));
    let script = wrap::wrap_module(&body, &export);
    Ok(TransformedModule { script, export })
}

#[derive(Clone)]
pub struct BuildPipeline {
    sandbox: Arc<dyn Sandbox>,
}

impl BuildPipeline {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }

    pub async fn build(&self, source: &str) -> BuildOutput {
        let diagnostics = analyze(&syntax::strip_comments(source));

        let module = match transform(source) {
            Ok(module) => module,
            Err(e) => return Self::fallback(e.to_string(), diagnostics),
        };
        debug!(method = ?module.export.method, component = ?module.export.name(), "component detected");

        match self.sandbox.execute(&module.script).await {
            Ok(SandboxReport {
                load_error: Some(error),
                ..
            }) => Self::fallback(format!("runtime error: {error}"), diagnostics),
            Ok(report) if report.registered => BuildOutput {
                script: module.script,
                outcome: BuildOutcome::Compiled { report },
                diagnostics,
            },
            Ok(_) => Self::fallback("script did not register a component".to_string(), diagnostics),
            Err(e) => Self::fallback(e.to_string(), diagnostics),
        }
    }

    fn fallback(error: String, diagnostics: Vec<Diagnostic>) -> BuildOutput {
        warn!(%error, "component build failed; using fallback");
        BuildOutput {
            script: fallback_script(&error),
            outcome: BuildOutcome::Fallback { error },
            diagnostics,
        }
    }
}

impl std::fmt::Debug for BuildPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildPipeline").finish_non_exhaustive()
    }
}

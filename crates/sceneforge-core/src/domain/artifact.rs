//! Task artifacts: things produced while a task is worked on.
//!
//! Artifacts are append-only on a task. The content stays flexible JSON so new
//! kinds can be added without touching the lifecycle code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::ids::ArtifactId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Structured scene plan derived from the prompt.
    ScenePlan,

    /// Generated component source, as received from the code generator.
    ComponentSource,

    /// Address of a compiled, loadable component script.
    CompiledComponent,

    /// Inline fallback component produced after a failed build.
    FallbackComponent,

    /// Static-analysis findings for a build.
    Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: ArtifactId,
    pub name: String,
    pub kind: ArtifactKind,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, kind: ArtifactKind, content: serde_json::Value) -> Self {
        Self {
            artifact_id: ArtifactId::from_ulid(Ulid::new()),
            name: name.into(),
            kind,
            content,
            created_at: Utc::now(),
        }
    }
}

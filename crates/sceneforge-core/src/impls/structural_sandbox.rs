//! Sandbox that never executes anything.
//!
//! Used where no JS runtime is installed: the script only has to be
//! structurally sound and contain the registration assignment.

use async_trait::async_trait;

use crate::pipeline::{REGISTRATION_GLOBAL, check_structure};
use crate::ports::{Sandbox, SandboxError, SandboxReport};

#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralSandbox;

#[async_trait]
impl Sandbox for StructuralSandbox {
    async fn execute(&self, script: &str) -> Result<SandboxReport, SandboxError> {
        check_structure(script).map_err(|issue| SandboxError::Syntax(issue.to_string()))?;
        let assignment = format!("{REGISTRATION_GLOBAL} =");
        if !script.contains(&assignment) {
            return Err(SandboxError::NotRegistered);
        }
        Ok(SandboxReport {
            registered: true,
            component_name: None,
            rendered_text: String::new(),
            load_error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_registering_scripts() {
        let report = StructuralSandbox
            .execute("window.__REMOTION_COMPONENT = function A() {};")
            .await
            .unwrap();
        assert!(report.registered);
    }

    #[tokio::test]
    async fn rejects_unbalanced_scripts() {
        let err = StructuralSandbox.execute("(function () {").await.unwrap_err();
        assert!(matches!(err, SandboxError::Syntax(_)));
    }

    #[tokio::test]
    async fn rejects_scripts_without_registration() {
        let err = StructuralSandbox.execute("var a = 1;").await.unwrap_err();
        assert!(matches!(err, SandboxError::NotRegistered));
    }
}

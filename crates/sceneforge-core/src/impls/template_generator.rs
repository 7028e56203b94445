//! Deterministic code generator: renders a fixed title-card component from
//! the scene plan. Stands in for the LLM-backed generator in development
//! and tests.

use async_trait::async_trait;

use crate::domain::ScenePlan;
use crate::ports::{CodeGenerator, GenerationError};

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateCodeGenerator;

fn js(s: &str) -> Result<String, GenerationError> {
    serde_json::to_string(s).map_err(|e| GenerationError(e.to_string()))
}

#[async_trait]
impl CodeGenerator for TemplateCodeGenerator {
    async fn generate(&self, plan: &ScenePlan) -> Result<String, GenerationError> {
        let caption = match &plan.caption {
            Some(c) => format!(
                "React.createElement(\"p\", {{ style: {{ fontSize: 40, opacity: opacity }} }}, {})",
                js(c)?
            ),
            None => "null".to_string(),
        };
        Ok(format!(
            r#"import React from 'react';
import {{ AbsoluteFill, interpolate, useCurrentFrame, useVideoConfig }} from 'remotion';

export default function {name}() {{
  const frame = useCurrentFrame();
  const {{ durationInFrames }} = useVideoConfig();
  const opacity = interpolate(frame, [0, 20], [0, 1], {{ extrapolateRight: 'clamp' }});
  const scale = interpolate(frame, [0, durationInFrames], [0.9, 1.1]);
  return React.createElement(
    AbsoluteFill,
    {{ style: {{ backgroundColor: {background}, color: {text}, justifyContent: 'center', alignItems: 'center', fontFamily: 'sans-serif' }} }},
    React.createElement("h1", {{ style: {{ fontSize: 96, color: {accent}, opacity: opacity, transform: 'scale(' + scale + ')' }} }}, {headline}),
    {caption}
  );
}}
"#,
            name = plan.component_name,
            background = js(&plan.palette.background)?,
            text = js(&plan.palette.text)?,
            accent = js(&plan.palette.accent)?,
            headline = js(&plan.headline)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DiagnosticCode, analyze, transform};

    #[tokio::test]
    async fn generated_source_transforms_cleanly() {
        let plan = ScenePlan::from_prompt("Launch day. Doors open at \"9\"");
        let src = TemplateCodeGenerator.generate(&plan).await.unwrap();
        let module = transform(&src).unwrap();
        assert_eq!(module.export.name(), Some(plan.component_name.as_str()));

        let codes: Vec<_> = analyze(&src).into_iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::MissingRegistration]);
    }

    #[tokio::test]
    async fn generation_is_deterministic() {
        let plan = ScenePlan::from_prompt("spinning logo");
        let a = TemplateCodeGenerator.generate(&plan).await.unwrap();
        let b = TemplateCodeGenerator.generate(&plan).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn default_repair_offers_nothing() {
        let repaired = TemplateCodeGenerator.repair("x", "boom").await.unwrap();
        assert_eq!(repaired, None);
    }
}

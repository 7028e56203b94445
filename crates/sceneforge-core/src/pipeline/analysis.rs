//! Static analysis of generated source. Diagnostic only: nothing here
//! blocks a build.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::detect::detect_component;
use super::rewrite::unsupported_imports;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCode {
    MissingExport,
    MissingRegistration,
    MissingFrameHook,
    MissingAbsoluteFill,
    UnsupportedImport,
    DisallowedApi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
        };
        write!(f, "[{severity}] {}", self.message)
    }
}

static DISALLOWED: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("eval", r"\beval\s*\("),
        ("new Function", r"\bnew\s+Function\b"),
        ("fetch", r"\bfetch\s*\("),
        ("XMLHttpRequest", r"\bXMLHttpRequest\b"),
        ("localStorage", r"\blocalStorage\b"),
        ("document.cookie", r"\bdocument\s*\.\s*cookie\b"),
        ("require", r"\brequire\s*\("),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid disallowed api regex")))
    .collect()
});

static FRAME_HOOK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\buseCurrentFrame\b").expect("valid regex"));
static ABSOLUTE_FILL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bAbsoluteFill\b").expect("valid regex"));
static REGISTRATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"window\s*\.\s*__REMOTION_COMPONENT\b").expect("valid regex"));

/// Analyse comment-stripped source.
pub fn analyze(stripped: &str) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let mut push = |code, severity, message: String| out.push(Diagnostic { code, severity, message });

    if detect_component(stripped).is_none() {
        push(
            DiagnosticCode::MissingExport,
            Severity::Warning,
            "no exported or conventionally named component found".to_string(),
        );
    }
    if !REGISTRATION.is_match(stripped) {
        push(
            DiagnosticCode::MissingRegistration,
            Severity::Info,
            "source does not register itself; the build adds the registration".to_string(),
        );
    }
    if !FRAME_HOOK.is_match(stripped) {
        push(
            DiagnosticCode::MissingFrameHook,
            Severity::Warning,
            "useCurrentFrame is never called; the scene will not animate".to_string(),
        );
    }
    if !ABSOLUTE_FILL.is_match(stripped) {
        push(
            DiagnosticCode::MissingAbsoluteFill,
            Severity::Info,
            "AbsoluteFill is not used; the component may not fill the frame".to_string(),
        );
    }
    for module in unsupported_imports(stripped) {
        push(
            DiagnosticCode::UnsupportedImport,
            Severity::Warning,
            format!("import from unsupported module {module:?} will be removed"),
        );
    }
    for (name, pattern) in DISALLOWED.iter() {
        if pattern.is_match(stripped) {
            push(
                DiagnosticCode::DisallowedApi,
                Severity::Warning,
                format!("disallowed API used: {name}"),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CLEAN: &str = r#"import { AbsoluteFill, useCurrentFrame } from 'remotion';
export default function Clean() {
  const frame = useCurrentFrame();
  return React.createElement(AbsoluteFill, null, String(frame));
}"#;

    fn codes(src: &str) -> Vec<DiagnosticCode> {
        analyze(src).into_iter().map(|d| d.code).collect()
    }

    #[test]
    fn clean_source_only_notes_registration() {
        assert_eq!(codes(CLEAN), vec![DiagnosticCode::MissingRegistration]);
    }

    #[test]
    fn self_registering_source_has_no_registration_note() {
        let src = format!("{CLEAN}\nwindow.__REMOTION_COMPONENT = Clean;");
        assert!(codes(&src).is_empty());
    }

    #[rstest]
    #[case::eval("eval('1')", "eval")]
    #[case::new_function("new Function('return 1')", "new Function")]
    #[case::fetch("fetch('/x')", "fetch")]
    #[case::xhr("new XMLHttpRequest()", "XMLHttpRequest")]
    #[case::storage("localStorage.getItem('k')", "localStorage")]
    #[case::cookie("document.cookie = 'a=b'", "document.cookie")]
    #[case::require("const fs = require('fs')", "require")]
    fn flags_disallowed_apis(#[case] snippet: &str, #[case] name: &str) {
        let src = format!("{CLEAN}\n{snippet};");
        let found = analyze(&src);
        let hit = found
            .iter()
            .find(|d| d.code == DiagnosticCode::DisallowedApi)
            .expect("disallowed api diagnostic");
        assert_eq!(hit.severity, Severity::Warning);
        assert!(hit.message.ends_with(name), "{}", hit.message);
    }

    #[test]
    fn flags_missing_hooks_and_unsupported_imports() {
        let src = "import gsap from 'gsap';\nexport default function A() { return null; }";
        let found = codes(src);
        assert!(found.contains(&DiagnosticCode::MissingFrameHook));
        assert!(found.contains(&DiagnosticCode::MissingAbsoluteFill));
        assert!(found.contains(&DiagnosticCode::UnsupportedImport));
        assert!(!found.contains(&DiagnosticCode::MissingExport));
    }

    #[test]
    fn display_is_prefixed_with_severity() {
        let d = Diagnostic {
            code: DiagnosticCode::MissingFrameHook,
            severity: Severity::Warning,
            message: "m".into(),
        };
        assert_eq!(d.to_string(), "[warning] m");
    }
}

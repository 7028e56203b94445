//! Deterministic source repairs tried before asking the code generator.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::detect::detect_component;
use super::syntax::{IssueKind, scan};

static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)(?:\r?\n)?```").expect("valid fence regex")
});

static LAST_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:(?:async\s+)?function\s*\*?\s*|(?:const|let|var)\s+)([A-Za-z_$][\w$]*)")
        .expect("valid declaration regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStep {
    StripFences,
    DedupeImports,
    CloseBrackets,
    AddDefaultExport,
}

impl RepairStep {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairStep::StripFences => "strip_fences",
            RepairStep::DedupeImports => "dedupe_imports",
            RepairStep::CloseBrackets => "close_brackets",
            RepairStep::AddDefaultExport => "add_default_export",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    pub source: String,
    pub steps: Vec<RepairStep>,
}

/// Apply every repair that changes something. `None` when nothing applied.
pub fn repair_source(source: &str) -> Option<Repair> {
    let mut steps = Vec::new();
    let mut current = source.to_string();

    if let Some(inner) = FENCE.captures(&current).map(|c| c[1].to_string()) {
        current = inner;
        steps.push(RepairStep::StripFences);
    }

    let deduped = dedupe_imports(&current);
    if deduped != current {
        current = deduped;
        steps.push(RepairStep::DedupeImports);
    }

    // Truncated output is the common case: close what is still open.
    let scanned = scan(&current);
    if let Some(issue) = scanned.issue
        && let IssueKind::Unclosed { closers } = issue.kind
    {
        current.push('\n');
        current.push_str(&closers.chars().map(String::from).collect::<Vec<_>>().join("\n"));
        current.push('\n');
        steps.push(RepairStep::CloseBrackets);
    }

    let stripped = scan(&current).stripped;
    if detect_component(&stripped).is_none()
        && let Some(name) = LAST_FUNCTION.captures_iter(&stripped).last().map(|c| c[1].to_string())
    {
        current.push_str(&format!("\nexport default {name};\n"));
        steps.push(RepairStep::AddDefaultExport);
    }

    (!steps.is_empty()).then_some(Repair { source: current, steps })
}

fn dedupe_imports(source: &str) -> String {
    let mut seen = HashSet::new();
    source
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.starts_with("import ") || seen.insert(trimmed.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
        + if source.ends_with('\n') { "\n" } else { "" }
}

//! Module syntax rewriting.
//!
//! The wrapped script runs as a classic script, so `import`/`export` must
//! go. Host modules become destructuring from the injected globals,
//! everything else is dropped; exports become assignments on `__exports`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::detect::export_list_items;

/// Modules the host page provides as globals.
pub const HOST_MODULES: &[(&str, &str)] = &[("react", "React"), ("remotion", "Remotion")];

static SIDE_EFFECT_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s*['"][^'"\n]+['"][ \t]*;?"#).expect("valid side-effect import regex")
});

static IMPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s+(type\s+)?([^;'"]*?)\s*from\s*['"]([^'"\n]+)['"][ \t]*;?"#)
        .expect("valid import regex")
});

static EXPORT_STAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s*\*[^;\n]*;?"#).expect("valid export star regex")
});

static EXPORT_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s*\{([^}]*)\}(\s*from\s*['"][^'"]*['"])?[ \t]*;?"#)
        .expect("valid export list regex")
});

static EXPORT_DEFAULT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)export\s+default\s+((?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)|class\s+([A-Za-z_$][\w$]*))")
        .expect("valid default declaration regex")
});

static EXPORT_DEFAULT_EXPR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)export\s+default\s+").expect("valid default expression regex"));

static EXPORT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)export\s+((?:const|let|var|(?:async\s+)?function\s*\*?|class)\s+([A-Za-z_$][\w$]*))")
        .expect("valid export declaration regex")
});

static EXPORT_LEFTOVER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)export\s+").expect("valid export keyword regex"));

/// Module specifiers that were dropped because the host does not provide them.
pub fn unsupported_imports(stripped: &str) -> Vec<String> {
    let bare = SIDE_EFFECT_IMPORT.find_iter(stripped).filter_map(|m| {
        let s = m.as_str();
        let start = s.find(['\'', '"'])? + 1;
        let end = s[start..].find(['\'', '"'])? + start;
        Some(s[start..end].to_string())
    });
    let from = IMPORT_FROM.captures_iter(stripped).map(|c| c[3].to_string());
    let mut modules: Vec<String> = bare.chain(from).filter(|m| host_global(m).is_none()).collect();
    modules.dedup();
    modules
}

fn host_global(module: &str) -> Option<&'static str> {
    HOST_MODULES
        .iter()
        .find(|(name, _)| *name == module)
        .map(|(_, global)| *global)
}

pub fn rewrite_imports(stripped: &str) -> String {
    let without_bare = SIDE_EFFECT_IMPORT.replace_all(stripped, "");
    IMPORT_FROM
        .replace_all(&without_bare, |c: &Captures<'_>| {
            if c.get(1).is_some() {
                return String::new();
            }
            match host_global(&c[3]) {
                Some(global) => bindings_for(&c[2], global),
                None => String::new(),
            }
        })
        .into_owned()
}

/// Translate an import clause into declarations bound to `global`.
fn bindings_for(clause: &str, global: &str) -> String {
    let mut out = Vec::new();
    let mut rest = clause.trim();

    let named = match (rest.find('{'), rest.rfind('}')) {
        (Some(open), Some(close)) if open < close => {
            let inner = &rest[open + 1..close];
            rest = rest[..open].trim().trim_end_matches(',').trim();
            Some(inner)
        }
        _ => None,
    };

    for part in rest.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let binding = match part.strip_prefix('*') {
            Some(ns) => ns.trim().strip_prefix("as").map(str::trim),
            None => Some(part),
        };
        match binding {
            Some(b) if !b.is_empty() && b != global => out.push(format!("const {b} = {global};")),
            _ => {}
        }
    }

    if let Some(inner) = named {
        let fields: Vec<String> = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.starts_with("type "))
            .filter_map(|s| {
                let mut parts = s.split_whitespace();
                let imported = parts.next()?;
                match (parts.next(), parts.next()) {
                    (Some("as"), Some(local)) if local != imported => Some(format!("{imported}: {local}")),
                    _ => Some(imported.to_string()),
                }
            })
            .collect();
        if !fields.is_empty() {
            out.push(format!("const {{ {} }} = {global};", fields.join(", ")));
        }
    }

    out.join("\n")
}

pub fn rewrite_exports(source: &str) -> String {
    let mut trailing: Vec<String> = Vec::new();

    let src = EXPORT_STAR.replace_all(source, "");
    let src = EXPORT_LIST.replace_all(&src, |c: &Captures<'_>| {
        if c.get(2).is_some() {
            return String::new();
        }
        export_list_items(&c[1])
            .into_iter()
            .map(|(local, exported)| format!("__exports.{exported} = {local};"))
            .collect::<Vec<_>>()
            .join(" ")
    });
    let src = EXPORT_DEFAULT_DECL.replace_all(&src, |c: &Captures<'_>| {
        if let Some(name) = c.get(3).or_else(|| c.get(4)) {
            trailing.push(format!("__exports.default = {};", name.as_str()));
        }
        format!("{}{}", &c[1], &c[2])
    });
    let src = EXPORT_DEFAULT_EXPR.replace_all(&src, "${1}__exports.default = ");
    let src = EXPORT_DECL.replace_all(&src, |c: &Captures<'_>| {
        trailing.push(format!("__exports.{0} = {0};", &c[3]));
        format!("{}{}", &c[1], &c[2])
    });
    let mut out = EXPORT_LEFTOVER.replace_all(&src, "${1}").into_owned();

    if !trailing.is_empty() {
        out.push('\n');
        out.push_str(&trailing.join("\n"));
        out.push('\n');
    }
    out
}

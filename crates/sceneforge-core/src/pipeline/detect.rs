//! Component export detection.
//!
//! Strategies are tried in a fixed order; the first hit wins:
//! 1. default export
//! 2. named export
//! 3. conventional component names
//! 4. first top-level capitalised function-valued declaration
//! 5. source that assigns the registration global itself
//!
//! Input is expected to be comment-stripped (see `syntax::strip_comments`).

use once_cell::sync::Lazy;
use regex::Regex;

use super::REGISTRATION_GLOBAL;

pub const CONVENTIONAL_NAMES: &[&str] = &[
    "GeneratedComponent",
    "MyComponent",
    "Component",
    "Scene",
    "Composition",
    "Animation",
];

static DEFAULT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*export\s+default\s+(?:(?:async\s+)?function\s*\*?\s*|class\s+)([A-Za-z_$][\w$]*)")
        .expect("valid default declaration regex")
});

static DEFAULT_IDENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*export\s+default\s+([A-Za-z_$][\w$]*)[ \t]*;?[ \t]*$").expect("valid default ident regex")
});

static DEFAULT_ANY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*export\s+default\b").expect("valid default regex"));

static EXPORT_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s*\{([^}]*)\}(\s*from\s*['"][^'"]*['"])?"#).expect("valid export list regex")
});

static NAMED_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*export\s+(?:const|let|var|(?:async\s+)?function\s*\*?|class)\s+([A-Za-z_$][\w$]*)")
        .expect("valid named declaration regex")
});

static ANY_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:function\s*\*?\s*|class\s+|const\s+|let\s+|var\s+)([A-Za-z_$][\w$]*)")
        .expect("valid declaration regex")
});

static TOP_LEVEL_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^(?:(?:async\s+)?function\s*\*?\s*([A-Z][\w$]*)\s*\(|(?:const|let|var)\s+([A-Z][\w$]*)\s*=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>|[A-Za-z_$][\w$]*\s*=>))",
    )
    .expect("valid top-level function regex")
});

static SELF_REGISTRATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"window\s*\.\s*__REMOTION_COMPONENT\s*=[^=]").expect("valid registration regex")
});

const NOT_AN_IDENT: &[&str] = &["function", "class", "async"];

/// How the wrapped module resolves its component at the end of the scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// A binding visible in the module scope.
    Named(String),

    /// `export default <expression>` with no name of its own.
    AnonymousDefault,

    /// The source assigns the registration global itself.
    SelfRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    DefaultExport,
    NamedExport,
    ConventionalName,
    TopLevelFunction,
    GlobalRegistration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedExport {
    pub target: ExportTarget,
    pub method: DetectionMethod,
}

impl DetectedExport {
    fn named(name: &str, method: DetectionMethod) -> Self {
        Self {
            target: ExportTarget::Named(name.to_string()),
            method,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.target {
            ExportTarget::Named(n) => Some(n),
            _ => None,
        }
    }

    /// JS expression evaluating to the component inside the wrapper scope.
    pub fn resolution(&self) -> String {
        match &self.target {
            ExportTarget::Named(n) => {
                format!("(typeof {n} !== \"undefined\" ? {n} : __exports.default)")
            }
            ExportTarget::AnonymousDefault => "__exports.default".to_string(),
            ExportTarget::SelfRegistered => REGISTRATION_GLOBAL.to_string(),
        }
    }
}

pub fn detect_component(stripped: &str) -> Option<DetectedExport> {
    detect_default(stripped)
        .or_else(|| detect_named(stripped))
        .or_else(|| detect_conventional(stripped))
        .or_else(|| detect_top_level(stripped))
        .or_else(|| {
            SELF_REGISTRATION.is_match(stripped).then(|| DetectedExport {
                target: ExportTarget::SelfRegistered,
                method: DetectionMethod::GlobalRegistration,
            })
        })
}

fn detect_default(src: &str) -> Option<DetectedExport> {
    if let Some(c) = DEFAULT_DECL.captures(src) {
        return Some(DetectedExport::named(&c[1], DetectionMethod::DefaultExport));
    }
    if let Some(c) = DEFAULT_IDENT.captures(src)
        && !NOT_AN_IDENT.contains(&&c[1])
    {
        return Some(DetectedExport::named(&c[1], DetectionMethod::DefaultExport));
    }
    for c in EXPORT_LIST.captures_iter(src).filter(|c| c.get(2).is_none()) {
        for (local, exported) in export_list_items(&c[1]) {
            if exported == "default" {
                return Some(DetectedExport::named(local, DetectionMethod::DefaultExport));
            }
        }
    }
    DEFAULT_ANY.is_match(src).then_some(DetectedExport {
        target: ExportTarget::AnonymousDefault,
        method: DetectionMethod::DefaultExport,
    })
}

fn detect_named(src: &str) -> Option<DetectedExport> {
    let declared = NAMED_DECL
        .captures_iter(src)
        .filter_map(|c| c.get(1))
        .map(|m| (m.start(), m.as_str().to_string()));
    let listed = EXPORT_LIST
        .captures_iter(src)
        .filter(|c| c.get(2).is_none())
        .flat_map(|c| {
            let start = c.get(0).map_or(0, |m| m.start());
            export_list_items(&c[1])
                .into_iter()
                .map(move |(local, _)| (start, local.to_string()))
                .collect::<Vec<_>>()
        });

    // Prefer a capitalised name: a module may export helpers alongside.
    let mut candidates: Vec<(usize, String)> = declared.chain(listed).collect();
    candidates.sort_by_key(|(pos, _)| *pos);
    let name = candidates
        .iter()
        .find(|(_, n)| n.starts_with(|c: char| c.is_ascii_uppercase()))
        .or_else(|| candidates.first())
        .map(|(_, n)| n.clone())?;
    Some(DetectedExport::named(&name, DetectionMethod::NamedExport))
}

fn detect_conventional(src: &str) -> Option<DetectedExport> {
    let declared: Vec<&str> = ANY_DECL
        .captures_iter(src)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    CONVENTIONAL_NAMES
        .iter()
        .find(|name| declared.contains(name))
        .map(|name| DetectedExport::named(name, DetectionMethod::ConventionalName))
}

fn detect_top_level(src: &str) -> Option<DetectedExport> {
    let c = TOP_LEVEL_FN.captures(src)?;
    let name = c.get(1).or_else(|| c.get(2))?.as_str();
    Some(DetectedExport::named(name, DetectionMethod::TopLevelFunction))
}

/// Parse the inside of `export { a, b as c }` into `(local, exported)` pairs.
pub(crate) fn export_list_items(list: &str) -> Vec<(&str, &str)> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| {
            let mut parts = item.split_whitespace();
            let local = parts.next()?;
            match (parts.next(), parts.next()) {
                (Some("as"), Some(exported)) => Some((local, exported)),
                (None, _) => Some((local, local)),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::default_function("export default function Foo() { return null; }", "Foo")]
    #[case::default_async("export default async function Loader() {}", "Loader")]
    #[case::default_class("export default class Clip extends React.Component {}", "Clip")]
    #[case::default_ident("const Bar = () => null;\nexport default Bar;", "Bar")]
    #[case::as_default("function Baz() {}\nexport { helper, Baz as default };", "Baz")]
    fn default_exports_win(#[case] src: &str, #[case] expected: &str) {
        let found = detect_component(src).unwrap();
        assert_eq!(found.method, DetectionMethod::DefaultExport);
        assert_eq!(found.name(), Some(expected));
    }

    #[test]
    fn anonymous_default_resolves_through_exports_object() {
        let found = detect_component("export default () => null;").unwrap();
        assert_eq!(found.target, ExportTarget::AnonymousDefault);
        assert_eq!(found.resolution(), "__exports.default");
    }

    #[rstest]
    #[case::const_arrow("export const helper = 1;\nexport const Intro = () => null;", "Intro")]
    #[case::function("export function Outro() {}", "Outro")]
    #[case::list("const Title = () => null;\nexport { Title };", "Title")]
    fn named_exports_are_second(#[case] src: &str, #[case] expected: &str) {
        let found = detect_component(src).unwrap();
        assert_eq!(found.method, DetectionMethod::NamedExport);
        assert_eq!(found.name(), Some(expected));
    }

    #[test]
    fn conventional_names_follow_preference_order() {
        let src = "function Scene() {}\nfunction MyComponent() {}";
        let found = detect_component(src).unwrap();
        assert_eq!(found.method, DetectionMethod::ConventionalName);
        assert_eq!(found.name(), Some("MyComponent"));
    }

    #[rstest]
    #[case::function("function helper() {}\nfunction Sunset() { return null; }", "Sunset")]
    #[case::arrow("const speed = 2;\nconst Waves = ({ frame }) => null;", "Waves")]
    #[case::single_param_arrow("const Spin = props => null;", "Spin")]
    fn top_level_capitalised_functions_are_fourth(#[case] src: &str, #[case] expected: &str) {
        let found = detect_component(src).unwrap();
        assert_eq!(found.method, DetectionMethod::TopLevelFunction);
        assert_eq!(found.name(), Some(expected));
    }

    #[test]
    fn self_registration_is_last_resort() {
        let src = "window.__REMOTION_COMPONENT = function () { return null; };";
        let found = detect_component(src).unwrap();
        assert_eq!(found.target, ExportTarget::SelfRegistered);
        assert_eq!(found.resolution(), REGISTRATION_GLOBAL);
    }

    #[test]
    fn nothing_detectable() {
        assert_eq!(detect_component("const x = 1;\nconsole.log(x);"), None);
    }

    #[test]
    fn export_list_items_handles_aliases() {
        assert_eq!(
            export_list_items(" a, b as c ,, d "),
            vec![("a", "a"), ("b", "c"), ("d", "d")]
        );
    }
}

//! Deterministic fallback component.
//!
//! Built without any generated input besides the error text, so it always
//! loads. The error is embedded as a JSON string literal.

use super::REGISTRATION_GLOBAL;

pub const FALLBACK_COMPONENT_NAME: &str = "FallbackComponent";

const MAX_MESSAGE_CHARS: usize = 2000;

pub fn fallback_script(error: &str) -> String {
    let message: String = error.chars().take(MAX_MESSAGE_CHARS).collect();
    format!(
        "/* sceneforge fallback component */\n{}",
        fallback_registration(&js_string_literal(&message))
    )
}

/// Self-contained statement that defines the fallback component around the
/// JS expression `message` and registers it.
pub(crate) fn fallback_registration(message: &str) -> String {
    format!(
        r##"(function (React, Remotion, message) {{
  var AbsoluteFill = (Remotion && Remotion.AbsoluteFill) || "div";
  function {FALLBACK_COMPONENT_NAME}() {{
    return React.createElement(
      AbsoluteFill,
      {{ style: {{ backgroundColor: "#111827", color: "#f87171", display: "flex", flexDirection: "column", alignItems: "center", justifyContent: "center", padding: 48, fontFamily: "monospace" }} }},
      React.createElement("h1", {{ style: {{ fontSize: 48, margin: 0 }} }}, "Component build failed"),
      React.createElement("pre", {{ style: {{ fontSize: 24, whiteSpace: "pre-wrap", maxWidth: "90%" }} }}, message)
    );
  }}
  {REGISTRATION_GLOBAL} = {FALLBACK_COMPONENT_NAME};
}})(window.React, window.Remotion, {message});
"##
    )
}

/// JSON string escaping, plus the sequences that would end an inline
/// `<script>` or break older JS parsers.
fn js_string_literal(s: &str) -> String {
    serde_json::to_string(s)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

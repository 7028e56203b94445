use super::detect::DetectedExport;
use super::fallback::fallback_registration;
use super::{LOAD_ERROR_GLOBAL, REGISTRATION_GLOBAL};

/// Wrap a rewritten module body in an isolated function scope that
/// resolves the component and assigns it to the registration global.
///
/// Anything the body throws while loading is recorded in
/// `LOAD_ERROR_GLOBAL` and the fallback component is registered instead.
pub fn wrap_module(body: &str, export: &DetectedExport) -> String {
    let label = export.name().unwrap_or("default");
    let fallback = fallback_registration(LOAD_ERROR_GLOBAL);
    format!(
        r#"/* sceneforge component: {label} */
(function (React, Remotion, __exports) {{
  try {{
{body}
  var __component = {resolution};
  if (typeof __component !== "function") {{
    throw new Error("component {label} is not a function");
  }}
  {REGISTRATION_GLOBAL} = __component;
  }} catch (__error) {{
  {LOAD_ERROR_GLOBAL} = String((__error && __error.message) || __error);
  {fallback}
  }}
}})(window.React, window.Remotion, {{}});
"#,
        body = body.trim_end(),
        resolution = export.resolution(),
        fallback = fallback.trim_end(),
    )
}

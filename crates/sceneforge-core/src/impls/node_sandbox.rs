//! Sandbox backed by a `node` child process.
//!
//! The script is fed on stdin to a small harness that evaluates it inside a
//! fresh `vm` context holding stub `React`/`Remotion` globals, then renders
//! the registered component once. Isolation comes from the process
//! boundary:
//! - empty environment, with the binary resolved against `PATH` up front
//! - `--max-old-space-size` heap cap
//! - wall-clock timeout, with the child killed on drop

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::ports::{Sandbox, SandboxError, SandboxReport};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_OLD_SPACE_MB: u32 = 64;

/// Evaluated inside the vm context before the component script.
const PRELUDE: &str = r#"
var window = this;
(function (g) {
  var noop = function () {};
  function createElement(type, props) {
    return { $$typeof: "element", type: type, props: props || {}, children: Array.prototype.slice.call(arguments, 2) };
  }
  function Component(props) { this.props = props; }
  Component.prototype.setState = noop;
  g.React = {
    createElement: createElement,
    Fragment: "Fragment",
    Component: Component,
    PureComponent: Component,
    useState: function (v) { return [typeof v === "function" ? v() : v, noop]; },
    useReducer: function (r, v) { return [v, noop]; },
    useEffect: noop,
    useLayoutEffect: noop,
    useMemo: function (f) { return f(); },
    useCallback: function (f) { return f; },
    useRef: function (v) { return { current: v }; },
    useContext: function () { return undefined; }
  };
  var config = { fps: 30, width: 1920, height: 1080, durationInFrames: 150, id: "sandbox" };
  function interpolate(input, inRange, outRange) {
    var a = inRange[0], b = inRange[inRange.length - 1];
    var t = b === a ? 0 : (input - a) / (b - a);
    return outRange[0] + t * (outRange[outRange.length - 1] - outRange[0]);
  }
  function Passthrough(props) { return props.children; }
  var identityEasing = new Proxy({}, { get: function () { return function () { return function (t) { return t; }; }; } });
  g.Remotion = {
    AbsoluteFill: "AbsoluteFill",
    Sequence: Passthrough,
    Series: Object.assign(Passthrough, { Sequence: Passthrough }),
    Loop: Passthrough,
    Freeze: Passthrough,
    Img: "img",
    Video: "video",
    OffthreadVideo: "video",
    Audio: "audio",
    Easing: identityEasing,
    useCurrentFrame: function () { return 0; },
    useVideoConfig: function () { return config; },
    interpolate: interpolate,
    interpolateColors: function (i, r, colors) { return colors[0]; },
    spring: function () { return 0; },
    random: function () { return 0.5; },
    staticFile: function (p) { return "/static/" + p; },
    delayRender: function () { return 0; },
    continueRender: noop
  };
  g.__sceneforgeInspect = function () {
    var c = g.__REMOTION_COMPONENT;
    var loadError = g.__REMOTION_LOAD_ERROR === undefined ? null : String(g.__REMOTION_LOAD_ERROR);
    if (typeof c !== "function") {
      return JSON.stringify({ registered: false, component_name: null, rendered_text: "", load_error: loadError });
    }
    var texts = [];
    var depth = 0;
    function render(node) {
      if (node === null || node === undefined || typeof node === "boolean") return;
      if (typeof node === "string" || typeof node === "number") { texts.push(String(node)); return; }
      if (Array.isArray(node)) { node.forEach(render); return; }
      if (node.$$typeof !== "element") return;
      var props = Object.assign({}, node.props);
      if (node.children.length) props.children = node.children.length === 1 ? node.children[0] : node.children;
      if (typeof node.type === "function") {
        if (++depth > 200) throw new Error("render depth exceeded");
        var proto = node.type.prototype;
        render(proto && typeof proto.render === "function" ? new node.type(props).render() : node.type(props));
        depth--;
        return;
      }
      render(props.children);
    }
    render(createElement(c, {}));
    return JSON.stringify({ registered: true, component_name: c.name || null, rendered_text: texts.join(" "), load_error: loadError });
  };
})(this);
"#;

/// Runs in the node process itself; never sees the generated script as code
/// outside the vm context.
const HARNESS: &str = r#"
const vm = require("vm");
const timeout = Number(process.env.SCENEFORGE_VM_TIMEOUT_MS || "2000");
const prelude = process.env.SCENEFORGE_PRELUDE;
const emit = (r) => process.stdout.write(JSON.stringify(r) + "\n");
const message = (e) => String((e && e.message) || e);
const chunks = [];
process.stdin.on("data", (c) => chunks.push(c));
process.stdin.on("end", () => {
  const code = Buffer.concat(chunks).toString("utf8");
  const ctx = vm.createContext({});
  try { vm.runInContext(prelude, ctx, { timeout }); }
  catch (e) { emit({ ok: false, phase: "prelude", error: message(e) }); return; }
  let script;
  try { script = new vm.Script(code, { filename: "component.js" }); }
  catch (e) { emit({ ok: false, phase: "syntax", error: message(e) }); return; }
  try { script.runInContext(ctx, { timeout }); }
  catch (e) { emit({ ok: false, phase: "runtime", error: message(e) }); return; }
  try { emit(Object.assign({ ok: true }, JSON.parse(vm.runInContext("__sceneforgeInspect()", ctx, { timeout })))); }
  catch (e) { emit({ ok: false, phase: "render", error: message(e) }); }
});
"#;

#[derive(Debug, Deserialize)]
struct HarnessReply {
    ok: bool,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    registered: bool,
    #[serde(default)]
    component_name: Option<String>,
    #[serde(default)]
    rendered_text: String,
    #[serde(default)]
    load_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeSandbox {
    node_bin: PathBuf,
    /// `node_bin` resolved to an absolute path; `None` when not found.
    program: Option<PathBuf>,
    timeout: Duration,
    max_old_space_mb: u32,
}

impl NodeSandbox {
    /// Resolves `node_bin` against the current `PATH`.
    pub fn new(node_bin: impl Into<PathBuf>) -> Self {
        Self::with_search_path(node_bin, std::env::var_os("PATH").unwrap_or_default())
    }

    /// Resolves `node_bin` against `search_path` instead of `PATH`.
    pub fn with_search_path(node_bin: impl Into<PathBuf>, search_path: impl AsRef<OsStr>) -> Self {
        let node_bin = node_bin.into();
        let cwd = std::env::current_dir().unwrap_or_default();
        let program = match which::which_in(&node_bin, Some(search_path), cwd) {
            Ok(path) => Some(path),
            Err(e) => {
                debug!(node = %node_bin.display(), error = %e, "node binary not resolved");
                None
            }
        };
        Self {
            node_bin,
            program,
            timeout: DEFAULT_TIMEOUT,
            max_old_space_mb: DEFAULT_MAX_OLD_SPACE_MB,
        }
    }

    /// The absolute path children are spawned from.
    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_old_space_mb(mut self, mb: u32) -> Self {
        self.max_old_space_mb = mb;
        self
    }

    /// Whether `node_bin` can be started at all.
    pub async fn probe(&self) -> bool {
        let Some(program) = &self.program else {
            return false;
        };
        Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn vm_timeout(&self) -> Duration {
        // Leave headroom for process start-up inside the wall-clock budget.
        (self.timeout / 2).max(Duration::from_millis(50))
    }
}

#[async_trait]
impl Sandbox for NodeSandbox {
    async fn execute(&self, script: &str) -> Result<SandboxReport, SandboxError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| SandboxError::Unavailable(format!("{} not found", self.node_bin.display())))?;
        let mut child = Command::new(program)
            .arg(format!("--max-old-space-size={}", self.max_old_space_mb))
            .arg("-e")
            .arg(HARNESS)
            .env_clear()
            .env("SCENEFORGE_PRELUDE", PRELUDE)
            .env("SCENEFORGE_VM_TIMEOUT_MS", self.vm_timeout().as_millis().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SandboxError::Unavailable(format!("{} not found", self.node_bin.display()))
                }
                _ => SandboxError::Io(e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SandboxError::Timeout(self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout.lines().rev().find(|l| l.starts_with('{')) else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(status = ?output.status, %stderr, "sandbox produced no report");
            return Err(SandboxError::Runtime(format!(
                "sandbox exited with {} and no report",
                output.status
            )));
        };
        let reply: HarnessReply = serde_json::from_str(line)
            .map_err(|e| SandboxError::Runtime(format!("unreadable sandbox report: {e}")))?;

        if !reply.ok {
            let error = reply.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(match reply.phase.as_deref() {
                Some("syntax") => SandboxError::Syntax(error),
                _ => SandboxError::Runtime(error),
            });
        }
        if !reply.registered {
            return Err(SandboxError::NotRegistered);
        }
        Ok(SandboxReport {
            registered: true,
            component_name: reply.component_name,
            rendered_text: reply.rendered_text,
            load_error: reply.load_error,
        })
    }
}

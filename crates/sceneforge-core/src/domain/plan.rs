//! Scene plan derived from a natural-language prompt.
//!
//! The plan is deliberately small: it is what the code generator needs to
//! produce a first component, and what clients show while the build runs.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_DURATION_SECS: u32 = 5;
pub const MAX_DURATION_SECS: u32 = 60;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,3})\s*(?:s|sec|secs|second|seconds)\b").expect("valid duration regex")
});

const PALETTES: &[[&str; 3]] = &[
    ["#0f172a", "#38bdf8", "#f8fafc"],
    ["#1e1b4b", "#f472b6", "#fdf4ff"],
    ["#052e16", "#4ade80", "#f0fdf4"],
    ["#431407", "#fb923c", "#fff7ed"],
    ["#172554", "#facc15", "#fefce8"],
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    pub background: String,
    pub accent: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenePlan {
    pub title: String,
    pub prompt: String,
    pub component_name: String,
    pub duration_secs: u32,
    pub fps: u32,
    pub duration_in_frames: u32,
    pub palette: Palette,
    pub headline: String,
    pub caption: Option<String>,
}

impl ScenePlan {
    /// Derive a plan from the prompt. Deterministic: the same prompt always
    /// yields the same plan.
    pub fn from_prompt(prompt: &str) -> Self {
        let prompt = prompt.trim();
        let duration_secs = DURATION_RE
            .captures(prompt)
            .and_then(|c| c[1].parse::<u32>().ok())
            .filter(|secs| *secs > 0)
            .map(|secs| secs.min(MAX_DURATION_SECS))
            .unwrap_or(DEFAULT_DURATION_SECS);

        let title = title_from(prompt);
        let palette = pick_palette(prompt);
        let (headline, caption) = split_headline(prompt);

        Self {
            component_name: component_name_from(&title),
            title,
            prompt: prompt.to_string(),
            duration_secs,
            fps: DEFAULT_FPS,
            duration_in_frames: duration_secs * DEFAULT_FPS,
            palette,
            headline,
            caption,
        }
    }
}

fn title_from(prompt: &str) -> String {
    let words: Vec<&str> = prompt.split_whitespace().take(6).collect();
    if words.is_empty() {
        "Untitled scene".to_string()
    } else {
        words.join(" ")
    }
}

fn component_name_from(title: &str) -> String {
    let mut name: String = title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(4)
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "Scene");
    }
    name
}

// FNV-1a keeps palette selection stable across processes and platforms.
fn pick_palette(prompt: &str) -> Palette {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in prompt.to_lowercase().bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    let [background, accent, text] = PALETTES[(hash % PALETTES.len() as u64) as usize];
    Palette {
        background: background.to_string(),
        accent: accent.to_string(),
        text: text.to_string(),
    }
}

fn split_headline(prompt: &str) -> (String, Option<String>) {
    match prompt.split_once(['.', '\n']) {
        Some((head, rest)) if !rest.trim().is_empty() => {
            (head.trim().to_string(), Some(rest.trim().to_string()))
        }
        _ => (prompt.trim_end_matches('.').to_string(), None),
    }
}

//! Page script execution on Boa.
//!
//! Scripts see a tiny DOM shim (see `harness.js`): element lookups return
//! objects whose `style` writes are collected and handed back to the loader
//! as [`StyleMutation`]s. `setTimeout`/`requestAnimationFrame` callbacks are
//! queued on a virtual clock that the loader advances in real time, which is
//! what produces late repaints after the document finished loading.

use std::time::Duration;

use boa_engine::{Context, Source};
use serde::Deserialize;

use crate::rendering::StyleMutation;

/// Boa runtime limits applied to every evaluation
#[derive(Debug, Clone, Copy)]
pub struct ScriptLimits {
    /// Maximum loop iterations before Boa throws (0 => disabled)
    pub loop_iteration_limit: u64,
    /// Maximum recursion depth before Boa throws (usize::MAX => disabled)
    pub recursion_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConsoleLine {
    pub level: String,
    pub text: String,
}

/// Everything one evaluation changed.
#[derive(Debug, Default)]
pub struct ScriptOutput {
    pub mutations: Vec<StyleMutation>,
    pub title: Option<String>,
    pub console: Vec<ConsoleLine>,
}

impl ScriptOutput {
    /// Whether the output affects rendering
    pub fn is_visual(&self) -> bool {
        !self.mutations.is_empty() || self.title.is_some()
    }
}

#[derive(Deserialize)]
struct Drained {
    mutations: Vec<RawMutation>,
    console: Vec<ConsoleLine>,
    title: Option<String>,
}

#[derive(Deserialize)]
struct RawMutation {
    selector: String,
    style: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct TimerSlot {
    index: u32,
    due: f64,
}

pub struct ScriptRuntime {
    ctx: Context,
}

impl ScriptRuntime {
    /// Create a context with the DOM shim installed.
    pub fn new(title: &str, limits: ScriptLimits) -> Result<Self, String> {
        let mut ctx = Context::default();
        let title_literal = serde_json::to_string(title).unwrap_or_else(|_| "\"\"".to_string());
        let harness = include_str!("harness.js").replace("__RF_TITLE__", &title_literal);
        ctx.eval(Source::from_bytes(harness.as_bytes()))
            .map_err(|e| format!("script harness failed: {}", e))?;

        if limits.loop_iteration_limit > 0 {
            ctx.runtime_limits_mut()
                .set_loop_iteration_limit(limits.loop_iteration_limit);
        }
        if limits.recursion_limit < usize::MAX {
            ctx.runtime_limits_mut().set_recursion_limit(limits.recursion_limit);
        }
        Ok(Self { ctx })
    }

    /// Evaluate one page script and collect what it changed.
    pub fn run(&mut self, code: &str) -> ScriptOutput {
        let error = self
            .ctx
            .eval(Source::from_bytes(code.as_bytes()))
            .err()
            .map(|e| format!("Script thrown: {}", e));
        self.drain(error)
    }

    /// The pending timer with the smallest due time, as `(index, due)` with
    /// `due` measured from the first script evaluation.
    pub fn next_timer(&mut self) -> Option<(u32, Duration)> {
        let raw = self.eval_string("__rf_next_timer()")?;
        if raw.is_empty() {
            return None;
        }
        let slot: TimerSlot = serde_json::from_str(&raw).ok()?;
        let due_ms = if slot.due.is_finite() && slot.due > 0.0 { slot.due } else { 0.0 };
        Some((slot.index, Duration::from_micros((due_ms * 1000.0) as u64)))
    }

    /// Run the timer callback at `index` and collect what it changed.
    pub fn fire_timer(&mut self, index: u32) -> ScriptOutput {
        let code = format!("__rf_fire({})", index);
        let error = self
            .ctx
            .eval(Source::from_bytes(code.as_bytes()))
            .err()
            .map(|e| format!("Timer callback thrown: {}", e));
        self.drain(error)
    }

    fn eval_string(&mut self, code: &str) -> Option<String> {
        let value = self.ctx.eval(Source::from_bytes(code.as_bytes())).ok()?;
        let s = value.to_string(&mut self.ctx).ok()?;
        Some(s.to_std_string_escaped())
    }

    fn drain(&mut self, error: Option<String>) -> ScriptOutput {
        let mut out = match self
            .eval_string("__rf_drain()")
            .and_then(|raw| serde_json::from_str::<Drained>(&raw).ok())
        {
            Some(d) => ScriptOutput {
                mutations: d.mutations.into_iter().map(into_mutation).collect(),
                title: d.title,
                console: d.console,
            },
            None => ScriptOutput::default(),
        };
        if let Some(text) = error {
            out.console.push(ConsoleLine {
                level: "error".to_string(),
                text,
            });
        }
        out
    }
}

fn into_mutation(raw: RawMutation) -> StyleMutation {
    let declarations = raw
        .style
        .into_iter()
        .filter_map(|(prop, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((kebab_case(&prop), value))
        })
        .collect();
    StyleMutation {
        selector: raw.selector,
        declarations,
    }
}

/// `backgroundColor` -> `background-color`
fn kebab_case(prop: &str) -> String {
    let mut out = String::with_capacity(prop.len() + 4);
    for ch in prop.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

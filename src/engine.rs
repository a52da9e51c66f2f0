//! The south-facing engine interface and a reference
//! implementation used when no licensed Stata install is configured.
//!
//! The real engine is an external collaborator: "engine-specific library
//! bindings and executable discovery" are explicitly out of scope.
//! What the worker needs from it is narrow and is captured here as a trait
//! so the rest of the worker never depends on a concrete binding.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of one `Engine::run` call.
#[derive(Debug, Clone)]
pub enum EngineOutcome {
    /// Ran to completion. `output` is the engine's captured textual log.
    Completed { output: String },
    /// Interrupted via `interrupt()` before completion. `output` is
    /// whatever was captured up to the interruption point.
    Interrupted { output: String },
}

/// An engine-reported execution error (distinct from interruption).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    pub partial_output: String,
}

/// The capability surface the worker needs from the statistical engine.
///
/// Mirrors the "Engine-facing interface": a blocking run-this-script
/// entry point with echo on/off, a non-blocking break primitive callable
/// from another thread, and directive-based binding of working directory,
/// temp directory, RNG seed, and log file paths (left to the caller to
/// express as directives prepended to `code` — see `script_rewriter.rs`).
#[async_trait]
pub trait Engine: Send + Sync {
    /// Run `code` to completion or until `interrupt()` is observed.
    /// `echo` controls whether commands are echoed into the captured log,
    /// matching the engine's own interactive/batch toggle.
    async fn run(&self, code: &str, echo: bool) -> Result<EngineOutcome, EngineError>;

    /// Request interruption of an in-flight `run()`. Must be safe to call
    /// from a different task/thread than the one executing `run()`, and
    /// must be a no-op (not an error) if nothing is running. Implementations
    /// must tolerate being called more than once; the worker itself
    /// enforces the single-break-call contract at a higher layer.
    fn interrupt(&self);

    /// Bind the engine's working directory, temp directory, and environment
    /// for this worker. Called once during initialization.
    async fn bind_environment(&self, temp_dir: &str, seed: u64) -> Result<(), EngineError>;

    /// Perform a one-time minimal graph export in the initialization
    /// context (platform graphics initialization).
    async fn export_dummy_graph(&self) -> Result<(), EngineError>;

    /// Columnar snapshot of the current in-memory dataset, with push-down
    /// filtering (`GET_DATA`). `max_rows` is already clamped by
    /// the caller.
    async fn get_data(
        &self,
        if_condition: Option<&str>,
        max_rows: usize,
    ) -> Result<crate::ipc::DataSnapshot, EngineError>;
}

/// Marker text the reference engine emits so the worker can recognize a
/// cooperative interruption and reclassify it as `cancelled` rather than
/// `error`.
pub const BREAK_MARKER: &str = "--break--";

/// An in-memory interpreter for a small, literal subset of the engine's
/// scripting surface: `display`, `clear`, `set obs N`, `generate`/`gen`,
/// `count`, `sleep N`. Enough to drive every scenario in  without a
/// licensed Stata install.
pub struct ReferenceEngine {
    interrupted: Arc<AtomicBool>,
    dataset: tokio::sync::Mutex<Dataset>,
}

#[derive(Debug, Default, Clone)]
struct Dataset {
    obs: usize,
    vars: HashMap<String, Vec<f64>>,
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self {
            interrupted: Arc::new(AtomicBool::new(false)),
            dataset: tokio::sync::Mutex::new(Dataset::default()),
        }
    }

    async fn exec_line(&self, line: &str, output: &mut String, echo: bool) -> Result<(), EngineError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('*') || line.starts_with("//") {
            return Ok(());
        }
        if echo {
            output.push_str(&format!(". {line}\n"));
        }

        if line.eq_ignore_ascii_case("clear") {
            let mut data = self.dataset.lock().await;
            *data = Dataset::default();
            return Ok(());
        }

        // Directives `wrap_for_execution` / `wrap_for_execution`-adjacent
        // neutralization inserts around whole-file runs: the reference
        // engine has no real log file, process group, or RNG state of its
        // own, so these are accepted and ignored rather than rejected as
        // unrecognized commands.
        if line.eq_ignore_ascii_case("discard")
            || strip_ci_prefix(line, "cd ").is_some()
            || strip_ci_prefix(line, "set seed ").is_some()
            || strip_ci_prefix(line, "log using").is_some()
            || line.to_ascii_lowercase().starts_with("log close")
            || line.to_ascii_lowercase().starts_with("capture log close")
        {
            return Ok(());
        }

        if let Some(rest) = strip_ci_prefix(line, "capture ") {
            return match Box::pin(self.exec_line(rest, output, false)).await {
                Ok(()) | Err(_) => Ok(()),
            };
        }

        if let Some(rest) = strip_ci_prefix(line, "set obs ") {
            let n: usize = rest.trim().parse().map_err(|_| EngineError {
                message: format!("invalid observation count: {rest}"),
                partial_output: output.clone(),
            })?;
            let mut data = self.dataset.lock().await;
            data.obs = n;
            for values in data.vars.values_mut() {
                values.resize(n, f64::NAN);
            }
            return Ok(());
        }

        if let Some(rest) = strip_ci_prefix(line, "generate ").or_else(|| strip_ci_prefix(line, "gen ")) {
            return self.exec_generate(rest, output).await;
        }

        if line.eq_ignore_ascii_case("count") {
            let data = self.dataset.lock().await;
            output.push_str(&format!("{}\n", data.obs));
            return Ok(());
        }

        if let Some(rest) = strip_ci_prefix(line, "display ").or_else(|| strip_ci_prefix(line, "di ")) {
            let rendered = render_display_expr(rest);
            output.push_str(&rendered);
            output.push('\n');
            return Ok(());
        }

        if let Some(rest) = strip_ci_prefix(line, "sleep ") {
            let ms: u64 = rest.trim().parse().map_err(|_| EngineError {
                message: format!("invalid sleep duration: {rest}"),
                partial_output: output.clone(),
            })?;
            return self.cooperative_sleep(ms).await;
        }

        Err(EngineError {
            message: format!("unrecognized command: {line}"),
            partial_output: output.clone(),
        })
    }

    async fn exec_generate(&self, rest: &str, _output: &mut String) -> Result<(), EngineError> {
        let (name, expr) = rest.split_once('=').ok_or_else(|| EngineError {
            message: format!("malformed generate statement: {rest}"),
            partial_output: String::new(),
        })?;
        let name = name.trim().to_string();
        let expr = expr.trim();

        let mut data = self.dataset.lock().await;
        let obs = data.obs;
        let mut values = Vec::with_capacity(obs);
        for n in 1..=obs {
            values.push(eval_generate_expr(expr, n as f64));
        }
        data.vars.insert(name, values);
        Ok(())
    }

    async fn cooperative_sleep(&self, total_ms: u64) -> Result<(), EngineError> {
        const TICK_MS: u64 = 50;
        let mut remaining = total_ms;
        while remaining > 0 {
            if self.interrupted.swap(false, Ordering::SeqCst) {
                return Err(EngineError {
                    message: BREAK_MARKER.to_string(),
                    partial_output: String::new(),
                });
            }
            let tick = remaining.min(TICK_MS);
            tokio::time::sleep(std::time::Duration::from_millis(tick)).await;
            remaining -= tick;
        }
        Ok(())
    }
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for ReferenceEngine {
    async fn run(&self, code: &str, echo: bool) -> Result<EngineOutcome, EngineError> {
        self.interrupted.store(false, Ordering::SeqCst);
        let mut output = String::new();

        for line in code.lines() {
            if self.interrupted.swap(false, Ordering::SeqCst) {
                return Ok(EngineOutcome::Interrupted { output });
            }
            match self.exec_line(line, &mut output, echo).await {
                Ok(()) => {}
                Err(e) if e.message == BREAK_MARKER => {
                    return Ok(EngineOutcome::Interrupted { output });
                }
                Err(e) => {
                    return Err(EngineError {
                        message: e.message,
                        partial_output: output,
                    });
                }
            }
        }

        Ok(EngineOutcome::Completed { output })
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    async fn bind_environment(&self, _temp_dir: &str, _seed: u64) -> Result<(), EngineError> {
        Ok(())
    }

    async fn export_dummy_graph(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn get_data(
        &self,
        if_condition: Option<&str>,
        max_rows: usize,
    ) -> Result<crate::ipc::DataSnapshot, EngineError> {
        let data = self.dataset.lock().await;
        let columns: Vec<String> = data.vars.keys().cloned().collect();
        let total_rows = data.obs;

        // Push-down filtering: an `if_condition` of the form "_n <= K" or
        // "_n > K" narrows which observation indices are materialized,
        // mirroring the engine's own `keep if`/`keep in` semantics rather
        // than filtering a fully materialized copy.
        let indices: Vec<usize> = match if_condition.map(str::trim) {
            Some(cond) if !cond.is_empty() => filter_indices(cond, total_rows),
            _ => (0..total_rows).collect(),
        };

        let displayed: Vec<usize> = indices.into_iter().take(max_rows).collect();
        let rows: Vec<Vec<serde_json::Value>> = displayed
            .iter()
            .map(|&idx| {
                columns
                    .iter()
                    .map(|c| {
                        let v = data.vars[c].get(idx).copied().unwrap_or(f64::NAN);
                        serde_json::json!(v)
                    })
                    .collect()
            })
            .collect();

        let dtypes = columns.iter().map(|_| "double".to_string()).collect();
        let displayed_rows = rows.len();

        Ok(crate::ipc::DataSnapshot {
            columns,
            dtypes,
            data: rows,
            index: displayed.clone(),
            rows: displayed_rows,
            total_rows,
            displayed_rows,
            max_rows,
        })
    }
}

/// Documented-but-unwired production slot: a real installation's engine
/// bindings and executable discovery are out of scope, so this
/// stand-in simply reports that fact rather than pretending to run
/// anything. Selected at build time when the `reference-engine` feature is
/// off (see `src/bin/worker_main.rs::build_engine`).
pub struct StataEngine;

impl StataEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StataEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for StataEngine {
    async fn run(&self, _code: &str, _echo: bool) -> Result<EngineOutcome, EngineError> {
        Err(unimplemented_error())
    }

    fn interrupt(&self) {}

    async fn bind_environment(&self, _temp_dir: &str, _seed: u64) -> Result<(), EngineError> {
        Err(unimplemented_error())
    }

    async fn export_dummy_graph(&self) -> Result<(), EngineError> {
        Err(unimplemented_error())
    }

    async fn get_data(
        &self,
        _if_condition: Option<&str>,
        _max_rows: usize,
    ) -> Result<crate::ipc::DataSnapshot, EngineError> {
        Err(unimplemented_error())
    }
}

fn unimplemented_error() -> EngineError {
    EngineError {
        message: "no engine backend configured: build with the `reference-engine` feature, \
                  or wire a real installation's library bindings here"
            .to_string(),
        partial_output: String::new(),
    }
}

fn strip_ci_prefix<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

/// Evaluate the small arithmetic grammar `generate` supports: `_n`,
/// `_n * K`, `_n + K`, literal numbers. Enough for the S2 scenario.
fn eval_generate_expr(expr: &str, n: f64) -> f64 {
    let expr = expr.trim();
    if expr.eq_ignore_ascii_case("_n") {
        return n;
    }
    for op in ['*', '+', '-', '/'] {
        if let Some((lhs, rhs)) = expr.split_once(op) {
            let lhs = eval_operand(lhs.trim(), n);
            let rhs = eval_operand(rhs.trim(), n);
            return match op {
                '*' => lhs * rhs,
                '+' => lhs + rhs,
                '-' => lhs - rhs,
                '/' => lhs / rhs,
                _ => unreachable!(),
            };
        }
    }
    eval_operand(expr, n)
}

fn eval_operand(token: &str, n: f64) -> f64 {
    if token.eq_ignore_ascii_case("_n") {
        n
    } else {
        token.parse().unwrap_or(f64::NAN)
    }
}

/// Render the operand of a `display` statement: a quoted string literal
/// optionally followed by `+`-joined arithmetic, e.g. `"after stop: " 2+2`.
fn render_display_expr(expr: &str) -> String {
    let expr = expr.trim();
    if let Some(rest) = expr.strip_prefix('"') {
        if let Some(end) = rest.find('"') {
            let literal = &rest[..end];
            let remainder = rest[end + 1..].trim();
            if remainder.is_empty() {
                return literal.to_string();
            }
            return format!("{literal}{}", render_arithmetic(remainder));
        }
    }
    render_arithmetic(expr)
}

fn render_arithmetic(expr: &str) -> String {
    if let Ok(result) = eval_arithmetic(expr) {
        format_number(result)
    } else {
        expr.to_string()
    }
}

fn eval_arithmetic(expr: &str) -> Result<f64, ()> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(());
    }
    for op in ['+', '-', '*', '/'] {
        if let Some(pos) = expr.rfind(op) {
            if pos == 0 {
                continue;
            }
            let lhs: f64 = expr[..pos].trim().parse().map_err(|_| ())?;
            let rhs: f64 = expr[pos + 1..].trim().parse().map_err(|_| ())?;
            return Ok(match op {
                '+' => lhs + rhs,
                '-' => lhs - rhs,
                '*' => lhs * rhs,
                '/' => lhs / rhs,
                _ => unreachable!(),
            });
        }
    }
    expr.parse().map_err(|_| ())
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn filter_indices(condition: &str, total_rows: usize) -> Vec<usize> {
    // Supports `_n <= K` / `_n < K` / `_n >= K` / `_n > K`, 1-indexed like
    // the engine's own `_n`.
    let ops: [(&str, fn(usize, usize) -> bool); 4] = [
        ("<=", |a, b| a <= b),
        (">=", |a, b| a >= b),
        ("<", |a, b| a < b),
        (">", |a, b| a > b),
    ];
    for (op, cmp) in ops {
        if let Some((lhs, rhs)) = condition.split_once(op) {
            if lhs.trim().eq_ignore_ascii_case("_n") {
                if let Ok(k) = rhs.trim().parse::<usize>() {
                    return (1..=total_rows)
                        .filter(|&n| cmp(n, k))
                        .map(|n| n - 1)
                        .collect();
                }
            }
        }
    }
    (0..total_rows).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn display_hello() {
        let engine = ReferenceEngine::new();
        let outcome = engine.run("display \"Hello\"", false).await.unwrap();
        match outcome {
            EngineOutcome::Completed { output } => assert!(output.contains("Hello")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn display_arithmetic_after_literal() {
        let engine = ReferenceEngine::new();
        let outcome = engine
            .run("display \"after stop: \" 2+2", false)
            .await
            .unwrap();
        match outcome {
            EngineOutcome::Completed { output } => assert!(output.contains('4')),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_obs_generate_count_roundtrip() {
        let engine = ReferenceEngine::new();
        let outcome = engine
            .run("clear\nset obs 5\ngenerate x = _n\ncount", false)
            .await
            .unwrap();
        match outcome {
            EngineOutcome::Completed { output } => assert!(output.contains('5')),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn interrupt_during_sleep_is_reported_as_interrupted() {
        let engine = Arc::new(ReferenceEngine::new());
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run("sleep 2000", false).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        engine.interrupt();
        let outcome = runner.await.unwrap().unwrap();
        assert!(matches!(outcome, EngineOutcome::Interrupted { .. }));
    }

    #[tokio::test]
    async fn get_data_push_down_filters_without_mutating_session() {
        let engine = ReferenceEngine::new();
        engine
            .run("clear\nset obs 5\ngenerate x = _n", false)
            .await
            .unwrap();

        let filtered = engine.get_data(Some("_n <= 3"), 100).await.unwrap();
        assert_eq!(filtered.displayed_rows, 3);
        assert_eq!(filtered.total_rows, 5);

        // Session state unaffected by the filtered read.
        let unfiltered = engine.get_data(None, 100).await.unwrap();
        assert_eq!(unfiltered.total_rows, 5);
        assert_eq!(unfiltered.displayed_rows, 5);
    }
}

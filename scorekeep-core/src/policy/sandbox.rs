//! Embedded policy interpreter.
//!
//! Policies are Rhai script bodies. The submission is bound to `rawScore`
//! and the script's final value (or `return` value) is the policy output.
//! The engine is built from a reduced package set: no clock, no modules,
//! no `eval`. Every evaluation runs under a wall-clock deadline checked from
//! the progress hook plus a hard operation budget.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage,
    LogicPackage, MoreStringPackage, Package,
};
use rhai::{AST, Array, Dynamic, Engine, EvalAltResult, Map, Scope};
use scorekeep_model::RawScore;
use serde_json::Value;
use tracing::{debug, info};

use super::{ScoringPolicy, helpers};
use crate::error::{CompileError, InvocationError};

/// Name of the variable holding the submission inside a policy.
pub const INPUT_VARIABLE: &str = "rawScore";

const POLICY_LOG_TARGET: &str = "scorekeep::policy";

// Checking the clock on every operation is measurable; every 256th is not.
const DEADLINE_CHECK_INTERVAL: u64 = 256;

thread_local! {
    static DEADLINE: Cell<Option<Instant>> = const { Cell::new(None) };
}

/// Arms the per-thread deadline for one evaluation and restores the
/// previous value on drop.
struct DeadlineGuard {
    previous: Option<Instant>,
}

impl DeadlineGuard {
    fn arm(limit: Duration) -> Self {
        let deadline = Instant::now() + limit;
        let previous = DEADLINE.with(|cell| cell.replace(Some(deadline)));
        DeadlineGuard { previous }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        DEADLINE.with(|cell| cell.set(self.previous));
    }
}

fn deadline_passed() -> bool {
    DEADLINE.with(|cell| {
        cell.get().is_some_and(|deadline| Instant::now() >= deadline)
    })
}

/// Resource ceilings applied to every policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLimits {
    pub invoke_timeout: Duration,
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        SandboxLimits {
            invoke_timeout: Duration::from_millis(2_000),
            max_operations: 1_000_000,
            max_call_levels: 32,
            max_expr_depth: 64,
            max_string_size: 64 * 1024,
            max_array_size: 10_000,
            max_map_size: 1_000,
        }
    }
}

/// Shared, thread-safe policy interpreter.
pub struct PolicySandbox {
    engine: Engine,
    limits: SandboxLimits,
}

impl fmt::Debug for PolicySandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicySandbox")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl PolicySandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        let mut engine = Engine::new_raw();
        for module in [
            CorePackage::new().as_shared_module(),
            LogicPackage::new().as_shared_module(),
            BasicMathPackage::new().as_shared_module(),
            BasicArrayPackage::new().as_shared_module(),
            BasicMapPackage::new().as_shared_module(),
            MoreStringPackage::new().as_shared_module(),
        ] {
            engine.register_global_module(module);
        }

        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");

        engine.set_max_operations(limits.max_operations);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);

        engine.on_progress(|operations| {
            if operations % DEADLINE_CHECK_INTERVAL == 0 && deadline_passed() {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });
        engine.on_print(|text| info!(target: POLICY_LOG_TARGET, "{text}"));
        engine.on_debug(|text, source, position| {
            debug!(
                target: POLICY_LOG_TARGET,
                source = source.unwrap_or("policy"),
                %position,
                "{text}"
            );
        });

        helpers::register(&mut engine);

        PolicySandbox { engine, limits }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Parses policy source. Nothing is executed.
    pub fn compile(
        self: &Arc<Self>,
        source: &str,
    ) -> Result<CompiledPolicy, CompileError> {
        let ast = self.engine.compile(source).map_err(|err| CompileError {
            message: err.to_string(),
        })?;
        Ok(CompiledPolicy {
            ast: Arc::new(ast),
            sandbox: Arc::clone(self),
        })
    }

    fn run(&self, ast: &AST, raw: &RawScore) -> Result<Value, InvocationError> {
        let input = rhai::serde::to_dynamic(raw).map_err(|err| {
            InvocationError::Runtime(format!(
                "failed to expose {INPUT_VARIABLE} to policy: {err}"
            ))
        })?;
        let mut scope = Scope::new();
        scope.push_dynamic(INPUT_VARIABLE, input);

        let output = {
            let _deadline = DeadlineGuard::arm(self.limits.invoke_timeout);
            self.engine.eval_ast_with_scope::<Dynamic>(&mut scope, ast)
        }
        .map_err(|err| self.classify(*err))?;

        let output = expose_non_finite(output);
        rhai::serde::from_dynamic::<Value>(&output).map_err(|err| {
            InvocationError::Runtime(format!(
                "policy returned a value that is not plain data: {err}"
            ))
        })
    }

    fn classify(&self, err: EvalAltResult) -> InvocationError {
        match err {
            EvalAltResult::ErrorRuntime(value, _) => {
                InvocationError::Thrown(value.to_string())
            }
            EvalAltResult::ErrorTerminated(_, _) => {
                InvocationError::TimedOut(self.limits.invoke_timeout)
            }
            EvalAltResult::ErrorTooManyOperations(_) => {
                InvocationError::OperationBudget
            }
            EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => {
                self.classify(*inner)
            }
            other => InvocationError::Runtime(other.to_string()),
        }
    }
}

/// A parsed policy bound to the sandbox that compiled it. Cheap to clone.
#[derive(Clone)]
pub struct CompiledPolicy {
    ast: Arc<AST>,
    sandbox: Arc<PolicySandbox>,
}

impl fmt::Debug for CompiledPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPolicy")
            .field("limits", &self.sandbox.limits)
            .finish_non_exhaustive()
    }
}

impl ScoringPolicy for CompiledPolicy {
    fn evaluate(&self, raw: &RawScore) -> Result<Value, InvocationError> {
        self.sandbox.run(&self.ast, raw)
    }
}

/// JSON has no NaN or infinity, so they would otherwise surface as `null`.
/// Rendering them as text lets the contract reject them as non-numbers.
fn expose_non_finite(value: Dynamic) -> Dynamic {
    if let Ok(float) = value.as_float() {
        return if float.is_finite() {
            value
        } else {
            Dynamic::from(float.to_string())
        };
    }
    if value.is::<Map>() {
        let map: Map = value.try_cast().unwrap_or_default();
        return Dynamic::from_map(
            map.into_iter()
                .map(|(key, item)| (key, expose_non_finite(item)))
                .collect(),
        );
    }
    if value.is::<Array>() {
        let items: Array = value.try_cast().unwrap_or_default();
        return Dynamic::from_array(
            items.into_iter().map(expose_non_finite).collect(),
        );
    }
    value
}

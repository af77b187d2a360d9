// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The tool execution pipeline.
//!
//! A [`Tool`] composes a [`ToolPolicy`] (descriptor + tool-specific
//! validation + optimizer) with the shared substrate: target policy,
//! argument sanitizer, circuit breaker, concurrency limiter, and subprocess
//! spawner. `run` walks the full sequence and always returns a well-formed
//! [`ToolOutput`]; failures are classified into the error taxonomy and
//! surfaced, never retried.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::limiter::{AcquireError, SchedulerId, SemaphoreRegistry};
use crate::domain::breaker::CircuitBreaker;
use crate::domain::config::ConfigHandle;
use crate::domain::descriptor::ToolDescriptor;
use crate::domain::errors::{ErrorContext, ErrorType, ValidationError};
use crate::domain::events::ExecutionEvent;
use crate::domain::execution::{next_correlation_id, ExecutionRecord, ToolInput, ToolOutput};
use crate::domain::sanitizer::sanitize;
use crate::domain::target::{TargetKind, TargetPolicy};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::metrics;
use crate::infrastructure::spawner::{SpawnLimits, Spawner, NOT_FOUND_RETURNCODE};

/// Per-tool policy: descriptor plus the hooks the pipeline calls between
/// sanitization and spawn.
pub trait ToolPolicy: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// Tool-specific validation after target authorization and
    /// sanitization (mode-target compatibility, wordlist size, ...).
    fn validate(
        &self,
        input: &ToolInput,
        target: &TargetKind,
        tokens: &[String],
    ) -> Result<(), ValidationError> {
        let _ = (input, target, tokens);
        Ok(())
    }

    /// Prepend safe defaults for flags the caller omitted. Caller tokens
    /// come after defaults so they win under last-wins binaries.
    fn optimize(&self, tokens: Vec<String>) -> Vec<String> {
        tokens
    }

    /// Assemble the final argv (without the program itself). The default
    /// places the target last.
    fn build_argv(&self, target: &TargetKind, raw_target: &str, tokens: Vec<String>) -> Vec<String> {
        let _ = target;
        let mut argv = tokens;
        argv.push(raw_target.to_string());
        argv
    }
}

/// Shared execution environment threaded through every `run`.
#[derive(Clone)]
pub struct ExecutionEnv {
    pub config: ConfigHandle,
    pub limiter: Arc<SemaphoreRegistry>,
    pub spawner: Spawner,
    pub events: EventBus,
    pub scheduler: SchedulerId,
    pub cancel: CancellationToken,
}

/// One wrapped external scanner.
pub struct Tool {
    policy: Arc<dyn ToolPolicy>,
    breaker: CircuitBreaker,
    enabled: AtomicBool,
}

impl Tool {
    pub fn new(policy: Arc<dyn ToolPolicy>) -> Self {
        let breaker = CircuitBreaker::new(policy.descriptor().breaker);
        Self {
            policy,
            breaker,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.policy.descriptor().name
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        self.policy.descriptor()
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Execute one validated request. Never retries; never panics the
    /// transport — every failure folds into the returned output.
    pub async fn run(
        &self,
        input: ToolInput,
        timeout_override: Option<Duration>,
        env: &ExecutionEnv,
    ) -> ToolOutput {
        let started = Instant::now();
        let correlation_id = input
            .correlation_id
            .clone()
            .unwrap_or_else(next_correlation_id);
        let config = env.config.current();
        let descriptor = self.policy.descriptor();

        tracing::debug!(
            tool = self.name(),
            correlation_id = %correlation_id,
            target = %input.target,
            args = %truncate_for_log(&input.extra_args, config.limits.max_args_len),
            "execution requested"
        );

        if !self.enabled() {
            let ctx = self.error_context(
                ErrorType::ValidationError,
                format!("tool {} is disabled", self.name()),
                "enable the tool or remove it from TOOL_EXCLUDE".to_string(),
                &input.target,
            );
            return self.finish_failure(ctx, 1, correlation_id, started, env);
        }

        // 1. Resolve the binary before anything else.
        let program: PathBuf = match which::which(&descriptor.command_name) {
            Ok(path) => path,
            Err(_) => {
                let ctx = self.error_context(
                    ErrorType::NotFound,
                    format!("command not found on PATH: {}", descriptor.command_name),
                    format!("install {} or adjust PATH", descriptor.command_name),
                    &input.target,
                );
                return self.finish_failure(ctx, NOT_FOUND_RETURNCODE, correlation_id, started, env);
            }
        };

        // 2. Target policy.
        let target_policy = TargetPolicy::new(descriptor.max_network_size, descriptor.url_targets);
        let target = match target_policy.authorize(&input.target) {
            Ok(kind) => kind,
            Err(err) => {
                let ctx = self.validation_context(&err, &input.target);
                return self.finish_failure(ctx, 1, correlation_id, started, env);
            }
        };

        // 3. Argument sanitization.
        let tokens = match sanitize(&input.extra_args, descriptor, config.limits.max_args_len) {
            Ok(tokens) => tokens,
            Err(err) => {
                let ctx = self.validation_context(&err, &input.target);
                return self.finish_failure(ctx, 1, correlation_id, started, env);
            }
        };

        // 4. Tool-specific validation.
        if let Err(err) = self.policy.validate(&input, &target, &tokens) {
            let ctx = self.validation_context(&err, &input.target);
            return self.finish_failure(ctx, 1, correlation_id, started, env);
        }

        // 5. Optimizer, then final argv.
        let tokens = self.policy.optimize(tokens);
        let argv = self.policy.build_argv(&target, &input.target, tokens);

        // 6. Circuit-breaker gate.
        if !self.breaker.allow() {
            let retry = self
                .breaker
                .retry_after()
                .map(|d| d.as_secs().max(1))
                .unwrap_or(1);
            let ctx = self.error_context(
                ErrorType::CircuitBreakerOpen,
                format!("circuit breaker open for {}", self.name()),
                format!("wait for the recovery timeout (~{}s) before retrying", retry),
                &input.target,
            );
            metrics::breaker_state(self.name(), self.breaker.state());
            return self.finish_failure(ctx, 1, correlation_id, started, env);
        }

        // 7. Concurrency limit, racing cancellation.
        let permit = match env
            .limiter
            .acquire(
                self.name(),
                &env.scheduler,
                descriptor.concurrency,
                &env.cancel,
            )
            .await
        {
            Ok(permit) => permit,
            Err(AcquireError::Cancelled) => {
                let ctx = self.error_context(
                    ErrorType::Unknown,
                    "execution cancelled while waiting for a slot".to_string(),
                    "retry once the server is accepting work again".to_string(),
                    &input.target,
                );
                return self.finish_failure(ctx, 1, correlation_id, started, env);
            }
        };

        // 8. Spawn under the effective timeout.
        let timeout = effective_timeout(timeout_override, &input, descriptor.default_timeout);
        let limits = SpawnLimits {
            timeout,
            max_stdout_bytes: config.limits.max_stdout_bytes,
            max_stderr_bytes: config.limits.max_stderr_bytes,
            max_memory_mb: config.limits.max_memory_mb,
            max_file_descriptors: config.limits.max_file_descriptors,
        };

        metrics::active_incr(self.name());
        let spawned = env.spawner.spawn(&program, &argv, &limits).await;
        metrics::active_decr(self.name());
        drop(permit);

        // 9. Record into breaker and metrics, publish the event, assemble.
        let success = spawned.returncode == 0 && !spawned.timed_out;
        self.breaker.record(success);
        metrics::breaker_state(self.name(), self.breaker.state());

        let execution_time = started.elapsed().as_secs_f64();
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "tool".to_string(),
            serde_json::Value::String(self.name().to_string()),
        );
        metadata.insert(
            "command".to_string(),
            serde_json::Value::String(program.display().to_string()),
        );
        metadata.insert(
            "argv".to_string(),
            serde_json::Value::Array(
                argv.iter()
                    .map(|a| serde_json::Value::String(a.clone()))
                    .collect(),
            ),
        );

        let output = ToolOutput {
            stdout: spawned.stdout,
            stderr: spawned.stderr,
            returncode: spawned.returncode,
            truncated_stdout: spawned.truncated_stdout,
            truncated_stderr: spawned.truncated_stderr,
            timed_out: spawned.timed_out,
            error: spawned.error,
            error_type: spawned.error_type,
            execution_time_seconds: execution_time,
            correlation_id: correlation_id.clone(),
            metadata,
        };

        self.record_outcome(&output, env);

        if success {
            info!(
                tool = self.name(),
                correlation_id = %correlation_id,
                duration_seconds = execution_time,
                "execution completed"
            );
        } else {
            warn!(
                tool = self.name(),
                correlation_id = %correlation_id,
                target = %input.target,
                error_type = %output.error_type.map(|e| e.to_string()).unwrap_or_else(|| "none".to_string()),
                returncode = output.returncode,
                "execution failed"
            );
        }

        output
    }

    fn validation_context(&self, err: &ValidationError, target: &str) -> ErrorContext {
        self.error_context(
            ErrorType::ValidationError,
            err.to_string(),
            err.recovery_suggestion(),
            target,
        )
    }

    fn error_context(
        &self,
        error_type: ErrorType,
        message: String,
        recovery: String,
        target: &str,
    ) -> ErrorContext {
        ErrorContext::new(error_type, message, recovery, self.name(), target)
    }

    /// Fold a pre-spawn failure into an output, record it, and log it.
    fn finish_failure(
        &self,
        ctx: ErrorContext,
        returncode: i32,
        correlation_id: String,
        started: Instant,
        env: &ExecutionEnv,
    ) -> ToolOutput {
        warn!(
            tool = %ctx.tool_name,
            correlation_id = %correlation_id,
            target = %ctx.target,
            error_type = %ctx.error_type,
            "execution rejected: {}",
            ctx.message
        );
        let mut output = ToolOutput::from_error(&ctx, returncode, correlation_id);
        output.execution_time_seconds = started.elapsed().as_secs_f64();
        self.record_outcome(&output, env);
        output
    }

    fn record_outcome(&self, output: &ToolOutput, env: &ExecutionEnv) {
        let record = ExecutionRecord {
            tool_name: self.name().to_string(),
            success: output.success(),
            duration_seconds: output.execution_time_seconds,
            timed_out: output.timed_out,
            error_type: output.error_type,
        };
        metrics::record_execution(&record);
        env.events.publish_execution_event(ExecutionEvent {
            tool: record.tool_name,
            correlation_id: output.correlation_id.clone(),
            success: record.success,
            returncode: output.returncode,
            timed_out: output.timed_out,
            error_type: output.error_type,
            duration_seconds: output.execution_time_seconds,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Argument strings are logged verbatim, bounded by the configured length.
fn truncate_for_log(args: &str, max: usize) -> &str {
    if args.len() <= max {
        return args;
    }
    let mut end = max;
    while end > 0 && !args.is_char_boundary(end) {
        end -= 1;
    }
    &args[..end]
}

/// Effective wall-clock budget: override, then caller value, then default.
fn effective_timeout(
    timeout_override: Option<Duration>,
    input: &ToolInput,
    default_timeout: Duration,
) -> Duration {
    let requested = timeout_override.or_else(|| {
        input
            .timeout_sec
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(Duration::from_secs_f64)
    });
    let timeout = requested.unwrap_or(default_timeout);
    timeout.clamp(Duration::from_millis(100), Duration::from_secs(86_400))
}

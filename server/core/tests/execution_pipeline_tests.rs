// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end pipeline scenarios: argv composition, concurrency capping,
//! breaker lifecycle, placeholder preservation, timeout handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use warden_core::application::limiter::{SchedulerId, SemaphoreRegistry};
use warden_core::application::tool::{ExecutionEnv, Tool, ToolPolicy};
use warden_core::domain::config::{ConfigHandle, ServerConfig};
use warden_core::domain::descriptor::{BreakerParams, ToolDescriptor};
use warden_core::domain::errors::ErrorType;
use warden_core::domain::events::DomainEvent;
use warden_core::domain::execution::ToolInput;
use warden_core::domain::sanitizer::sanitize;
use warden_core::domain::target::{TargetKind, TargetPolicy};
use warden_core::infrastructure::event_bus::EventBus;
use warden_core::infrastructure::spawner::Spawner;
use warden_core::tools::nmap::NmapTool;

fn env() -> ExecutionEnv {
    ExecutionEnv {
        config: ConfigHandle::new(ServerConfig::default()),
        limiter: Arc::new(SemaphoreRegistry::new()),
        spawner: Spawner::new(),
        events: EventBus::new(64),
        scheduler: SchedulerId::new("pipeline-test"),
        cancel: CancellationToken::new(),
    }
}

/// Echoes its argv; optionally honors a payload-placeholder pattern.
struct EchoPolicy {
    descriptor: ToolDescriptor,
}

impl EchoPolicy {
    fn new() -> Self {
        let mut descriptor = ToolDescriptor::new("echo", "echo");
        descriptor.default_timeout = Duration::from_secs(5);
        descriptor.payload_pattern = Some(Regex::new(r"\^[A-Z]+\^").unwrap());
        Self { descriptor }
    }
}

impl ToolPolicy for EchoPolicy {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }
}

/// Runs `sh -c <script>`, with the script swappable mid-test.
struct ScriptPolicy {
    descriptor: ToolDescriptor,
    script: Mutex<String>,
}

impl ScriptPolicy {
    fn new(name: &str, script: &str, breaker: BreakerParams, concurrency: u32) -> Self {
        let mut descriptor = ToolDescriptor::new(name, "sh");
        descriptor.default_timeout = Duration::from_secs(10);
        descriptor.breaker = breaker;
        descriptor.concurrency = concurrency;
        Self {
            descriptor,
            script: Mutex::new(script.to_string()),
        }
    }

    fn set_script(&self, script: &str) {
        *self.script.lock() = script.to_string();
    }
}

impl ToolPolicy for ScriptPolicy {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn build_argv(&self, _: &TargetKind, _: &str, _: Vec<String>) -> Vec<String> {
        vec!["-c".to_string(), self.script.lock().clone()]
    }
}

#[test]
fn test_network_scan_argv_composition() {
    // Happy-path shape: caller port selection wins, defaults fill the rest,
    // target goes last.
    let config = ServerConfig::default();
    let tool = NmapTool::new(&config);
    let descriptor = tool.descriptor();

    let tokens = sanitize("--top-ports 10", descriptor, 2048).unwrap();
    let tokens = tool.optimize(tokens);
    let target_policy = TargetPolicy::new(descriptor.max_network_size, descriptor.url_targets);
    let target = target_policy.authorize("192.168.1.0/30").unwrap();
    let argv = tool.build_argv(&target, "192.168.1.0/30", tokens);

    assert!(argv.contains(&"-T4".to_string()));
    assert!(argv.windows(2).any(|w| w == ["--max-parallelism", "10"]));
    assert!(argv.contains(&"-Pn".to_string()));
    assert!(argv.windows(2).any(|w| w == ["--top-ports", "10"]));
    assert!(!argv.windows(2).any(|w| w == ["--top-ports", "1000"]));
    assert_eq!(argv.last().unwrap(), "192.168.1.0/30");
}

#[tokio::test]
async fn test_concurrency_cap_serializes_runs() {
    let policy = Arc::new(ScriptPolicy::new(
        "slow",
        "sleep 0.3",
        BreakerParams::new(50, Duration::from_secs(60), 1),
        1,
    ));
    let tool = Arc::new(Tool::new(policy));
    let env = env();

    let started = Instant::now();
    let a = {
        let (tool, env) = (tool.clone(), env.clone());
        tokio::spawn(async move { tool.run(ToolInput::new("127.0.0.1"), None, &env).await })
    };
    let b = {
        let (tool, env) = (tool.clone(), env.clone());
        tokio::spawn(async move { tool.run(ToolInput::new("127.0.0.1"), None, &env).await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(a.success() && b.success());
    // Capacity 1: the second run waited for the first.
    assert!(
        started.elapsed() >= Duration::from_millis(550),
        "runs overlapped despite concurrency 1: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_concurrency_two_runs_overlap() {
    let policy = Arc::new(ScriptPolicy::new(
        "wide",
        "sleep 0.3",
        BreakerParams::new(50, Duration::from_secs(60), 1),
        2,
    ));
    let tool = Arc::new(Tool::new(policy));
    let env = env();

    let started = Instant::now();
    let a = {
        let (tool, env) = (tool.clone(), env.clone());
        tokio::spawn(async move { tool.run(ToolInput::new("127.0.0.1"), None, &env).await })
    };
    let b = {
        let (tool, env) = (tool.clone(), env.clone());
        tokio::spawn(async move { tool.run(ToolInput::new("127.0.0.1"), None, &env).await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(a.success() && b.success());
    assert!(
        started.elapsed() < Duration::from_millis(550),
        "runs serialized despite concurrency 2: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_breaker_opens_then_recovers() {
    let policy = Arc::new(ScriptPolicy::new(
        "flaky",
        "exit 1",
        BreakerParams::new(2, Duration::from_secs(1), 1),
        1,
    ));
    let tool = Tool::new(policy.clone());
    let env = env();

    // Two consecutive failures trip the breaker.
    for _ in 0..2 {
        let out = tool.run(ToolInput::new("127.0.0.1"), None, &env).await;
        assert_eq!(out.returncode, 1);
    }

    // Denied without spawning.
    let out = tool.run(ToolInput::new("127.0.0.1"), None, &env).await;
    assert_eq!(out.error_type, Some(ErrorType::CircuitBreakerOpen));
    assert!(out.stdout.is_empty());

    // After the recovery window, a successful probe closes the breaker.
    policy.set_script("exit 0");
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let out = tool.run(ToolInput::new("127.0.0.1"), None, &env).await;
    assert!(out.success(), "half-open probe should be admitted");
    let out = tool.run(ToolInput::new("127.0.0.1"), None, &env).await;
    assert!(out.success(), "breaker should be closed again");
}

#[tokio::test]
async fn test_placeholders_reach_argv_byte_for_byte() {
    let tool = Tool::new(Arc::new(EchoPolicy::new()));
    let env = env();

    let output = tool
        .run(
            ToolInput::new("127.0.0.1").with_args("^USER^ ^PASS^"),
            None,
            &env,
        )
        .await;
    assert!(output.success());
    let argv: Vec<String> = output.metadata["argv"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(argv, vec!["^USER^", "^PASS^", "127.0.0.1"]);
    assert_eq!(output.stdout.trim(), "^USER^ ^PASS^ 127.0.0.1");

    // A denied metacharacter alongside the placeholder is rejected outright.
    let output = tool
        .run(
            ToolInput::new("127.0.0.1").with_args("^USER^;id"),
            None,
            &env,
        )
        .await;
    assert_eq!(output.error_type, Some(ErrorType::ValidationError));
    assert!(output.stdout.is_empty());
}

#[tokio::test]
async fn test_timeout_terminates_and_emits_event() {
    let policy = Arc::new(ScriptPolicy::new(
        "sleeper",
        "sleep 30",
        BreakerParams::new(50, Duration::from_secs(60), 1),
        1,
    ));
    let tool = Tool::new(policy);
    let env = env();
    let mut events = env.events.subscribe();

    let mut input = ToolInput::new("127.0.0.1");
    input.timeout_sec = Some(0.3);
    let started = Instant::now();
    let output = tool.run(input, None, &env).await;

    assert!(output.timed_out);
    assert_eq!(output.returncode, 124);
    assert_eq!(output.error_type, Some(ErrorType::Timeout));
    // Reaped promptly: well under the child's sleep, within scheduling slack.
    assert!(started.elapsed() < Duration::from_secs(2));

    match events.recv().await.unwrap() {
        DomainEvent::Execution(e) => {
            assert_eq!(e.tool, "sleeper");
            assert!(e.timed_out);
            assert_eq!(e.error_type, Some(ErrorType::Timeout));
        }
        other => panic!("expected execution event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_execution_time_is_nonnegative_and_single_valued() {
    let tool = Tool::new(Arc::new(EchoPolicy::new()));
    let env = env();
    let output = tool.run(ToolInput::new("127.0.0.1"), None, &env).await;
    assert!(output.execution_time_seconds >= 0.0);

    let json = serde_json::to_value(&output).unwrap();
    assert!(json["execution_time"].as_f64().unwrap() >= 0.0);
}

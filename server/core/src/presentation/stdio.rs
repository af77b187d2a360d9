// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Stdio transport.
//!
//! Newline-delimited JSON request/response surface with the same semantics
//! as the HTTP API. Methods: `list_tools` (no params) and `execute_tool`
//! (`{name, input}`). Execution responses carry the `ToolOutput` fields
//! directly, plus the echoed request `id`. Requests are handled
//! concurrently, so responses may interleave — callers match on `id`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::errors::{ErrorContext, ErrorType};
use crate::domain::execution::{next_correlation_id, ToolInput, ToolOutput};
use crate::presentation::http::AppState;

#[derive(Debug, Deserialize)]
struct StdioRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct ExecuteParams {
    name: String,
    input: ToolInput,
}

/// Read requests from stdin until EOF or shutdown, writing one JSON
/// response per line to stdout.
pub async fn run(state: Arc<AppState>, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!("stdio transport listening");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Value>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            let mut line = response.to_string();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let state = state.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = handle_line(&state, &line).await;
            let _ = tx.send(response).await;
        });
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}

/// Dispatch a single request line.
pub async fn handle_line(state: &AppState, line: &str) -> Value {
    let request: StdioRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            return json!({ "id": null, "error": format!("malformed request: {}", err) });
        }
    };

    match request.method.as_str() {
        "list_tools" => json!({ "id": request.id, "tools": state.registry.list() }),
        "execute_tool" => {
            let params: ExecuteParams = match serde_json::from_value(request.params) {
                Ok(params) => params,
                Err(err) => {
                    return json!({
                        "id": request.id,
                        "error": format!("invalid execute_tool params: {}", err),
                    });
                }
            };
            execute(state, request.id, params).await
        }
        other => json!({
            "id": request.id,
            "error": format!("unknown method: {}", other),
        }),
    }
}

async fn execute(state: &AppState, id: Value, params: ExecuteParams) -> Value {
    let Some(tool) = state.registry.get(&params.name) else {
        return json!({ "id": id, "error": format!("unknown tool: {}", params.name) });
    };

    let input = params.input;
    if !tool.enabled() {
        let correlation_id = input
            .correlation_id
            .clone()
            .unwrap_or_else(next_correlation_id);
        let ctx = ErrorContext::new(
            ErrorType::ValidationError,
            format!("tool {} is disabled", params.name),
            "enable the tool or remove it from TOOL_EXCLUDE".to_string(),
            params.name,
            input.target.clone(),
        );
        let output = ToolOutput::from_error(&ctx, 1, correlation_id);
        return respond(id, &output);
    }

    // Same detachment as HTTP: the run survives a dropped caller.
    let env = state.env.clone();
    let handle = tokio::spawn(async move { tool.run(input, None, &env).await });
    match handle.await {
        Ok(output) => respond(id, &output),
        Err(_) => json!({ "id": id, "error": "internal execution failure" }),
    }
}

/// The `ToolOutput` shape with the request id folded in.
fn respond(id: Value, output: &ToolOutput) -> Value {
    let mut value = serde_json::to_value(output).unwrap_or_else(|_| json!({}));
    if let Some(object) = value.as_object_mut() {
        object.insert("id".to_string(), id);
    }
    value
}

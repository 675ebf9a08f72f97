//! Stdio serve loop
//!
//! Thin framing adapter: one JSON request per line on stdin, one JSON
//! response per line on stdout. `{"op": "...", "params": {...}}` in,
//! `{"ok": true, "result": ...}` or `{"ok": false, "error": {...}}` out.
//! No wire-format guarantees; the service facade is the contract.

use std::io::{BufRead, Write};

use serde_json::{json, Value};
use tracing::info;

use sdl_core::features::slicing::SliceInput;

use crate::error::{Result, ServiceError};
use crate::service::{
    PolicyPatch, RegisterRepoRequest, SdlService, SkeletonRequest, WindowRequest,
};

/// Run until stdin closes.
pub fn run_stdio(service: &SdlService) -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    info!("stdio transport ready");
    serve(service, stdin.lock(), stdout.lock())
}

fn serve(service: &SdlService, reader: impl BufRead, mut writer: impl Write) -> Result<()> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match dispatch_line(service, &line) {
            Ok(result) => json!({ "ok": true, "result": result }),
            Err(err) => json!({
                "ok": false,
                "error": { "code": err.code(), "message": err.to_string() }
            }),
        };
        writeln!(writer, "{response}")?;
        writer.flush()?;
    }
    Ok(())
}

fn dispatch_line(service: &SdlService, line: &str) -> Result<Value> {
    let request: Value = serde_json::from_str(line)
        .map_err(|e| ServiceError::InvalidQuery(format!("malformed request: {e}")))?;
    let op = request
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::InvalidQuery("missing op".into()))?;
    let params = request.get("params").cloned().unwrap_or(json!({}));
    dispatch(service, op, params)
}

fn param_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| ServiceError::InvalidQuery(format!("missing param: {key}")))
}

fn dispatch(service: &SdlService, op: &str, params: Value) -> Result<Value> {
    match op {
        "repo.register" => {
            let request: RegisterRepoRequest = serde_json::from_value(params)?;
            service.register_repo(request)?;
            Ok(json!({ "ok": true }))
        }
        "repo.status" => {
            let repo_id = param_str(&params, "repoId")?;
            Ok(serde_json::to_value(service.repo_status(&repo_id)?)?)
        }
        "index.refresh" => {
            let repo_id = param_str(&params, "repoId")?;
            let full = params.get("mode").and_then(Value::as_str) == Some("full");
            let reason = params
                .get("reason")
                .and_then(Value::as_str)
                .map(String::from);
            Ok(serde_json::to_value(service.index_refresh(
                &repo_id, full, reason,
            )?)?)
        }
        "symbol.search" => {
            let repo_id = param_str(&params, "repoId")?;
            let query = param_str(&params, "query")?;
            let limit = params
                .get("limit")
                .and_then(Value::as_u64)
                .map(|v| v as usize);
            Ok(serde_json::to_value(service.symbol_search(
                &repo_id, &query, limit,
            )?)?)
        }
        "symbol.getCard" => {
            let repo_id = param_str(&params, "repoId")?;
            let symbol_id = param_str(&params, "symbolId")?;
            let etag = params
                .get("ifNoneMatch")
                .and_then(Value::as_str)
                .map(String::from);
            Ok(serde_json::to_value(service.symbol_get_card(
                &repo_id,
                &symbol_id,
                etag.as_deref(),
            )?)?)
        }
        "slice.build" => {
            let input: SliceInput = serde_json::from_value(params)?;
            Ok(serde_json::to_value(service.slice_build(&input)?)?)
        }
        "slice.refresh" => {
            let handle = param_str(&params, "sliceHandle")?;
            let known = params
                .get("knownVersion")
                .and_then(Value::as_i64)
                .ok_or_else(|| ServiceError::InvalidQuery("missing param: knownVersion".into()))?;
            Ok(serde_json::to_value(service.slice_refresh(&handle, known)?)?)
        }
        "delta.get" => {
            let repo_id = param_str(&params, "repoId")?;
            let from = params
                .get("fromVersion")
                .and_then(Value::as_i64)
                .ok_or_else(|| ServiceError::InvalidQuery("missing param: fromVersion".into()))?;
            let to = params
                .get("toVersion")
                .and_then(Value::as_i64)
                .ok_or_else(|| ServiceError::InvalidQuery("missing param: toVersion".into()))?;
            Ok(serde_json::to_value(service.delta_get(&repo_id, from, to)?)?)
        }
        "code.needWindow" => {
            let request: WindowRequest = serde_json::from_value(params)?;
            Ok(serde_json::to_value(service.code_need_window(&request)?)?)
        }
        "code.getSkeleton" => {
            let request: SkeletonRequest = serde_json::from_value(params)?;
            Ok(serde_json::to_value(service.code_get_skeleton(&request)?)?)
        }
        "policy.get" => {
            let repo_id = param_str(&params, "repoId")?;
            Ok(serde_json::to_value(service.policy_get(&repo_id)?)?)
        }
        "policy.set" => {
            let repo_id = param_str(&params, "repoId")?;
            let patch: PolicyPatch = params
                .get("policyPatch")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            Ok(serde_json::to_value(service.policy_set(&repo_id, &patch)?)?)
        }
        other => Err(ServiceError::InvalidQuery(format!("unknown op: {other}"))),
    }
}

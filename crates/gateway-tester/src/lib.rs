use core::fmt;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const DEFAULT_REGION: &str = "us-west-2";

/// Placeholder returned when a tools/call response carries no text content.
pub const NO_RESULT_PLACEHOLDER: &str = "No result";

pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";

const HTTP_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const SECTION_RULE: &str = "==================================================";

#[derive(Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Resolves the MCP endpoint for a gateway identifier.
///
/// Accepts either an HTTP(S) URL (a bare origin gets the conventional `/mcp`
/// path appended) or an AgentCore gateway ARN of the form
/// `arn:<partition>:bedrock-agentcore:<region>:<account>:gateway/<id>`.
/// A region embedded in the ARN wins over the `region` argument.
pub fn resolve_endpoint(gateway: &str, region: &str) -> anyhow::Result<String> {
    if gateway.starts_with("http://") || gateway.starts_with("https://") {
        let trimmed = gateway.trim_end_matches('/');
        let after_scheme = trimmed.split_once("://").map(|(_, rest)| rest).unwrap_or(trimmed);

        return if after_scheme.contains('/') {
            Ok(trimmed.to_owned())
        } else {
            Ok(format!("{trimmed}/mcp"))
        };
    }

    let mut parts = gateway.splitn(6, ':');

    let (Some("arn"), Some(_partition), Some(service), Some(arn_region), Some(_account), Some(resource)) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        anyhow::bail!("gateway must be an HTTP(S) URL or an AgentCore gateway ARN: {gateway}");
    };

    if service != "bedrock-agentcore" {
        anyhow::bail!("unexpected service in gateway ARN (wanted bedrock-agentcore): {service}");
    }

    let gateway_id = resource
        .strip_prefix("gateway/")
        .with_context(|| format!("gateway ARN resource is not a gateway: {resource}"))?;

    if gateway_id.is_empty() {
        anyhow::bail!("gateway ARN carries an empty gateway id: {gateway}");
    }

    let region = if arn_region.is_empty() { region } else { arn_region };

    Ok(format!(
        "https://{id}.gateway.bedrock-agentcore.{region}.amazonaws.com/mcp",
        id = gateway_id.to_ascii_lowercase(),
    ))
}

pub struct GatewayClient {
    http: reqwest::Client,
    endpoint: String,
    bearer_token: String,
    session_id: Option<String>,
    next_id: i64,
}

impl GatewayClient {
    pub fn new(
        endpoint: impl Into<String>,
        bearer_token: impl Into<String>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(HTTP_DEFAULT_TIMEOUT))
            .build()
            .context("failed to create HTTP client")?;

        Ok(GatewayClient {
            http,
            endpoint: endpoint.into(),
            bearer_token: bearer_token.into(),
            session_id: None,
            next_id: 1,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Sends `initialize` and captures the session identifier, when the
    /// gateway returns one, for the remainder of the process run.
    pub async fn initialize(&mut self) -> anyhow::Result<Option<String>> {
        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let payload = self.send("initialize", params).await.context("initialize request failed")?;

        // send() already captured the Mcp-Session-Id header; some gateways
        // put the identifier in the response envelope instead.
        if self.session_id.is_none() {
            self.session_id = payload
                .get("sessionId")
                .or_else(|| payload.get("result").and_then(|result| result.get("sessionId")))
                .and_then(|value| value.as_str())
                .map(ToOwned::to_owned);
        }

        if self.session_id.is_none() {
            warn!("the gateway did not return a session id; continuing without one");
        }

        Ok(self.session_id.clone())
    }

    pub async fn list_tools(&mut self) -> anyhow::Result<Vec<ToolDescriptor>> {
        let payload = self
            .send("tools/list", serde_json::json!({}))
            .await
            .context("tools/list request failed")?;

        let tools = payload
            .get("result")
            .and_then(|result| result.get("tools"))
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));

        serde_json::from_value(tools).context("unexpected tools/list response shape")
    }

    pub async fn call_tool(&mut self, name: &str, arguments: &serde_json::Value) -> anyhow::Result<String> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let payload = self
            .send("tools/call", params)
            .await
            .with_context(|| format!("tools/call request failed for `{name}`"))?;

        Ok(extract_text_content(&payload))
    }

    async fn send(&mut self, method: &str, params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_owned(),
            id: self.next_id,
            method: method.to_owned(),
            params,
        };
        self.next_id += 1;

        debug!(method = %request.method, id = request.id, "Sending JSON-RPC request");

        let mut builder = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .bearer_auth(&self.bearer_token);

        if let Some(session_id) = self.session_id.as_deref() {
            builder = builder.header(SESSION_ID_HEADER, session_id);
        }

        let response = builder.send().await.context("failed to send request to the gateway")?;

        let status = response.status();
        let session_from_header = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);

        let body_text = response.text().await.context("failed to read response body")?;

        if body_text.trim().is_empty() {
            anyhow::bail!("empty response body from the gateway (status: {status})");
        }

        let payload: serde_json::Value = if body_text.starts_with("event:") || body_text.contains("data:") {
            let Some(json_data) = extract_sse_json_line(&body_text) else {
                anyhow::bail!("no data found in SSE response");
            };

            serde_json::from_str(json_data)
                .with_context(|| format!("failed to parse SSE JSON data; status: {status}, data: {json_data}"))?
        } else {
            serde_json::from_str(&body_text)
                .with_context(|| format!("failed to parse JSON response; status: {status}, body: {body_text}"))?
        };

        if !status.is_success() {
            anyhow::bail!("gateway returned {status}: {payload}");
        }

        if let Some(error) = payload.get("error") {
            if !error.is_null() {
                let code = error.get("code").and_then(|value| value.as_i64()).unwrap_or_default();
                let message = error.get("message").and_then(|value| value.as_str()).unwrap_or("unknown error");
                anyhow::bail!("gateway returned JSON-RPC error {code}: {message}");
            }
        }

        if self.session_id.is_none() {
            if let Some(session_id) = session_from_header {
                debug!(%session_id, "Captured session id from response header");
                self.session_id = Some(session_id);
            }
        }

        Ok(payload)
    }
}

/// Extract the first `data: ...` JSON line from an SSE body (if present).
pub fn extract_sse_json_line(body: &str) -> Option<&str> {
    body.lines().find_map(|line| line.strip_prefix("data: ").map(str::trim))
}

/// First `result.content[].text` entry of a tools/call response, or the
/// fixed placeholder when the structure is absent.
pub fn extract_text_content(payload: &serde_json::Value) -> String {
    payload
        .get("result")
        .and_then(|result| result.get("content"))
        .and_then(|content| content.as_array())
        .and_then(|items| items.first())
        .and_then(|item| item.get("text"))
        .and_then(|text| text.as_str())
        .unwrap_or(NO_RESULT_PLACEHOLDER)
        .to_owned()
}

pub struct ToolExample {
    pub label: &'static str,
    pub tool: &'static str,
    pub arguments: serde_json::Value,
}

/// Demonstration payloads driven against the gateway, as a data table so the
/// same driver works for arbitrary tool sets.
pub fn example_invocations() -> Vec<ToolExample> {
    vec![
        ToolExample {
            label: "add_numbers(5, 3)",
            tool: "add_numbers",
            arguments: serde_json::json!({"a": 5, "b": 3}),
        },
        ToolExample {
            label: "multiply_numbers(4, 7)",
            tool: "multiply_numbers",
            arguments: serde_json::json!({"a": 4, "b": 7}),
        },
        ToolExample {
            label: "greet_user(\"Alice\")",
            tool: "greet_user",
            arguments: serde_json::json!({"name": "Alice"}),
        },
    ]
}

#[derive(Debug)]
pub struct ProbeCfg {
    pub endpoint: String,
    pub bearer_token: String,
    pub timeout: Option<Duration>,
    /// Continue with tool listing even when session initialization fails,
    /// for gateways that accept sessionless requests.
    pub keep_going: bool,
}

pub async fn probe(out: &mut dyn fmt::Write, cfg: ProbeCfg) -> anyhow::Result<()> {
    probe_with_examples(out, cfg, &example_invocations()).await
}

pub async fn probe_with_examples(
    out: &mut dyn fmt::Write,
    cfg: ProbeCfg,
    examples: &[ToolExample],
) -> anyhow::Result<()> {
    let mut client = GatewayClient::new(cfg.endpoint.as_str(), cfg.bearer_token.as_str(), cfg.timeout)?;

    writeln!(out, "🔄 Initializing MCP session with the gateway...")?;

    match client.initialize().await {
        Ok(Some(session_id)) => {
            writeln!(out, "✓ MCP session initialized: {session_id}")?;
            writeln!(out)?;
        }
        Ok(None) => {
            writeln!(out, "✓ MCP session initialized (no session id returned)")?;
            writeln!(out)?;
        }
        Err(e) if cfg.keep_going => {
            writeln!(out, "❌ Failed to initialize session: {e:#}")?;
            writeln!(out, "   Continuing anyway (--keep-going)")?;
            writeln!(out)?;
        }
        Err(e) => {
            writeln!(out, "❌ Failed to initialize session")?;
            return Err(e);
        }
    }

    writeln!(out, "🔄 Listing available tools through the gateway...")?;
    writeln!(out)?;

    let tools = client.list_tools().await?;

    writeln!(out, "📋 Available MCP tools (via gateway):")?;
    writeln!(out, "{SECTION_RULE}")?;

    for tool in &tools {
        writeln!(out, "🔧 {}: {}", tool.name, tool.description.as_deref().unwrap_or("No description"))?;
    }

    writeln!(out)?;
    writeln!(out, "🧪 Testing MCP tools through the gateway:")?;
    writeln!(out, "{SECTION_RULE}")?;

    for example in examples {
        writeln!(out)?;
        writeln!(out, "🔄 Testing {} via the gateway...", example.label)?;

        let result = client.call_tool(example.tool, &example.arguments).await?;

        writeln!(out, "   Result: {result}")?;
    }

    writeln!(out)?;
    writeln!(out, "✅ Gateway tool testing completed!")?;

    Ok(())
}

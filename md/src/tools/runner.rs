//! ToolRunner - role-scoped dispatch with idempotency and journaling

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use crate::domain::AgentDefinition;
use crate::llm::{ToolCall, ToolDefinition};
use crate::state::StateManager;

use super::builtin::standard_tools;
use super::context::ToolContext;
use super::error::ToolError;
use super::traits::{SideEffectClass, Tool, ToolResult};

/// Compute the idempotency key from (agent, tool, canonicalized args)
pub fn canonical_idempotency_key(agent_id: &str, tool: &str, args: &serde_json::Value) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    agent_id.hash(&mut hasher);
    tool.hash(&mut hasher);
    canonicalize(args).hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Serialize a JSON value with object keys sorted at every level
fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

/// Dispatches tool calls for agents
pub struct ToolRunner {
    tools: HashMap<String, Arc<dyn Tool>>,
    state: Option<StateManager>,
    default_timeout: Duration,
    android_timeout: Duration,
    in_flight: Mutex<HashMap<String, watch::Receiver<Option<ToolResult>>>>,
}

impl ToolRunner {
    /// Runner with the standard tool set
    pub fn standard(default_timeout: Duration, android_timeout: Duration) -> Self {
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        for tool in standard_tools() {
            tools.insert(tool.name().to_string(), tool);
        }
        Self {
            tools,
            state: None,
            default_timeout,
            android_timeout,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Journal executions through the store
    pub fn with_state(mut self, state: StateManager) -> Self {
        self.state = Some(state);
        self
    }

    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool definitions for an agent's allow-list
    pub fn definitions_for(&self, allow_list: &[String]) -> Vec<ToolDefinition> {
        allow_list
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Redirect generic calls to the platform-appropriate tool
    ///
    /// Android phases must build through the Android builder; the generic
    /// builder is swapped out when the phase declares an Android stack.
    fn effective_tool_name(&self, requested: &str, ctx: &ToolContext) -> String {
        if requested == "build" && ctx.is_android_stack() && self.tools.contains_key("build_android") {
            debug!(agent = %ctx.agent_id, "Redirecting generic build to build_android");
            return "build_android".to_string();
        }
        requested.to_string()
    }

    /// Invoke one tool call for an agent
    ///
    /// Err is reserved for policy violations (forbidden, stack mismatch,
    /// missing approval) and argument/registry errors; execution failures
    /// come back as error-flagged results.
    pub async fn invoke(
        &self,
        agent: &AgentDefinition,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        if !agent.allows_tool(&call.name) {
            return Err(ToolError::Forbidden {
                agent: agent.id.clone(),
                tool: call.name.clone(),
            });
        }

        let name = self.effective_tool_name(&call.name, ctx);
        let tool = self.tools.get(&name).ok_or_else(|| ToolError::Unknown(name.clone()))?;

        stack_check(&name, &call.input, ctx)?;
        validate_args(&name, &tool.input_schema(), &call.input)?;

        if tool.side_effect() == SideEffectClass::Deploy {
            if !agent.permissions.may_deploy {
                return Err(ToolError::Forbidden {
                    agent: agent.id.clone(),
                    tool: name,
                });
            }
            if !ctx.deploy_approved {
                return Err(ToolError::ApprovalRequired {
                    action: format!("deploy via {}", name),
                });
            }
        }

        let key = canonical_idempotency_key(&agent.id, &name, &call.input);

        // Cached result for idempotent tools: one journaled execution per key
        if tool.idempotent()
            && let Some(state) = &self.state
            && let Ok(Some(prior)) = state.find_tool_call_by_key(&key).await
            && let Some(result) = prior.result
        {
            debug!(tool = %name, key = %key, "Serving cached idempotent result");
            return Ok(ToolResult {
                content: result,
                is_error: prior.is_error,
            });
        }

        // Coalesce duplicate in-flight calls
        let notifier = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(rx) = in_flight.get(&key) {
                let mut rx = rx.clone();
                drop(in_flight);
                debug!(tool = %name, key = %key, "Coalescing duplicate in-flight call");
                loop {
                    if let Some(result) = rx.borrow().clone() {
                        return Ok(result);
                    }
                    if rx.changed().await.is_err() {
                        // Original caller vanished; fall through and execute
                        break;
                    }
                }
                None
            } else {
                let (tx, rx) = watch::channel(None);
                in_flight.insert(key.clone(), rx);
                Some(tx)
            }
        };

        let timeout = if name == "build_android" {
            self.android_timeout
        } else {
            tool.timeout().unwrap_or(self.default_timeout)
        };

        let started = std::time::Instant::now();
        let result = match tokio::time::timeout(timeout, tool.execute(call.input.clone(), ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = %name, ?timeout, "Tool timed out");
                ToolResult::error(format!("tool {} timed out after {:?}", name, timeout))
            }
        };
        let duration_ms = started.elapsed().as_millis() as i64;

        if let Some(tx) = notifier {
            let _ = tx.send(Some(result.clone()));
            self.in_flight.lock().await.remove(&key);
        }

        if let Some(state) = &self.state {
            let row = missionstore::ToolCallRow {
                id: uuid::Uuid::now_v7().to_string(),
                agent_id: agent.id.clone(),
                tool: name.clone(),
                args: call.input.clone(),
                idempotency_key: key,
                result: Some(result.content.clone()),
                is_error: result.is_error,
                duration_ms,
                created_at: chrono::Utc::now().timestamp_millis(),
            };
            if let Err(e) = state.record_tool_call(row).await {
                warn!(error = %e, "Failed to journal tool call");
            }
        }

        Ok(result)
    }
}

/// Platform stack guard
///
/// Android builds must go through the Android builder; shelling gradle out
/// through the generic command tool is a bypass and fails. The Android
/// builder itself is refused outside Android phases.
fn stack_check(name: &str, args: &serde_json::Value, ctx: &ToolContext) -> Result<(), ToolError> {
    if ctx.is_android_stack()
        && name == "run_command"
        && args["command"]
            .as_str()
            .map(|c| c.contains("gradle"))
            .unwrap_or(false)
    {
        return Err(ToolError::StackMismatch {
            detail: "android builds must go through build_android, not the shell".to_string(),
        });
    }
    if name == "build_android" && !ctx.is_android_stack() {
        return Err(ToolError::StackMismatch {
            detail: format!("build_android is not valid for the {} stack", ctx.technology),
        });
    }
    Ok(())
}

/// Coarse validation against the declared JSON schema: required fields are
/// present, declared property types match
fn validate_args(tool: &str, schema: &serde_json::Value, args: &serde_json::Value) -> Result<(), ToolError> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    for field in required {
        let Some(field) = field.as_str() else { continue };
        if args.get(field).is_none() {
            return Err(ToolError::InvalidArgs {
                tool: tool.to_string(),
                detail: format!("missing required field {}", field),
            });
        }
    }
    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (field, declared) in properties {
            let Some(value) = args.get(field) else { continue };
            let Some(expected) = declared.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "number" | "integer" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(ToolError::InvalidArgs {
                    tool: tool.to_string(),
                    detail: format!("field {} should be {}", field, expected),
                });
            }
        }
    }
    Ok(())
}

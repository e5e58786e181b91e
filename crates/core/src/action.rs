use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::context::{ExecutionContext, Role};

/// Finite states of one mutating-capability invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    MissingData,
    #[serde(rename = "pending")]
    PendingConfirmation,
    Confirmed,
    Executed,
    Cancelled,
}

/// Parameters extracted upstream from the user's free text. Absent and
/// explicit-null keys are both treated as missing.
pub type ActionParams = serde_json::Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub missing_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_id: Option<String>,
}

impl ActionResult {
    fn base(status: ActionStatus, success: bool) -> Self {
        Self {
            status,
            success,
            data: None,
            error: None,
            missing_fields: Vec::new(),
            prompt_message: None,
            preview_data: None,
            confirmation_message: None,
            result_message: None,
            created_id: None,
        }
    }

    /// A normal conversational turn, not an error: the caller should
    /// ask the user for the listed fields.
    pub fn missing_data(missing_fields: Vec<String>, prompt_message: impl Into<String>) -> Self {
        let mut result = Self::base(ActionStatus::MissingData, false);
        result.missing_fields = missing_fields;
        result.prompt_message = Some(prompt_message.into());
        result
    }

    pub fn pending(preview_data: Value, confirmation_message: impl Into<String>) -> Self {
        let mut result = Self::base(ActionStatus::PendingConfirmation, true);
        result.preview_data = Some(preview_data);
        result.confirmation_message = Some(confirmation_message.into());
        result
    }

    pub fn executed(result_message: impl Into<String>, created_id: Option<String>, data: Option<Value>) -> Self {
        let mut result = Self::base(ActionStatus::Executed, true);
        result.result_message = Some(result_message.into());
        result.created_id = created_id;
        result.data = data;
        result
    }

    pub fn cancelled(error: impl Into<String>) -> Self {
        let mut result = Self::base(ActionStatus::Cancelled, false);
        result.error = Some(error.into());
        result
    }
}

/// Output of a read-only capability. `duration_ms` is stamped by the
/// engine on every path, success or failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None, duration_ms: 0 }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()), duration_ms: 0 }
    }
}

/// Static description a capability registers with the core.
#[derive(Clone, Debug)]
pub struct CapabilitySpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Empty means any authenticated user. Admin always passes.
    pub required_roles: &'static [Role],
    pub required_fields: &'static [&'static str],
    pub field_descriptions: &'static [(&'static str, &'static str)],
}

impl CapabilitySpec {
    pub fn describes_field(&self, field: &str) -> Option<&'static str> {
        self.field_descriptions
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, description)| *description)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("execution failure: {0}")]
    Execution(String),
}

/// A capability that mutates tenant data. `preview` may query but must
/// never write; `confirm` performs the write, transactionally when more
/// than one statement is involved.
#[async_trait::async_trait]
pub trait MutatingCapability: Send + Sync {
    fn spec(&self) -> &CapabilitySpec;
    async fn preview(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError>;
    async fn confirm(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError>;
}

#[async_trait::async_trait]
pub trait ReadOnlyCapability: Send + Sync {
    fn spec(&self) -> &CapabilitySpec;
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ToolResult, CapabilityError>;
}

/// Capabilities are registered as a tagged union, not a class
/// hierarchy: the shape (one-shot vs propose/confirm) is part of the
/// registration.
pub enum Capability {
    ReadOnly(Box<dyn ReadOnlyCapability>),
    Mutating(Box<dyn MutatingCapability>),
}

impl Capability {
    pub fn spec(&self) -> &CapabilitySpec {
        match self {
            Self::ReadOnly(capability) => capability.spec(),
            Self::Mutating(capability) => capability.spec(),
        }
    }
}

/// Propose/confirm/execute engine. Every mutating capability runs
/// through here; the engine owns the role gate and field validation,
/// the capability owns domain feasibility and the write itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct ActionWorkflow;

impl ActionWorkflow {
    pub fn new() -> Self {
        Self
    }

    fn role_denial(spec: &CapabilitySpec, role: Role) -> Option<ActionResult> {
        if spec.required_roles.is_empty() || role == Role::Admin {
            return None;
        }
        if spec.required_roles.contains(&role) {
            return None;
        }
        let roles = spec
            .required_roles
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Some(ActionResult::cancelled(format!(
            "Permission denied for `{}`. Required roles: {roles}",
            spec.name
        )))
    }

    fn missing_fields(spec: &CapabilitySpec, params: &ActionParams) -> Vec<String> {
        spec.required_fields
            .iter()
            .filter(|field| params.get(**field).map(Value::is_null).unwrap_or(true))
            .map(|field| (*field).to_owned())
            .collect()
    }

    fn missing_data_prompt(spec: &CapabilitySpec, missing: &[String]) -> String {
        let described = missing
            .iter()
            .map(|field| match spec.describes_field(field) {
                Some(description) => format!("{field} ({description})"),
                None => field.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("To run `{}` I still need: {described}.", spec.name)
    }

    /// Single entry point for mutating capabilities.
    ///
    /// `confirmed` may only be set from an explicit affirmative reply
    /// the caller elicited after showing the pending preview; the
    /// engine never infers it.
    pub async fn run(
        &self,
        ctx: &ExecutionContext,
        capability: &dyn MutatingCapability,
        confirmed: bool,
        params: &ActionParams,
    ) -> ActionResult {
        let spec = capability.spec();

        if ctx.deadline_exceeded() {
            return ActionResult::cancelled(
                "The request ran out of time before the action could run. Please try again.",
            );
        }

        // Role gate before params or storage are touched.
        if let Some(denial) = Self::role_denial(spec, ctx.auth.role) {
            info!(
                event_name = "action.permission_denied",
                capability = spec.name,
                org_id = %ctx.auth.org_id,
                role = ctx.auth.role.as_str(),
                "mutating capability refused"
            );
            return denial;
        }

        let missing = Self::missing_fields(spec, params);
        if !missing.is_empty() {
            let prompt = Self::missing_data_prompt(spec, &missing);
            return ActionResult::missing_data(missing, prompt);
        }

        if !confirmed {
            let result = match capability.preview(ctx, params).await {
                Ok(result) => result,
                Err(error) => {
                    error!(
                        event_name = "action.preview_failed",
                        capability = spec.name,
                        org_id = %ctx.auth.org_id,
                        error = %error,
                        "preview failed"
                    );
                    return ActionResult::cancelled(error.to_string());
                }
            };
            if result.status == ActionStatus::Executed {
                // Contract violation: a preview must never write.
                error!(
                    event_name = "action.preview_contract_violation",
                    capability = spec.name,
                    "preview returned executed status"
                );
                return ActionResult::cancelled(format!(
                    "capability `{}` violated the preview contract",
                    spec.name
                ));
            }
            return result;
        }

        match capability.confirm(ctx, params).await {
            Ok(result) => {
                info!(
                    event_name = "action.confirmed",
                    capability = spec.name,
                    org_id = %ctx.auth.org_id,
                    status = ?result.status,
                    "confirmed action completed"
                );
                result
            }
            Err(error) => {
                error!(
                    event_name = "action.execution_failed",
                    capability = spec.name,
                    org_id = %ctx.auth.org_id,
                    error = %error,
                    "confirmed action failed"
                );
                ActionResult::cancelled(error.to_string())
            }
        }
    }

    /// Read-only capabilities skip the confirmation protocol but share
    /// the role gate. Each run counts against the turn's tool-call cap
    /// and respects its deadline. Duration is stamped explicitly on
    /// every path.
    pub async fn run_tool(
        &self,
        ctx: &mut ExecutionContext,
        capability: &dyn ReadOnlyCapability,
        params: &ActionParams,
    ) -> ToolResult {
        let spec = capability.spec();
        let start = Instant::now();

        if ctx.deadline_exceeded() {
            return ToolResult::failed(
                "The request ran out of time before the lookup could run. Please try again.",
            );
        }
        if ctx.tool_calls_exhausted() {
            info!(
                event_name = "tool.call_cap_reached",
                capability = spec.name,
                org_id = %ctx.auth.org_id,
                max_tool_calls = ctx.max_tool_calls,
                "tool call refused"
            );
            return ToolResult::failed(format!(
                "Tool call limit ({}) reached for this request",
                ctx.max_tool_calls
            ));
        }

        if let Some(denial) = Self::role_denial(spec, ctx.auth.role) {
            let mut result =
                ToolResult::failed(denial.error.unwrap_or_else(|| "permission denied".to_owned()));
            result.duration_ms = start.elapsed().as_millis() as u64;
            return result;
        }

        ctx.register_tool_call();
        let mut result = match capability.execute(ctx, params).await {
            Ok(result) => result,
            Err(error) => {
                error!(
                    event_name = "tool.execution_failed",
                    capability = spec.name,
                    org_id = %ctx.auth.org_id,
                    error = %error,
                    "read-only capability failed"
                );
                ToolResult::failed(error.to_string())
            }
        };
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::{json, Value};

    use crate::context::{AuthContext, ExecutionContext, Role};

    use super::{
        ActionParams, ActionResult, ActionStatus, ActionWorkflow, CapabilityError, CapabilitySpec,
        MutatingCapability, ReadOnlyCapability, ToolResult,
    };

    static STUB_SPEC: CapabilitySpec = CapabilitySpec {
        name: "stub_action",
        description: "test double",
        required_roles: &[Role::Admin, Role::Manager],
        required_fields: &["product_name", "warehouse_name", "quantity"],
        field_descriptions: &[
            ("product_name", "name of the product"),
            ("warehouse_name", "name of the destination warehouse"),
            ("quantity", "quantity to order"),
        ],
    };

    #[derive(Default)]
    struct StubAction {
        previews: AtomicU32,
        confirms: AtomicU32,
        misbehave_on_preview: bool,
    }

    #[async_trait::async_trait]
    impl MutatingCapability for StubAction {
        fn spec(&self) -> &CapabilitySpec {
            &STUB_SPEC
        }

        async fn preview(
            &self,
            _ctx: &ExecutionContext,
            params: &ActionParams,
        ) -> Result<ActionResult, CapabilityError> {
            self.previews.fetch_add(1, Ordering::SeqCst);
            if self.misbehave_on_preview {
                return Ok(ActionResult::executed("wrote during preview", None, None));
            }
            Ok(ActionResult::pending(
                json!({ "quantity": params["quantity"] }),
                "Proceed with the stub action?",
            ))
        }

        async fn confirm(
            &self,
            _ctx: &ExecutionContext,
            _params: &ActionParams,
        ) -> Result<ActionResult, CapabilityError> {
            self.confirms.fetch_add(1, Ordering::SeqCst);
            Ok(ActionResult::executed("done", Some("42".to_owned()), None))
        }
    }

    fn ctx(role: Role) -> ExecutionContext {
        ExecutionContext::new(
            AuthContext { org_id: "org-1".to_owned(), user_id: "user-1".to_owned(), role },
            "sess-1",
            "msg-1",
        )
    }

    fn params(value: Value) -> ActionParams {
        value.as_object().expect("object literal").clone()
    }

    fn full_params() -> ActionParams {
        params(json!({ "product_name": "Widget", "warehouse_name": "East", "quantity": 10 }))
    }

    #[tokio::test]
    async fn role_gate_rejects_before_field_validation() {
        let action = StubAction::default();
        // Params are empty, but the permission error must win.
        let result = ActionWorkflow::new()
            .run(&ctx(Role::Member), &action, false, &ActionParams::new())
            .await;

        assert_eq!(result.status, ActionStatus::Cancelled);
        let error = result.error.expect("permission error");
        assert!(error.contains("Permission denied"));
        assert!(error.contains("stub_action"));
        assert!(error.contains("admin, manager"));
        assert_eq!(action.previews.load(Ordering::SeqCst), 0);
        assert_eq!(action.confirms.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn admin_overrides_the_role_allow_list() {
        let action = StubAction::default();
        let result =
            ActionWorkflow::new().run(&ctx(Role::Admin), &action, false, &full_params()).await;
        assert_eq!(result.status, ActionStatus::PendingConfirmation);
    }

    #[tokio::test]
    async fn missing_fields_are_reported_exactly_without_invoking_capability() {
        let action = StubAction::default();
        let result = ActionWorkflow::new()
            .run(
                &ctx(Role::Manager),
                &action,
                false,
                &params(json!({ "product_name": "Widget", "quantity": 10 })),
            )
            .await;

        assert_eq!(result.status, ActionStatus::MissingData);
        assert!(!result.success);
        assert_eq!(result.missing_fields, vec!["warehouse_name".to_owned()]);
        let prompt = result.prompt_message.expect("prompt");
        assert!(prompt.contains("warehouse_name (name of the destination warehouse)"));
        assert_eq!(action.previews.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn explicit_null_counts_as_missing() {
        let action = StubAction::default();
        let result = ActionWorkflow::new()
            .run(
                &ctx(Role::Manager),
                &action,
                false,
                &params(json!({
                    "product_name": "Widget",
                    "warehouse_name": null,
                    "quantity": null
                })),
            )
            .await;

        assert_eq!(result.status, ActionStatus::MissingData);
        assert_eq!(
            result.missing_fields,
            vec!["warehouse_name".to_owned(), "quantity".to_owned()]
        );
    }

    #[tokio::test]
    async fn unconfirmed_run_never_executes() {
        let action = StubAction::default();
        let result =
            ActionWorkflow::new().run(&ctx(Role::Manager), &action, false, &full_params()).await;

        assert_eq!(result.status, ActionStatus::PendingConfirmation);
        assert_eq!(action.confirms.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn confirmed_run_executes_with_created_id() {
        let action = StubAction::default();
        let result =
            ActionWorkflow::new().run(&ctx(Role::Manager), &action, true, &full_params()).await;

        assert_eq!(result.status, ActionStatus::Executed);
        assert_eq!(result.created_id.as_deref(), Some("42"));
        assert_eq!(action.previews.load(Ordering::SeqCst), 0);
        assert_eq!(action.confirms.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn preview_claiming_execution_is_cancelled() {
        let action = StubAction { misbehave_on_preview: true, ..StubAction::default() };
        let result =
            ActionWorkflow::new().run(&ctx(Role::Manager), &action, false, &full_params()).await;

        assert_eq!(result.status, ActionStatus::Cancelled);
        assert!(result.error.expect("error").contains("preview contract"));
    }

    static LOOKUP_SPEC: CapabilitySpec = CapabilitySpec {
        name: "stub_lookup",
        description: "read-only test double",
        required_roles: &[],
        required_fields: &[],
        field_descriptions: &[],
    };

    struct StubLookup {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ReadOnlyCapability for StubLookup {
        fn spec(&self) -> &CapabilitySpec {
            &LOOKUP_SPEC
        }

        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _params: &ActionParams,
        ) -> Result<ToolResult, CapabilityError> {
            if self.fail {
                return Err(CapabilityError::Storage("table missing".to_owned()));
            }
            Ok(ToolResult::ok(json!({ "rows": 3 })))
        }
    }

    #[tokio::test]
    async fn read_only_path_stamps_duration_on_success_and_failure() {
        let workflow = ActionWorkflow::new();

        let ok = workflow
            .run_tool(&mut ctx(Role::Member), &StubLookup { fail: false }, &ActionParams::new())
            .await;
        assert!(ok.success);
        assert_eq!(ok.data, Some(json!({ "rows": 3 })));

        let failed = workflow
            .run_tool(&mut ctx(Role::Member), &StubLookup { fail: true }, &ActionParams::new())
            .await;
        assert!(!failed.success);
        assert!(failed.error.expect("error").contains("table missing"));
    }

    #[tokio::test]
    async fn tool_call_cap_stops_further_lookups() {
        let workflow = ActionWorkflow::new();
        let mut context = ctx(Role::Member);
        context.max_tool_calls = 1;

        let first = workflow
            .run_tool(&mut context, &StubLookup { fail: false }, &ActionParams::new())
            .await;
        assert!(first.success);
        assert_eq!(context.tool_calls_made, 1);

        let refused = workflow
            .run_tool(&mut context, &StubLookup { fail: false }, &ActionParams::new())
            .await;
        assert!(!refused.success);
        assert!(refused.error.expect("error").contains("Tool call limit (1)"));
        assert_eq!(context.tool_calls_made, 1);
    }

    #[tokio::test]
    async fn expired_deadline_refuses_both_engine_paths() {
        let workflow = ActionWorkflow::new();
        let mut context = ctx(Role::Manager);
        context.timeout = std::time::Duration::ZERO;

        let tool = workflow
            .run_tool(&mut context, &StubLookup { fail: false }, &ActionParams::new())
            .await;
        assert!(!tool.success);
        assert!(tool.error.expect("error").contains("ran out of time"));
        assert_eq!(context.tool_calls_made, 0);

        let action = StubAction::default();
        let result = workflow.run(&context, &action, true, &full_params()).await;
        assert_eq!(result.status, ActionStatus::Cancelled);
        assert!(result.error.expect("error").contains("ran out of time"));
        assert_eq!(action.confirms.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wire_shape_uses_short_status_names() {
        let pending = ActionResult::pending(json!({}), "ok?");
        let value = serde_json::to_value(&pending).expect("serialize");
        assert_eq!(value["status"], "pending");
        assert!(value.get("missing_fields").is_none());

        let missing = ActionResult::missing_data(vec!["quantity".to_owned()], "need quantity");
        let value = serde_json::to_value(&missing).expect("serialize");
        assert_eq!(value["status"], "missing_data");
        assert_eq!(value["missing_fields"], json!(["quantity"]));
    }
}

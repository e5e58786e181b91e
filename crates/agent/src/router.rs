use std::sync::Arc;

use serde::Serialize;
use steward_core::quota::{QuotaError, QuotaLedger};
use steward_core::routing::{
    advance_turn, Classification, HandlerName, IntentLabel, TurnEvent, TurnPhase,
};
use steward_core::{
    ActionResult, ActionStatus, ActionWorkflow, BudgetAllocator, Capability, Complexity,
    ExecutionContext, OrchestrationError, ToolResult,
};
use tracing::{info, warn};

use crate::capabilities::CapabilityRegistry;
use crate::classifier::IntentClassifier;
use crate::confirmation::{classify_reply, ConfirmationReply};
use crate::intents::{detect_action, ActionRequest};
use crate::llm::{ChatMessage, CompletionRequest};
use crate::metered::MeteredLlm;
use crate::session::{PendingAction, SessionMemory};

/// What one routed turn produced. `action` carries the full workflow
/// result so API callers can branch on status without parsing `reply`.
#[derive(Clone, Debug, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub intent: IntentLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolResult>,
    pub tokens_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub cancelled: bool,
}

/// Drives one inbound message through the full turn: pending-action
/// resume, metered classification, budget allocation, then either a
/// capability invocation or a chat handler call.
pub struct TurnRouter {
    llm: MeteredLlm,
    classifier: IntentClassifier,
    ledger: Arc<QuotaLedger>,
    registry: Arc<CapabilityRegistry>,
    sessions: Arc<dyn SessionMemory>,
    workflow: ActionWorkflow,
    chat_model: String,
}

impl TurnRouter {
    pub fn new(
        llm: MeteredLlm,
        classifier: IntentClassifier,
        ledger: Arc<QuotaLedger>,
        registry: Arc<CapabilityRegistry>,
        sessions: Arc<dyn SessionMemory>,
        chat_model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            classifier,
            ledger,
            registry,
            sessions,
            workflow: ActionWorkflow::new(),
            chat_model: chat_model.into(),
        }
    }

    pub async fn handle_turn(
        &self,
        ctx: &mut ExecutionContext,
        message: &str,
    ) -> Result<TurnOutcome, OrchestrationError> {
        // A proposal on file intercepts the turn before any routing.
        if let Some(pending) =
            self.sessions.pending_action(&ctx.auth.org_id, &ctx.session_id).await
        {
            match classify_reply(message) {
                ConfirmationReply::Affirmative => return self.resume_confirmed(ctx, pending).await,
                ConfirmationReply::Negative => {
                    self.sessions.clear_pending(&ctx.auth.org_id, &ctx.session_id).await;
                    info!(
                        event_name = "action.declined",
                        capability = %pending.capability,
                        org_id = %ctx.auth.org_id,
                        "pending action declined"
                    );
                    return Ok(self.outcome(
                        ctx,
                        "Okay, I've cancelled that action.".to_owned(),
                        pending.intent,
                        None,
                        None,
                        None,
                    ));
                }
                // Changing the subject abandons the proposal.
                ConfirmationReply::Unrelated => {
                    self.sessions.clear_pending(&ctx.auth.org_id, &ctx.session_id).await;
                }
            }
        }

        let classification = self.classifier.classify(&self.llm, ctx, message).await?;
        let event = if classification == Classification::fallback() {
            TurnEvent::ClassificationFailed
        } else {
            TurnEvent::ClassificationSucceeded {
                intent: classification.intent,
                confidence: classification.confidence,
            }
        };
        let phase = Self::advance(&TurnPhase::Received, &event)?;

        let intent = classification.intent;
        let allocation = BudgetAllocator::new(&self.ledger)
            .allocate(&ctx.auth.org_id, intent.task_type(), Complexity::default())
            .await?;
        if allocation.total_budget == 0 {
            Self::advance(&phase, &TurnEvent::BudgetRefused)?;
            let quota = self.ledger.quota(&ctx.auth.org_id).await?;
            return Err(QuotaError::Exceeded {
                used: quota.used,
                limit: quota.limit,
                remaining: quota.remaining,
                required: intent.task_type().base_budget(),
            }
            .into());
        }
        let phase =
            Self::advance(&phase, &TurnEvent::BudgetAllocated { agent_budget: allocation.agent_budget })?;
        ctx.install_budget(allocation.agent_budget);

        if let Some(request) = detect_action(message) {
            let phase =
                Self::advance(&phase, &TurnEvent::HandlerInvoked { handler: request.intent.handler() })?;
            let outcome = self.run_capability(ctx, &request, allocation.warning).await?;
            Self::advance(&phase, &TurnEvent::HandlerSucceeded)?;
            return Ok(outcome);
        }

        let handler = intent.handler();
        let phase = Self::advance(&phase, &TurnEvent::HandlerInvoked { handler })?;
        let request = CompletionRequest::new(
            self.chat_model.clone(),
            vec![ChatMessage::system(handler_prompt(handler)), ChatMessage::user(message)],
            allocation.agent_budget,
        );
        let response = match self.llm.complete(ctx, request).await {
            Ok(response) => response,
            Err(error) => {
                Self::advance(&phase, &TurnEvent::HandlerFailed)?;
                return Err(error);
            }
        };
        Self::advance(&phase, &TurnEvent::HandlerSucceeded)?;

        info!(
            event_name = "router.turn_completed",
            org_id = %ctx.auth.org_id,
            intent = intent.as_str(),
            tokens_used = ctx.tokens_used,
            "turn completed on the chat path"
        );
        Ok(self.outcome(ctx, response.content, intent, None, None, allocation.warning))
    }

    async fn resume_confirmed(
        &self,
        ctx: &mut ExecutionContext,
        pending: PendingAction,
    ) -> Result<TurnOutcome, OrchestrationError> {
        self.sessions.clear_pending(&ctx.auth.org_id, &ctx.session_id).await;
        let Some(Capability::Mutating(capability)) = self.registry.get(&pending.capability) else {
            return Err(OrchestrationError::Internal(format!(
                "pending action `{}` is not a registered mutating capability",
                pending.capability
            )));
        };

        info!(
            event_name = "action.confirmation_received",
            capability = %pending.capability,
            org_id = %ctx.auth.org_id,
            "running confirmed action"
        );
        let result = self.workflow.run(ctx, capability.as_ref(), true, &pending.params).await;
        let reply = render_action(&result);
        Ok(self.outcome(ctx, reply, pending.intent, Some(result), None, None))
    }

    async fn run_capability(
        &self,
        ctx: &mut ExecutionContext,
        request: &ActionRequest,
        warning: Option<String>,
    ) -> Result<TurnOutcome, OrchestrationError> {
        let Some(capability) = self.registry.get(request.capability) else {
            return Err(OrchestrationError::Internal(format!(
                "capability `{}` is not registered",
                request.capability
            )));
        };

        match capability {
            Capability::Mutating(capability) => {
                let result =
                    self.workflow.run(ctx, capability.as_ref(), false, &request.params).await;
                if result.status == ActionStatus::PendingConfirmation {
                    self.sessions
                        .set_pending(
                            &ctx.auth.org_id,
                            &ctx.session_id,
                            PendingAction {
                                capability: request.capability.to_owned(),
                                intent: request.intent,
                                params: request.params.clone(),
                            },
                        )
                        .await;
                }
                let reply = render_action(&result);
                Ok(self.outcome(ctx, reply, request.intent, Some(result), None, warning))
            }
            Capability::ReadOnly(capability) => {
                let result = self.workflow.run_tool(ctx, capability.as_ref(), &request.params).await;
                let reply = render_tool(&result);
                Ok(self.outcome(ctx, reply, request.intent, None, Some(result), warning))
            }
        }
    }

    /// Cancellation suppresses the reply text but keeps the rest of the
    /// outcome; tokens already recorded stay recorded.
    fn outcome(
        &self,
        ctx: &ExecutionContext,
        reply: String,
        intent: IntentLabel,
        action: Option<ActionResult>,
        tool: Option<ToolResult>,
        warning: Option<String>,
    ) -> TurnOutcome {
        let cancelled = ctx.cancellation.is_cancelled();
        if cancelled {
            warn!(
                event_name = "router.turn_cancelled",
                org_id = %ctx.auth.org_id,
                tokens_used = ctx.tokens_used,
                "turn cancelled, response suppressed"
            );
        }
        TurnOutcome {
            reply: if cancelled { String::new() } else { reply },
            intent,
            action,
            tool,
            tokens_used: ctx.tokens_used,
            warning,
            cancelled,
        }
    }

    fn advance(phase: &TurnPhase, event: &TurnEvent) -> Result<TurnPhase, OrchestrationError> {
        advance_turn(phase, event).map_err(|error| OrchestrationError::Internal(error.to_string()))
    }
}

fn handler_prompt(handler: HandlerName) -> &'static str {
    match handler {
        HandlerName::Analytics => {
            "You are a business analytics assistant. Answer questions about revenue, \
             orders, trends, and performance concisely. When the data needed is not \
             available, say so plainly instead of guessing."
        }
        HandlerName::Inventory => {
            "You are an inventory assistant. Answer questions about products, stock \
             levels, warehouses, and reordering concisely. When the data needed is \
             not available, say so plainly instead of guessing."
        }
        HandlerName::Orders => {
            "You are an order management assistant. Answer questions about orders, \
             customers, and order statuses concisely. When the data needed is not \
             available, say so plainly instead of guessing."
        }
        HandlerName::General => {
            "You are a helpful business operations assistant. Greet the user, explain \
             what you can help with (analytics, inventory, and orders), and keep \
             replies short."
        }
    }
}

pub fn render_action(result: &ActionResult) -> String {
    match result.status {
        ActionStatus::MissingData => result.prompt_message.clone().unwrap_or_else(|| {
            format!("I need a bit more information: {}.", result.missing_fields.join(", "))
        }),
        ActionStatus::PendingConfirmation => {
            let message = result
                .confirmation_message
                .clone()
                .unwrap_or_else(|| "Do you want me to proceed with this action?".to_owned());
            format!("{message}\n\nReply 'yes' to proceed or 'no' to cancel.")
        }
        ActionStatus::Executed | ActionStatus::Confirmed => {
            result.result_message.clone().unwrap_or_else(|| "Done.".to_owned())
        }
        ActionStatus::Cancelled => result
            .error
            .clone()
            .unwrap_or_else(|| "Okay, I've cancelled that action.".to_owned()),
    }
}

pub fn render_tool(result: &ToolResult) -> String {
    if !result.success {
        return result
            .error
            .clone()
            .unwrap_or_else(|| "I couldn't complete that lookup.".to_owned());
    }
    match &result.data {
        Some(data) => match serde_json::to_string_pretty(data) {
            Ok(text) => format!("Here's what I found:\n```json\n{text}\n```"),
            Err(_) => "Here's what I found.".to_owned(),
        },
        None => "Done.".to_owned(),
    }
}

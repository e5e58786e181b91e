use std::sync::Arc;

use steward_core::quota::QuotaLedger;
use steward_core::{ExecutionContext, OrchestrationError};
use tracing::debug;

use crate::llm::{CompletionRequest, CompletionResponse, LlmClient};

/// Every inference call the orchestrator makes goes through here:
/// admission check with the pre-flight estimate, the call itself, then
/// unconditional usage recording with the provider-reported counts.
pub struct MeteredLlm {
    client: Arc<dyn LlmClient>,
    ledger: Arc<QuotaLedger>,
}

impl MeteredLlm {
    pub fn new(client: Arc<dyn LlmClient>, ledger: Arc<QuotaLedger>) -> Self {
        Self { client, ledger }
    }

    pub async fn complete(
        &self,
        ctx: &mut ExecutionContext,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, OrchestrationError> {
        if ctx.deadline_exceeded() {
            return Err(OrchestrationError::DeadlineExceeded);
        }

        let estimated = request.estimated_tokens();
        self.ledger.check(&ctx.auth.org_id, estimated).await?;

        let response = self
            .client
            .complete(request)
            .await
            .map_err(|error| OrchestrationError::LlmUnavailable(error.to_string()))?;

        // The provider has already billed these tokens; record even if
        // the caller goes on to fail.
        let consumed = response.usage.total();
        self.ledger.record(&ctx.auth.org_id, &ctx.auth.user_id, &response.usage).await?;
        ctx.consume_tokens(consumed);

        debug!(
            event_name = "llm.completed",
            org_id = %ctx.auth.org_id,
            estimated,
            consumed,
            "metered llm call finished"
        );
        Ok(response)
    }
}

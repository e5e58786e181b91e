use serde::Deserialize;
use steward_core::routing::{Classification, IntentLabel};
use steward_core::{ExecutionContext, OrchestrationError};
use tracing::{debug, warn};

use crate::llm::{ChatMessage, CompletionRequest};
use crate::metered::MeteredLlm;

/// Completion ceiling for the classification call; routing must stay
/// cheap no matter what the message looks like.
const CLASSIFIER_MAX_TOKENS: u64 = 150;

const CLASSIFIER_PROMPT: &str = r#"You are an intent classifier for a business operations assistant.

Classify the user's message into ONE of these categories:

- analytics: questions about business status, performance, trends, reports, metrics, revenue, forecasts, alerts
- inventory: questions about products, stock, warehouses, SKUs, low stock, reorders; also ADD product, UPDATE stock, TRANSFER stock
- orders: questions about orders, sales, customers, order status; also CREATE order, UPDATE order status, CANCEL order
- insights: requests for advice, suggestions, recommendations, growth opportunities
- general: ONLY greetings with no question, or questions about what the assistant can do

If the user asks anything about their business data or wants to perform an action, classify as analytics, inventory, or orders. Only use general for pure greetings.

Respond with a JSON object: {"intent": "<category>", "confidence": <0.0-1.0>}"#;

#[derive(Deserialize)]
struct ClassifierReply {
    intent: String,
    #[serde(default)]
    confidence: f64,
}

/// One small metered call on the routing model. Provider failures and
/// unparseable replies degrade to the General route; quota refusals and
/// expired deadlines propagate and abort the turn.
pub struct IntentClassifier {
    routing_model: String,
}

impl IntentClassifier {
    pub fn new(routing_model: impl Into<String>) -> Self {
        Self { routing_model: routing_model.into() }
    }

    pub async fn classify(
        &self,
        llm: &MeteredLlm,
        ctx: &mut ExecutionContext,
        message: &str,
    ) -> Result<Classification, OrchestrationError> {
        let request = CompletionRequest {
            model: self.routing_model.clone(),
            messages: vec![
                ChatMessage::system(CLASSIFIER_PROMPT),
                ChatMessage::user(format!("User message: {message}")),
            ],
            max_tokens: CLASSIFIER_MAX_TOKENS,
            temperature: 0.0,
            json_response: true,
        };

        let response = match llm.complete(ctx, request).await {
            Ok(response) => response,
            Err(error) if error.is_quota_refusal() => return Err(error),
            Err(OrchestrationError::DeadlineExceeded) => {
                return Err(OrchestrationError::DeadlineExceeded)
            }
            Err(error) => {
                warn!(
                    event_name = "classifier.degraded",
                    org_id = %ctx.auth.org_id,
                    error = %error,
                    "classification failed, routing to general"
                );
                return Ok(Classification::fallback());
            }
        };

        Ok(Self::parse_reply(&response.content))
    }

    fn parse_reply(content: &str) -> Classification {
        match serde_json::from_str::<ClassifierReply>(content.trim()) {
            Ok(reply) => {
                let classification = Classification {
                    intent: IntentLabel::parse(&reply.intent),
                    confidence: reply.confidence.clamp(0.0, 1.0),
                };
                debug!(
                    event_name = "classifier.classified",
                    intent = classification.intent.as_str(),
                    confidence = classification.confidence,
                    "intent classified"
                );
                classification
            }
            Err(error) => {
                warn!(
                    event_name = "classifier.unparseable",
                    error = %error,
                    "classifier reply was not valid json, routing to general"
                );
                Classification::fallback()
            }
        }
    }
}

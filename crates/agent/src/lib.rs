//! Turn orchestration: intent classification, metered inference,
//! capability dispatch, and the confirmation protocol for mutating
//! actions. Everything here sits between the HTTP surface in
//! `steward-server` and the quota/workflow core in `steward-core`.

pub mod capabilities;
pub mod classifier;
pub mod confirmation;
pub mod http_llm;
pub mod intents;
pub mod llm;
pub mod metered;
pub mod router;
pub mod session;

pub use capabilities::CapabilityRegistry;
pub use classifier::IntentClassifier;
pub use http_llm::HttpLlmClient;
pub use llm::{ChatMessage, CompletionRequest, CompletionResponse, LlmClient, LlmError};
pub use metered::MeteredLlm;
pub use router::{TurnOutcome, TurnRouter};
pub use session::{InMemorySessionMemory, PendingAction, SessionMemory};

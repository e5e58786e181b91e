pub mod action;
pub mod budget;
pub mod config;
pub mod context;
pub mod errors;
pub mod quota;
pub mod routing;
pub mod usage;

pub use action::{
    ActionParams, ActionResult, ActionStatus, ActionWorkflow, Capability, CapabilityError,
    CapabilitySpec, MutatingCapability, ReadOnlyCapability, ToolResult,
};
pub use budget::{allocate_within, BudgetAllocation, BudgetAllocator, Complexity, TaskType};
pub use context::{AuthContext, CancellationFlag, ExecutionContext, Role};
pub use errors::OrchestrationError;
pub use quota::{
    estimate_cost, InMemoryQuotaStore, QuotaError, QuotaLedger, QuotaSettings, QuotaStore,
    TokenQuota, TokenUsage,
};
pub use routing::{
    advance_turn, Classification, HandlerName, IntentLabel, InvalidTurnTransition, TurnEvent,
    TurnPhase,
};
pub use usage::{
    FailingUsageEventSink, InMemoryUsageEventSink, PublishError, UsageEvent, UsageEventSink,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::TaskType;

/// Fixed intent vocabulary. Whatever label the classifier emits is
/// normalized into this enum; anything unrecognized becomes General.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Analytics,
    Inventory,
    Orders,
    Insights,
    General,
}

impl IntentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::Inventory => "inventory",
            Self::Orders => "orders",
            Self::Insights => "insights",
            Self::General => "general",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "analytics" => Self::Analytics,
            "inventory" => Self::Inventory,
            "orders" => Self::Orders,
            "insights" => Self::Insights,
            _ => Self::General,
        }
    }

    /// Static intent → handler table. Insights rides on the analytics
    /// handler for business-intelligence answers.
    pub fn handler(&self) -> HandlerName {
        match self {
            Self::Analytics | Self::Insights => HandlerName::Analytics,
            Self::Inventory => HandlerName::Inventory,
            Self::Orders => HandlerName::Orders,
            Self::General => HandlerName::General,
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Analytics | Self::Insights => TaskType::Analytics,
            Self::Inventory => TaskType::Inventory,
            Self::Orders => TaskType::Orders,
            Self::General => TaskType::General,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerName {
    Analytics,
    Inventory,
    Orders,
    General,
}

/// Classifier output: ephemeral, consumed immediately by the router.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: IntentLabel,
    pub confidence: f64,
}

impl Classification {
    pub fn fallback() -> Self {
        Self { intent: IntentLabel::General, confidence: 0.0 }
    }
}

/// Phases of one routed turn. The original expressed this as a node
/// graph with conditional edges; here it is an enumerable state machine
/// with a pure transition function, testable without I/O.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    Received,
    Classified { intent: IntentLabel },
    Budgeted { intent: IntentLabel, agent_budget: u64 },
    Dispatched { handler: HandlerName },
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnEvent {
    ClassificationSucceeded { intent: IntentLabel, confidence: f64 },
    /// Classification failure is recovered locally: the turn proceeds
    /// on the General route.
    ClassificationFailed,
    BudgetAllocated { agent_budget: u64 },
    BudgetRefused,
    HandlerInvoked { handler: HandlerName },
    HandlerSucceeded,
    HandlerFailed,
}

#[derive(Clone, Debug, PartialEq, Error)]
#[error("invalid turn transition from {phase:?} on {event:?}")]
pub struct InvalidTurnTransition {
    pub phase: TurnPhase,
    pub event: TurnEvent,
}

/// Pure transition function for the routing state machine.
pub fn advance_turn(phase: &TurnPhase, event: &TurnEvent) -> Result<TurnPhase, InvalidTurnTransition> {
    let next = match (phase, event) {
        (TurnPhase::Received, TurnEvent::ClassificationSucceeded { intent, .. }) => {
            TurnPhase::Classified { intent: *intent }
        }
        (TurnPhase::Received, TurnEvent::ClassificationFailed) => {
            TurnPhase::Classified { intent: IntentLabel::General }
        }
        (TurnPhase::Classified { intent }, TurnEvent::BudgetAllocated { agent_budget }) => {
            TurnPhase::Budgeted { intent: *intent, agent_budget: *agent_budget }
        }
        (TurnPhase::Classified { .. }, TurnEvent::BudgetRefused) => TurnPhase::Failed,
        (TurnPhase::Budgeted { .. }, TurnEvent::HandlerInvoked { handler }) => {
            TurnPhase::Dispatched { handler: *handler }
        }
        (TurnPhase::Dispatched { .. }, TurnEvent::HandlerSucceeded) => TurnPhase::Completed,
        (TurnPhase::Dispatched { .. }, TurnEvent::HandlerFailed) => TurnPhase::Failed,
        (phase, event) => {
            return Err(InvalidTurnTransition { phase: phase.clone(), event: event.clone() });
        }
    };
    Ok(next)
}

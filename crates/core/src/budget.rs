use serde::{Deserialize, Serialize};

use crate::quota::{QuotaError, QuotaLedger, TokenQuota};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Routing,
    Analytics,
    Orders,
    Inventory,
    General,
    Complex,
}

impl TaskType {
    pub fn base_budget(&self) -> u64 {
        match self {
            Self::Routing => 500,
            Self::Analytics => 8_000,
            Self::Orders => 6_000,
            Self::Inventory => 5_000,
            Self::General => 3_000,
            Self::Complex => 15_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Low => 0.7,
            Self::Medium => 1.0,
            Self::High => 1.5,
        }
    }
}

/// Token budget split for one turn. Invariant:
/// routing_budget + agent_budget + reserve == total_budget, and
/// total_budget never exceeds the org's remaining quota.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub total_budget: u64,
    pub routing_budget: u64,
    pub agent_budget: u64,
    pub reserve: u64,
    pub warning: Option<String>,
}

/// Pure allocation over an already-fetched quota snapshot. No side
/// effects, safe to retry.
pub fn allocate_within(quota: &TokenQuota, task: TaskType, complexity: Complexity) -> BudgetAllocation {
    let requested = (task.base_budget() as f64 * complexity.multiplier()) as u64;

    let mut warning = None;
    let total = if requested > quota.remaining {
        warning = Some(format!(
            "Budget reduced from {requested} to {} due to quota limits",
            quota.remaining
        ));
        quota.remaining
    } else {
        requested
    };

    if quota.percentage_used > 80.0 {
        warning = Some(format!("Warning: {:.1}% of token quota used", quota.percentage_used));
    }

    let routing_budget = (total / 10).min(500);
    let reserve = total / 10;
    let agent_budget = total - routing_budget - reserve;

    BudgetAllocation { total_budget: total, routing_budget, agent_budget, reserve, warning }
}

/// Ledger-consulting allocator: one quota read, then the pure split.
pub struct BudgetAllocator<'a> {
    ledger: &'a QuotaLedger,
}

impl<'a> BudgetAllocator<'a> {
    pub fn new(ledger: &'a QuotaLedger) -> Self {
        Self { ledger }
    }

    pub async fn allocate(
        &self,
        org_id: &str,
        task: TaskType,
        complexity: Complexity,
    ) -> Result<BudgetAllocation, QuotaError> {
        let quota = self.ledger.quota(org_id).await?;
        Ok(allocate_within(&quota, task, complexity))
    }
}

// SPDX-License-Identifier: MIT
//! The review pipeline: orchestrator (one attempt) and worker (retry loop).

pub mod model;
pub mod orchestrator;
pub mod worker;

use serde::{Deserialize, Serialize};

/// One unit of work: review one pull request head once (with retries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewJob {
    pub owner: String,
    pub repo: String,
    pub pull_number: u64,
    pub installation_id: i64,
    /// Webhook action or "manual_trigger".
    pub trigger_action: String,
    pub focus_area: Option<String>,
    /// Delivery id to mark processed once the job lands, when webhook-driven.
    pub delivery_id: Option<String>,
}

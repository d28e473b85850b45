//! Bulk task payloads produced by the scheduler and consumed by workers.

use serde::{Deserialize, Serialize};

use crate::queue::TaskPayload;

/// A contact fire carried inside a bulk task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireRef {
    pub fire_id: i64,
    pub contact_id: i64,
    /// Session the fire belongs to, when it targets a wait.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_uuid: Option<String>,
}

/// Expire the waits of a batch of contacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkWaitExpire {
    pub fires: Vec<FireRef>,
}

impl TaskPayload for BulkWaitExpire {
    fn task_type(&self) -> &'static str {
        "bulk_wait_expire"
    }
}

/// Resume a batch of contacts whose waits timed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkWaitTimeout {
    pub fires: Vec<FireRef>,
}

impl TaskPayload for BulkWaitTimeout {
    fn task_type(&self) -> &'static str {
        "bulk_wait_timeout"
    }
}

/// End sessions that passed their overall expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSessionExpire {
    pub fires: Vec<FireRef>,
}

impl TaskPayload for BulkSessionExpire {
    fn task_type(&self) -> &'static str {
        "bulk_session_expire"
    }
}

/// Trigger one campaign event for a batch of contacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkCampaignTrigger {
    /// Campaign event reference, as scheduled on the fires.
    pub event: String,
    pub fires: Vec<FireRef>,
}

impl TaskPayload for BulkCampaignTrigger {
    fn task_type(&self) -> &'static str {
        "bulk_campaign_trigger"
    }
}

//! Account model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A tenant account owning zero or more billing periods.
///
/// `current_period_id` is the explicit single-owner pointer to the one
/// entitlement valid now; it is updated transactionally whenever a period
/// is activated or expires.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub account_id: Uuid,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub auto_renew: bool,
    pub billing_key: Option<String>,
    pub card_last4: Option<String>,
    pub current_period_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Account {
    /// True when a stored payment credential exists for charge-by-key.
    pub fn has_credential(&self) -> bool {
        self.billing_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Input for creating an account.
#[derive(Debug, Clone)]
pub struct CreateAccount {
    pub name: String,
    pub email: String,
    pub auto_renew: bool,
    pub billing_key: Option<String>,
    pub card_last4: Option<String>,
}

#![forbid(unsafe_code)]

use std::env;

use coursegate_kernel_contracts::course::CourseId;
use coursegate_kernel_contracts::order::{Order, OrderId, OrderStatus};
use coursegate_kernel_contracts::{SchemaVersion, UnixTimeMs};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::kv::DurableKv;

pub const PENDING_ORDER_MEMORY_VERSION: SchemaVersion = SchemaVersion(1);
pub const PENDING_ORDER_NAMESPACE_DEFAULT: &str = "pending-order";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrderMemoryConfig {
    pub namespace: String,
}

impl PendingOrderMemoryConfig {
    pub fn mvp_v1() -> Self {
        Self {
            namespace: PENDING_ORDER_NAMESPACE_DEFAULT.to_string(),
        }
    }

    pub fn from_env() -> Self {
        let namespace = env::var("COURSEGATE_PENDING_NAMESPACE")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && v.len() <= 64 && !v.contains(':'))
            .unwrap_or_else(|| PENDING_ORDER_NAMESPACE_DEFAULT.to_string());
        Self { namespace }
    }
}

/// What survives a reload about the latest unsettled order of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrderRecord {
    pub schema_version: u32,
    pub order_id: OrderId,
    pub code: String,
    pub status: OrderStatus,
    pub total: Decimal,
    pub currency: String,
    pub created_at: UnixTimeMs,
}

impl PendingOrderRecord {
    pub fn from_order(order: &Order) -> Self {
        Self {
            schema_version: PENDING_ORDER_MEMORY_VERSION.0,
            order_id: order.id,
            code: order.code.clone(),
            status: order.status.clone(),
            total: order.total,
            currency: order.currency.clone(),
            created_at: order.created_at,
        }
    }
}

#[derive(Debug)]
pub struct PendingOrderMemory<K>
where
    K: DurableKv,
{
    config: PendingOrderMemoryConfig,
    kv: K,
}

impl<K> PendingOrderMemory<K>
where
    K: DurableKv,
{
    pub fn new(config: PendingOrderMemoryConfig, kv: K) -> Self {
        Self { config, kv }
    }

    pub fn key_for(&self, course_id: CourseId) -> String {
        format!("{}:{}", self.config.namespace, course_id.0)
    }

    /// Absent, unreadable, undecodable and foreign-version entries all read as no memory.
    pub fn load(&self, course_id: CourseId) -> Option<PendingOrderRecord> {
        let key = self.key_for(course_id);
        let raw = match self.kv.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(%key, error = %err, "pending order memory read failed");
                return None;
            }
        };
        match serde_json::from_str::<PendingOrderRecord>(&raw) {
            Ok(record) if record.schema_version == PENDING_ORDER_MEMORY_VERSION.0 => Some(record),
            Ok(record) => {
                debug!(%key, schema_version = record.schema_version, "ignoring foreign pending order entry");
                None
            }
            Err(err) => {
                warn!(%key, error = %err, "ignoring corrupt pending order entry");
                None
            }
        }
    }

    pub fn remember(&self, order: &Order) {
        let key = self.key_for(order.course_id);
        let json = match serde_json::to_string(&PendingOrderRecord::from_order(order)) {
            Ok(json) => json,
            Err(err) => {
                warn!(%key, error = %err, "pending order memory encode failed");
                return;
            }
        };
        if let Err(err) = self.kv.set(&key, json) {
            warn!(%key, error = %err, "pending order memory write failed");
        } else {
            debug!(%key, order_id = order.id.0, "pending order remembered");
        }
    }

    pub fn clear(&self, course_id: CourseId) {
        let key = self.key_for(course_id);
        if let Err(err) = self.kv.remove(&key) {
            warn!(%key, error = %err, "pending order memory clear failed");
        }
    }
}

#![forbid(unsafe_code)]

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::validate_text;
use crate::course::CourseId;
use crate::{ContractViolation, UnixTimeMs, Validate};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl Validate for OrderId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "order_id",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
    Unrecognized(String),
}

impl OrderStatus {
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => OrderStatus::Pending,
            "PAID" => OrderStatus::Paid,
            "CANCELLED" | "CANCELED" => OrderStatus::Cancelled,
            _ => OrderStatus::Unrecognized(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Unrecognized(raw) => raw.as_str(),
        }
    }
}

impl Serialize for OrderStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub code: String,
    pub course_id: CourseId,
    pub status: OrderStatus,
    pub total: Decimal,
    pub currency: String,
    pub created_at: UnixTimeMs,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        id: OrderId,
        code: String,
        course_id: CourseId,
        status: OrderStatus,
        total: Decimal,
        currency: String,
        created_at: UnixTimeMs,
    ) -> Result<Self, ContractViolation> {
        let order = Self {
            id,
            code,
            course_id,
            status,
            total,
            currency,
            created_at,
        };
        order.validate()?;
        Ok(order)
    }

    pub fn is_pending_for(&self, course_id: CourseId) -> bool {
        self.course_id == course_id && self.status == OrderStatus::Pending
    }
}

impl Validate for Order {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        self.course_id.validate()?;
        validate_text("order.code", &self.code, 64)?;
        if self.total.is_sign_negative() {
            return Err(ContractViolation::InvalidValue {
                field: "order.total",
                reason: "must be >= 0",
            });
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ContractViolation::InvalidValue {
                field: "order.currency",
                reason: "must be a 3-letter currency code",
            });
        }
        Ok(())
    }
}

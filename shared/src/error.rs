use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use thiserror::Error;

use crate::{CustomerId, ShopId, StateKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("service name must not be empty")]
    EmptyName,

    #[error("service price must not be negative, got {0}")]
    NegativePrice(BigDecimal),
}

/// Failures reported by a backend behind one of the collaborator traits.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Invalid(#[from] ServiceError),
}

/// The appointment store refused or failed a write. Nothing was created.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed for shop {shop_id}, customer {customer_id}: {source}")]
pub struct PersistenceError {
    pub operation: &'static str,
    pub shop_id: ShopId,
    pub customer_id: CustomerId,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Clone, Error)]
pub enum BookingError {
    #[error("select at least one service before booking")]
    EmptySelection,

    #[error("no appointment date selected")]
    MissingDate,

    #[error("no appointment time selected")]
    MissingTime,

    #[error("you must be logged in to book an appointment")]
    NotAuthenticated,

    #[error("appointment date {date} is before today ({today})")]
    DateInPast { date: NaiveDate, today: NaiveDate },

    #[error("a booking submission is already in flight")]
    SubmissionInProgress,

    #[error("this booking has already been committed")]
    AlreadyCommitted,

    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: StateKind,
    },

    #[error("service catalog unavailable for shop {shop_id}: {source}")]
    CatalogUnavailable {
        shop_id: ShopId,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl BookingError {
    /// Local draft problems the caller can fix and resubmit.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BookingError::EmptySelection
                | BookingError::MissingDate
                | BookingError::MissingTime
                | BookingError::NotAuthenticated
                | BookingError::DateInPast { .. }
        )
    }

    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            BookingError::CatalogUnavailable { .. } | BookingError::Persistence(_)
        )
    }
}

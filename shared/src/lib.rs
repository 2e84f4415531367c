use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

mod backend;
mod error;
pub mod memory;
mod slots;
mod workflow;

pub use backend::*;
pub use error::*;
pub use slots::*;
pub use workflow::*;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id!(
    /// Identifies a shop (saloon).
    ShopId
);
opaque_id!(
    /// Identifies an authenticated customer.
    CustomerId
);
opaque_id!(
    /// Identifies a service, unique within its shop.
    ServiceId
);

/// Assigned by the appointment store when a booking is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(Uuid);

impl AppointmentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for AppointmentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub price: BigDecimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl Service {
    pub fn new(id: impl Into<ServiceId>, name: impl Into<String>, price: BigDecimal) -> Result<Self, ServiceError> {
        let service = Self {
            id: id.into(),
            name: name.into(),
            price,
            category: None,
            duration: None,
        };
        service.validate()?;
        Ok(service)
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::EmptyName);
        }
        if self.price.is_negative() {
            return Err(ServiceError::NegativePrice(self.price.clone()));
        }
        Ok(())
    }

    /// Case-insensitive match on either the service name or its category label.
    pub fn matches_category(&self, category: &str) -> bool {
        let wanted = category.trim().to_lowercase();
        self.name.to_lowercase() == wanted
            || self
                .category
                .as_deref()
                .is_some_and(|c| c.to_lowercase() == wanted)
    }
}

/// A service as submitted by a shop owner, before the backend assigns its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewService {
    pub name: String,
    pub price: BigDecimal,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

impl NewService {
    pub fn into_service(self, id: ServiceId) -> Result<Service, ServiceError> {
        let service = Service {
            id,
            name: self.name,
            price: self.price,
            category: self.category,
            duration: self.duration,
        };
        service.validate()?;
        Ok(service)
    }
}

/// The services a customer has picked so far. Unique by service id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ServiceSelection {
    services: Vec<Service>,
}

impl ServiceSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when a service with the same id is already selected.
    pub fn add(&mut self, service: Service) -> bool {
        if self.contains(&service.id) {
            return false;
        }
        self.services.push(service);
        true
    }

    /// Returns `false` when nothing matched.
    pub fn remove(&mut self, id: &ServiceId) -> bool {
        let before = self.services.len();
        self.services.retain(|s| &s.id != id);
        self.services.len() != before
    }

    pub fn contains(&self, id: &ServiceId) -> bool {
        self.services.iter().any(|s| &s.id == id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    pub fn as_slice(&self) -> &[Service] {
        &self.services
    }

    pub fn total(&self) -> BigDecimal {
        total_price(&self.services)
    }
}

pub fn total_price(services: &[Service]) -> BigDecimal {
    services
        .iter()
        .fold(BigDecimal::zero(), |acc, s| acc + &s.price)
}

/// A fully populated booking, ready to hand to an [`AppointmentStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub customer_id: CustomerId,
    pub shop_id: ShopId,
    pub services: Vec<Service>,
    pub date: NaiveDate,
    pub time: TimeSlot,
}

impl BookingRequest {
    pub fn total(&self) -> BigDecimal {
        total_price(&self.services)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "Scheduled",
            AppointmentStatus::Completed => "Completed",
            AppointmentStatus::Cancelled => "Cancelled",
        }
    }

    /// Only a scheduled appointment may move, and only to a final status.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        matches!(
            (self, next),
            (AppointmentStatus::Scheduled, AppointmentStatus::Completed)
                | (AppointmentStatus::Scheduled, AppointmentStatus::Cancelled)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Scheduled" => Ok(AppointmentStatus::Scheduled),
            "Completed" => Ok(AppointmentStatus::Completed),
            "Cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(StoreError::Corrupt(format!(
                "unknown appointment status {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub customer_id: CustomerId,
    pub shop_id: ShopId,
    pub services: Vec<Service>,
    pub date: NaiveDate,
    pub time: TimeSlot,
    pub status: AppointmentStatus,
    pub total: BigDecimal,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn scheduled(id: AppointmentId, request: &BookingRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            customer_id: request.customer_id.clone(),
            shop_id: request.shop_id.clone(),
            services: request.services.clone(),
            date: request.date,
            time: request.time,
            status: AppointmentStatus::Scheduled,
            total: request.total(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    pub id: ShopId,
    pub owner_id: String,
    pub name: String,
    pub location: String,
    pub owner_name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShop {
    pub owner_id: String,
    pub name: String,
    pub location: String,
    pub owner_name: String,
    pub email: String,
}

pub const APPOINTMENT_CREATED: &str = "AppointmentCreated";
pub const APPOINTMENT_STATUS_CHANGED: &str = "AppointmentStatusChanged";
pub const APPOINTMENT_DELETED: &str = "AppointmentDeleted";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn new(aggregate_id: Uuid, event_type: &str, event_data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            event_type: event_type.to_string(),
            event_data,
            processed: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: &str, name: &str, price: i64) -> Service {
        Service::new(id, name, BigDecimal::from(price)).unwrap()
    }

    #[test]
    fn service_rejects_blank_name_and_negative_price() {
        assert!(matches!(
            Service::new("1", "  ", BigDecimal::from(10)),
            Err(ServiceError::EmptyName)
        ));
        assert!(matches!(
            Service::new("1", "Haircut", BigDecimal::from(-1)),
            Err(ServiceError::NegativePrice(_))
        ));
        assert!(Service::new("1", "Free consult", BigDecimal::zero()).is_ok());
    }

    #[test]
    fn selection_total_is_exact_decimal_sum() {
        let mut selection = ServiceSelection::new();
        assert_eq!(selection.total(), BigDecimal::zero());

        selection.add(Service::new("1", "Haircut", "25.10".parse().unwrap()).unwrap());
        selection.add(Service::new("2", "Beard Trim", "14.95".parse().unwrap()).unwrap());
        assert_eq!(selection.total(), "40.05".parse::<BigDecimal>().unwrap());
    }

    #[test]
    fn selection_ignores_duplicate_ids() {
        let mut selection = ServiceSelection::new();
        assert!(selection.add(service("1", "Haircut", 25)));
        assert!(!selection.add(service("1", "Haircut (again)", 99)));
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.total(), BigDecimal::from(25));
    }

    #[test]
    fn category_match_covers_name_and_label() {
        let cut = service("1", "Haircut", 25).with_category("Hair");
        assert!(cut.matches_category("haircut"));
        assert!(cut.matches_category("HAIR"));
        assert!(!cut.matches_category("Nails"));
    }

    #[test]
    fn status_transitions_only_leave_scheduled() {
        use AppointmentStatus::*;
        assert!(Scheduled.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(!Scheduled.can_transition_to(Scheduled));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Scheduled));
        assert_eq!("Cancelled".parse::<AppointmentStatus>().unwrap(), Cancelled);
        assert!("cancelled".parse::<AppointmentStatus>().is_err());
    }
}

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use shared::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::shops)]
pub struct DbShop {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub location: String,
    pub owner_name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::services)]
pub struct DbService {
    pub shop_id: String,
    pub id: String,
    pub name: String,
    pub price: BigDecimal,
    pub category: Option<String>,
    pub duration: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::services)]
pub struct NewDbService {
    pub shop_id: String,
    pub id: String,
    pub name: String,
    pub price: BigDecimal,
    pub category: Option<String>,
    pub duration: Option<String>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::services, treat_none_as_null = true)]
pub struct ServiceChanges {
    pub name: String,
    pub price: BigDecimal,
    pub category: Option<String>,
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::appointments)]
pub struct DbAppointment {
    pub id: Uuid,
    pub customer_id: String,
    pub shop_id: String,
    pub services: serde_json::Value,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub status: String,
    pub total_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl From<DbShop> for Shop {
    fn from(db_shop: DbShop) -> Self {
        Self {
            id: ShopId::new(db_shop.id),
            owner_id: db_shop.owner_id,
            name: db_shop.name,
            location: db_shop.location,
            owner_name: db_shop.owner_name,
            email: db_shop.email,
            created_at: db_shop.created_at,
        }
    }
}

impl DbShop {
    pub fn register(shop: NewShop) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: shop.owner_id,
            name: shop.name,
            location: shop.location,
            owner_name: shop.owner_name,
            email: shop.email,
            created_at: Utc::now(),
        }
    }
}

impl From<DbService> for Service {
    fn from(db_service: DbService) -> Self {
        Self {
            id: ServiceId::new(db_service.id),
            name: db_service.name,
            price: db_service.price,
            category: db_service.category,
            duration: db_service.duration,
        }
    }
}

impl NewDbService {
    pub fn new(shop_id: &ShopId, service: Service) -> Self {
        Self {
            shop_id: shop_id.to_string(),
            id: service.id.to_string(),
            name: service.name,
            price: service.price,
            category: service.category,
            duration: service.duration,
        }
    }
}

impl From<Service> for ServiceChanges {
    fn from(service: Service) -> Self {
        Self {
            name: service.name,
            price: service.price,
            category: service.category,
            duration: service.duration,
        }
    }
}

impl DbAppointment {
    pub fn scheduled(id: AppointmentId, request: &BookingRequest) -> anyhow::Result<Self> {
        Ok(Self {
            id: id.as_uuid(),
            customer_id: request.customer_id.to_string(),
            shop_id: request.shop_id.to_string(),
            services: serde_json::to_value(&request.services)?,
            appointment_date: request.date,
            appointment_time: request.time.time(),
            status: AppointmentStatus::Scheduled.to_string(),
            total_amount: request.total(),
            created_at: Utc::now(),
        })
    }
}

impl TryFrom<DbAppointment> for Appointment {
    type Error = anyhow::Error;

    fn try_from(db_appointment: DbAppointment) -> Result<Self, Self::Error> {
        let services: Vec<Service> = serde_json::from_value(db_appointment.services)?;
        let status = db_appointment.status.parse::<AppointmentStatus>()?;

        Ok(Self {
            id: AppointmentId::from(db_appointment.id),
            customer_id: CustomerId::new(db_appointment.customer_id),
            shop_id: ShopId::new(db_appointment.shop_id),
            services,
            date: db_appointment.appointment_date,
            time: TimeSlot::new(db_appointment.appointment_time),
            status,
            total: db_appointment.total_amount,
            created_at: db_appointment.created_at,
        })
    }
}

impl From<OutboxEvent> for NewOutboxEvent {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            event_data: event.event_data,
        }
    }
}

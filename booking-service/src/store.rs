use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::{bb8::Pool, PoolError};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{
    Appointment, AppointmentDirectory, AppointmentId, AppointmentStatus, AppointmentStore,
    BookingRequest, CatalogAdmin, CustomerId, NewService, NewShop, OutboxEvent, Service,
    ServiceCatalog, ServiceId, Shop, ShopDirectory, ShopId, StoreError, APPOINTMENT_CREATED,
    APPOINTMENT_DELETED, APPOINTMENT_STATUS_CHANGED,
};
use tracing::{error, info};
use uuid::Uuid;
use crate::models::*;
use crate::schema::*;

type DbPool = Pool<AsyncPgConnection>;

/// Postgres-backed implementation of every storage seam.
#[derive(Clone)]
pub struct PgBackend {
    pool: DbPool,
}

impl PgBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn ensure_shop(conn: &mut AsyncPgConnection, shop_id: &ShopId) -> Result<()> {
        let found = shops::table
            .filter(shops::id.eq(shop_id.as_str()))
            .select(shops::id)
            .first::<String>(conn)
            .await
            .optional()?;

        match found {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("shop {}", shop_id)).into()),
        }
    }

    async fn load_catalog(conn: &mut AsyncPgConnection, shop_id: &ShopId) -> Result<Vec<Service>> {
        let rows = services::table
            .filter(services::shop_id.eq(shop_id.as_str()))
            .order((services::created_at.asc(), services::id.asc()))
            .load::<DbService>(conn)
            .await?;

        Ok(rows.into_iter().map(Service::from).collect())
    }

    async fn catalog(&self, shop_id: &ShopId) -> Result<Vec<Service>> {
        let mut conn = self.pool.get().await?;
        Self::ensure_shop(&mut conn, shop_id).await?;
        Self::load_catalog(&mut conn, shop_id).await
    }

    async fn insert_appointment(&self, request: &BookingRequest) -> Result<AppointmentId> {
        let mut conn = self.pool.get().await?;

        let id = AppointmentId::generate();
        let row = DbAppointment::scheduled(id, request)?;
        let appointment = Appointment::try_from(row.clone())?;
        let event = OutboxEvent::new(id.as_uuid(), APPOINTMENT_CREATED, serde_json::to_value(&appointment)?);

        conn.transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(appointments::table)
                    .values(&row)
                    .execute(conn)
                    .await?;

                diesel::insert_into(outbox_events::table)
                    .values(&NewOutboxEvent::from(event))
                    .execute(conn)
                    .await?;

                Ok(())
            })
        }).await?;

        info!("Appointment {} created for shop {}", id, request.shop_id);
        Ok(id)
    }

    async fn insert_service(&self, shop_id: &ShopId, service: NewService) -> Result<Vec<Service>> {
        let service = service.into_service(ServiceId::new(Uuid::new_v4().to_string()))?;
        let mut conn = self.pool.get().await?;
        Self::ensure_shop(&mut conn, shop_id).await?;

        diesel::insert_into(services::table)
            .values(&NewDbService::new(shop_id, service))
            .execute(&mut conn)
            .await?;

        Self::load_catalog(&mut conn, shop_id).await
    }

    async fn change_service(&self, shop_id: &ShopId, service: Service) -> Result<Vec<Service>> {
        service.validate()?;
        let service_id = service.id.clone();
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(
            services::table
                .filter(services::shop_id.eq(shop_id.as_str()))
                .filter(services::id.eq(service_id.as_str())),
        )
        .set(&ServiceChanges::from(service))
        .execute(&mut conn)
        .await?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("service {}", service_id)).into());
        }
        Self::load_catalog(&mut conn, shop_id).await
    }

    async fn delete_service(&self, shop_id: &ShopId, service_id: &ServiceId) -> Result<Vec<Service>> {
        let mut conn = self.pool.get().await?;

        let deleted = diesel::delete(
            services::table
                .filter(services::shop_id.eq(shop_id.as_str()))
                .filter(services::id.eq(service_id.as_str())),
        )
        .execute(&mut conn)
        .await?;

        if deleted == 0 {
            return Err(StoreError::NotFound(format!("service {}", service_id)).into());
        }
        Self::load_catalog(&mut conn, shop_id).await
    }

    async fn appointments_where_customer(&self, customer_id: &CustomerId) -> Result<Vec<Appointment>> {
        let mut conn = self.pool.get().await?;

        let rows = appointments::table
            .filter(appointments::customer_id.eq(customer_id.as_str()))
            .order((appointments::appointment_date.asc(), appointments::appointment_time.asc()))
            .load::<DbAppointment>(&mut conn)
            .await?;

        rows.into_iter().map(Appointment::try_from).collect()
    }

    async fn appointments_where_shop(&self, shop_id: &ShopId) -> Result<Vec<Appointment>> {
        let mut conn = self.pool.get().await?;

        let rows = appointments::table
            .filter(appointments::shop_id.eq(shop_id.as_str()))
            .order((appointments::appointment_date.asc(), appointments::appointment_time.asc()))
            .load::<DbAppointment>(&mut conn)
            .await?;

        rows.into_iter().map(Appointment::try_from).collect()
    }

    async fn find_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>> {
        let mut conn = self.pool.get().await?;

        let row = appointments::table
            .filter(appointments::id.eq(id.as_uuid()))
            .first::<DbAppointment>(&mut conn)
            .await
            .optional()?;

        row.map(Appointment::try_from).transpose()
    }

    async fn set_status(&self, id: AppointmentId, status: AppointmentStatus) -> Result<Appointment> {
        let mut conn = self.pool.get().await?;

        let appointment = conn.transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                let row = appointments::table
                    .filter(appointments::id.eq(id.as_uuid()))
                    .for_update()
                    .first::<DbAppointment>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| StoreError::NotFound(format!("appointment {}", id)))?;

                let mut appointment = Appointment::try_from(row)?;
                if !appointment.status.can_transition_to(status) {
                    return Err(StoreError::Conflict(format!(
                        "appointment {} cannot move from {} to {}",
                        id, appointment.status, status
                    ))
                    .into());
                }

                diesel::update(appointments::table.filter(appointments::id.eq(id.as_uuid())))
                    .set(appointments::status.eq(status.as_str()))
                    .execute(conn)
                    .await?;
                appointment.status = status;

                let event = OutboxEvent::new(
                    id.as_uuid(),
                    APPOINTMENT_STATUS_CHANGED,
                    serde_json::to_value(&appointment)?,
                );
                diesel::insert_into(outbox_events::table)
                    .values(&NewOutboxEvent::from(event))
                    .execute(conn)
                    .await?;

                Ok(appointment)
            })
        }).await?;

        info!("Appointment {} is now {}", id, status);
        Ok(appointment)
    }

    async fn remove_appointment(&self, id: AppointmentId) -> Result<()> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                let deleted = diesel::delete(appointments::table.filter(appointments::id.eq(id.as_uuid())))
                    .execute(conn)
                    .await?;
                if deleted == 0 {
                    return Err(StoreError::NotFound(format!("appointment {}", id)).into());
                }

                let event = OutboxEvent::new(
                    id.as_uuid(),
                    APPOINTMENT_DELETED,
                    serde_json::json!({ "id": id }),
                );
                diesel::insert_into(outbox_events::table)
                    .values(&NewOutboxEvent::from(event))
                    .execute(conn)
                    .await?;

                Ok(())
            })
        }).await?;

        info!("Appointment {} deleted", id);
        Ok(())
    }

    async fn all_shops(&self) -> Result<Vec<Shop>> {
        let mut conn = self.pool.get().await?;

        let rows = shops::table
            .order(shops::created_at.asc())
            .load::<DbShop>(&mut conn)
            .await?;

        Ok(rows.into_iter().map(Shop::from).collect())
    }

    async fn find_shop(&self, shop_id: &ShopId) -> Result<Option<Shop>> {
        let mut conn = self.pool.get().await?;

        let row = shops::table
            .filter(shops::id.eq(shop_id.as_str()))
            .first::<DbShop>(&mut conn)
            .await
            .optional()?;

        Ok(row.map(Shop::from))
    }

    async fn insert_shop(&self, shop: NewShop) -> Result<Shop> {
        let mut conn = self.pool.get().await?;
        let row = DbShop::register(shop);

        diesel::insert_into(shops::table)
            .values(&row)
            .execute(&mut conn)
            .await?;

        info!("Registered shop {}", row.id);
        Ok(Shop::from(row))
    }
}

/// Classifies an internal failure for callers of the storage traits.
fn into_store_error(err: anyhow::Error) -> StoreError {
    if let Some(store_error) = err.downcast_ref::<StoreError>() {
        return store_error.clone();
    }
    if let Some(service_error) = err.downcast_ref::<shared::ServiceError>() {
        return StoreError::Invalid(service_error.clone());
    }
    if let Some(db_error) = err.downcast_ref::<DieselError>() {
        match db_error {
            DieselError::NotFound => return StoreError::NotFound("record".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                return StoreError::NotFound(info.message().to_string());
            }
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                return StoreError::Conflict(info.message().to_string());
            }
            _ => {}
        }
    }
    if err.downcast_ref::<bb8::RunError<PoolError>>().is_some() {
        error!("Database pool unavailable: {}", err);
        return StoreError::Transport(format!("database pool unavailable: {}", err));
    }
    if err.downcast_ref::<serde_json::Error>().is_some() {
        return StoreError::Corrupt(err.to_string());
    }

    error!("Database error: {:#}", err);
    StoreError::Transport(format!("{:#}", err))
}

#[async_trait]
impl ServiceCatalog for PgBackend {
    async fn list_services(&self, shop_id: &ShopId) -> Result<Vec<Service>, StoreError> {
        self.catalog(shop_id).await.map_err(into_store_error)
    }
}

#[async_trait]
impl AppointmentStore for PgBackend {
    async fn create_appointment(&self, request: &BookingRequest) -> Result<AppointmentId, StoreError> {
        self.insert_appointment(request).await.map_err(into_store_error)
    }
}

#[async_trait]
impl CatalogAdmin for PgBackend {
    async fn add_service(&self, shop_id: &ShopId, service: NewService) -> Result<Vec<Service>, StoreError> {
        self.insert_service(shop_id, service).await.map_err(into_store_error)
    }

    async fn update_service(&self, shop_id: &ShopId, service: Service) -> Result<Vec<Service>, StoreError> {
        self.change_service(shop_id, service).await.map_err(into_store_error)
    }

    async fn remove_service(&self, shop_id: &ShopId, service_id: &ServiceId) -> Result<Vec<Service>, StoreError> {
        self.delete_service(shop_id, service_id).await.map_err(into_store_error)
    }
}

#[async_trait]
impl AppointmentDirectory for PgBackend {
    async fn appointments_for_customer(&self, customer_id: &CustomerId) -> Result<Vec<Appointment>, StoreError> {
        self.appointments_where_customer(customer_id).await.map_err(into_store_error)
    }

    async fn appointments_for_shop(&self, shop_id: &ShopId) -> Result<Vec<Appointment>, StoreError> {
        self.appointments_where_shop(shop_id).await.map_err(into_store_error)
    }

    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        self.find_appointment(id).await.map_err(into_store_error)
    }

    async fn update_status(&self, id: AppointmentId, status: AppointmentStatus) -> Result<Appointment, StoreError> {
        self.set_status(id, status).await.map_err(into_store_error)
    }

    async fn delete_appointment(&self, id: AppointmentId) -> Result<(), StoreError> {
        self.remove_appointment(id).await.map_err(into_store_error)
    }
}

#[async_trait]
impl ShopDirectory for PgBackend {
    async fn list_shops(&self) -> Result<Vec<Shop>, StoreError> {
        self.all_shops().await.map_err(into_store_error)
    }

    async fn get_shop(&self, shop_id: &ShopId) -> Result<Option<Shop>, StoreError> {
        self.find_shop(shop_id).await.map_err(into_store_error)
    }

    async fn register_shop(&self, shop: NewShop) -> Result<Shop, StoreError> {
        self.insert_shop(shop).await.map_err(into_store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_pass_through_unchanged() {
        let err = into_store_error(StoreError::Conflict("busy".to_string()).into());
        assert!(matches!(err, StoreError::Conflict(message) if message == "busy"));

        let err = into_store_error(shared::ServiceError::EmptyName.into());
        assert!(matches!(err, StoreError::Invalid(shared::ServiceError::EmptyName)));
    }

    #[test]
    fn missing_rows_become_not_found() {
        let err = into_store_error(DieselError::NotFound.into());
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn unknown_failures_are_transport_errors() {
        let err = into_store_error(anyhow::anyhow!("connection refused"));
        assert!(matches!(err, StoreError::Transport(message) if message.contains("connection refused")));
    }
}

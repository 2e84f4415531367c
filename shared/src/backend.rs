//! Collaborator seams. The booking workflow only needs [`ServiceCatalog`] and
//! [`AppointmentStore`]; the remaining traits back the shop-owner and customer
//! views around it.

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::{
    Appointment, AppointmentId, AppointmentStatus, BookingRequest, CustomerId, NewService,
    NewShop, Service, ServiceId, Shop, ShopId, StoreError,
};

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// An existing shop without services yields an empty list, not an error.
    async fn list_services(&self, shop_id: &ShopId) -> Result<Vec<Service>, StoreError>;
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Creates a `Scheduled` appointment holding every request field, or nothing at all.
    async fn create_appointment(&self, request: &BookingRequest) -> Result<AppointmentId, StoreError>;
}

/// Owner-side catalog edits. Every mutation answers with the shop's catalog as
/// it stands afterwards.
#[async_trait]
pub trait CatalogAdmin: Send + Sync {
    async fn add_service(&self, shop_id: &ShopId, service: NewService) -> Result<Vec<Service>, StoreError>;

    async fn update_service(&self, shop_id: &ShopId, service: Service) -> Result<Vec<Service>, StoreError>;

    async fn remove_service(&self, shop_id: &ShopId, service_id: &ServiceId) -> Result<Vec<Service>, StoreError>;
}

#[async_trait]
pub trait AppointmentDirectory: Send + Sync {
    async fn appointments_for_customer(&self, customer_id: &CustomerId) -> Result<Vec<Appointment>, StoreError>;

    async fn appointments_for_shop(&self, shop_id: &ShopId) -> Result<Vec<Appointment>, StoreError>;

    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError>;

    /// Fails with [`StoreError::Conflict`] unless the current status may move to `status`.
    async fn update_status(&self, id: AppointmentId, status: AppointmentStatus) -> Result<Appointment, StoreError>;

    async fn delete_appointment(&self, id: AppointmentId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ShopDirectory: Send + Sync {
    async fn list_shops(&self) -> Result<Vec<Shop>, StoreError>;

    async fn get_shop(&self, shop_id: &ShopId) -> Result<Option<Shop>, StoreError>;

    async fn register_shop(&self, shop: NewShop) -> Result<Shop, StoreError>;
}

/// Everything the booking service needs from a storage backend.
pub trait Backend:
    ServiceCatalog + AppointmentStore + CatalogAdmin + AppointmentDirectory + ShopDirectory
{
}

impl<T> Backend for T where
    T: ServiceCatalog + AppointmentStore + CatalogAdmin + AppointmentDirectory + ShopDirectory
{
}

/// Shops with at least one service whose name or category matches `category`,
/// ignoring case. Catalogs are fetched concurrently.
pub async fn shops_offering<B>(backend: &B, category: &str) -> Result<Vec<Shop>, StoreError>
where
    B: ShopDirectory + ServiceCatalog + ?Sized,
{
    let shops = backend.list_shops().await?;
    let catalogs = try_join_all(shops.iter().map(|shop| backend.list_services(&shop.id))).await?;

    Ok(shops
        .into_iter()
        .zip(catalogs)
        .filter(|(_, services)| services.iter().any(|s| s.matches_category(category)))
        .map(|(shop, _)| shop)
        .collect())
}

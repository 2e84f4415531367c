//! Process-local backend. Used for development runs and tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;
use uuid::Uuid;

use crate::{
    Appointment, AppointmentDirectory, AppointmentId, AppointmentStatus, AppointmentStore,
    BookingRequest, CatalogAdmin, CustomerId, NewService, NewShop, Service, ServiceCatalog,
    ServiceId, Shop, ShopDirectory, ShopId, StoreError,
};

#[derive(Debug, Default)]
struct State {
    shops: BTreeMap<ShopId, Shop>,
    catalogs: HashMap<ShopId, Vec<Service>>,
    appointments: BTreeMap<AppointmentId, Appointment>,
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a shop with a ready-made catalog, replacing any previous entry.
    pub fn with_shop(self, shop: Shop, services: Vec<Service>) -> Self {
        {
            let mut state = self.state();
            state.catalogs.insert(shop.id.clone(), services);
            state.shops.insert(shop.id.clone(), shop);
        }
        self
    }

    pub fn appointment_count(&self) -> usize {
        self.state().appointments.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn catalog_mut(&mut self, shop_id: &ShopId) -> Result<&mut Vec<Service>, StoreError> {
        self.catalogs
            .get_mut(shop_id)
            .ok_or_else(|| StoreError::NotFound(format!("shop {shop_id}")))
    }

    fn appointment_mut(&mut self, id: AppointmentId) -> Result<&mut Appointment, StoreError> {
        self.appointments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("appointment {id}")))
    }
}

#[async_trait]
impl ServiceCatalog for InMemoryBackend {
    async fn list_services(&self, shop_id: &ShopId) -> Result<Vec<Service>, StoreError> {
        self.state()
            .catalogs
            .get(shop_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("shop {shop_id}")))
    }
}

#[async_trait]
impl AppointmentStore for InMemoryBackend {
    async fn create_appointment(&self, request: &BookingRequest) -> Result<AppointmentId, StoreError> {
        let mut state = self.state();
        if !state.shops.contains_key(&request.shop_id) {
            return Err(StoreError::NotFound(format!("shop {}", request.shop_id)));
        }
        let id = AppointmentId::generate();
        state
            .appointments
            .insert(id, Appointment::scheduled(id, request, Utc::now()));
        info!("Created appointment {} for shop {}", id, request.shop_id);
        Ok(id)
    }
}

#[async_trait]
impl CatalogAdmin for InMemoryBackend {
    async fn add_service(&self, shop_id: &ShopId, service: NewService) -> Result<Vec<Service>, StoreError> {
        let service = service.into_service(ServiceId::new(Uuid::new_v4().to_string()))?;
        let mut state = self.state();
        let catalog = state.catalog_mut(shop_id)?;
        catalog.push(service);
        Ok(catalog.clone())
    }

    async fn update_service(&self, shop_id: &ShopId, service: Service) -> Result<Vec<Service>, StoreError> {
        service.validate()?;
        let mut state = self.state();
        let catalog = state.catalog_mut(shop_id)?;
        let slot = catalog
            .iter_mut()
            .find(|s| s.id == service.id)
            .ok_or_else(|| StoreError::NotFound(format!("service {}", service.id)))?;
        *slot = service;
        Ok(catalog.clone())
    }

    async fn remove_service(&self, shop_id: &ShopId, service_id: &ServiceId) -> Result<Vec<Service>, StoreError> {
        let mut state = self.state();
        let catalog = state.catalog_mut(shop_id)?;
        let before = catalog.len();
        catalog.retain(|s| &s.id != service_id);
        if catalog.len() == before {
            return Err(StoreError::NotFound(format!("service {service_id}")));
        }
        Ok(catalog.clone())
    }
}

#[async_trait]
impl AppointmentDirectory for InMemoryBackend {
    async fn appointments_for_customer(&self, customer_id: &CustomerId) -> Result<Vec<Appointment>, StoreError> {
        Ok(self
            .state()
            .appointments
            .values()
            .filter(|a| &a.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn appointments_for_shop(&self, shop_id: &ShopId) -> Result<Vec<Appointment>, StoreError> {
        Ok(self
            .state()
            .appointments
            .values()
            .filter(|a| &a.shop_id == shop_id)
            .cloned()
            .collect())
    }

    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        Ok(self.state().appointments.get(&id).cloned())
    }

    async fn update_status(&self, id: AppointmentId, status: AppointmentStatus) -> Result<Appointment, StoreError> {
        let mut state = self.state();
        let appointment = state.appointment_mut(id)?;
        if !appointment.status.can_transition_to(status) {
            return Err(StoreError::Conflict(format!(
                "appointment {id} cannot move from {} to {status}",
                appointment.status
            )));
        }
        appointment.status = status;
        Ok(appointment.clone())
    }

    async fn delete_appointment(&self, id: AppointmentId) -> Result<(), StoreError> {
        self.state()
            .appointments
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("appointment {id}")))
    }
}

#[async_trait]
impl ShopDirectory for InMemoryBackend {
    async fn list_shops(&self) -> Result<Vec<Shop>, StoreError> {
        Ok(self.state().shops.values().cloned().collect())
    }

    async fn get_shop(&self, shop_id: &ShopId) -> Result<Option<Shop>, StoreError> {
        Ok(self.state().shops.get(shop_id).cloned())
    }

    async fn register_shop(&self, shop: NewShop) -> Result<Shop, StoreError> {
        let shop = Shop {
            id: ShopId::new(Uuid::new_v4().to_string()),
            owner_id: shop.owner_id,
            name: shop.name,
            location: shop.location,
            owner_name: shop.owner_name,
            email: shop.email,
            created_at: Utc::now(),
        };
        let mut state = self.state();
        state.catalogs.insert(shop.id.clone(), Vec::new());
        state.shops.insert(shop.id.clone(), shop.clone());
        Ok(shop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn new_shop() -> NewShop {
        NewShop {
            owner_id: "owner-1".to_string(),
            name: "Fade Factory".to_string(),
            location: "Main St".to_string(),
            owner_name: "Sam".to_string(),
            email: "sam@example.com".to_string(),
        }
    }

    fn new_service(name: &str, price: i64) -> NewService {
        NewService {
            name: name.to_string(),
            price: BigDecimal::from(price),
            category: None,
            duration: None,
        }
    }

    #[tokio::test]
    async fn catalog_mutations_return_the_new_catalog() {
        let backend = InMemoryBackend::new();
        let shop = backend.register_shop(new_shop()).await.unwrap();
        assert!(backend.list_services(&shop.id).await.unwrap().is_empty());

        let catalog = backend.add_service(&shop.id, new_service("Haircut", 25)).await.unwrap();
        assert_eq!(catalog.len(), 1);
        let catalog = backend.add_service(&shop.id, new_service("Shave", 20)).await.unwrap();
        assert_eq!(catalog.len(), 2);

        let mut shave = catalog[1].clone();
        shave.price = BigDecimal::from(22);
        let catalog = backend.update_service(&shop.id, shave.clone()).await.unwrap();
        assert_eq!(catalog[1].price, BigDecimal::from(22));

        let catalog = backend.remove_service(&shop.id, &shave.id).await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(backend.list_services(&shop.id).await.unwrap(), catalog);
    }

    #[tokio::test]
    async fn catalog_rejects_invalid_and_unknown_services() {
        let backend = InMemoryBackend::new();
        let shop = backend.register_shop(new_shop()).await.unwrap();

        let err = backend.add_service(&shop.id, new_service("Haircut", -5)).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        let err = backend
            .remove_service(&shop.id, &ServiceId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let err = backend.list_services(&ShopId::new("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}

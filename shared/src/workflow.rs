//! The customer-side booking workflow.
//!
//! One [`BookingWorkflow`] exists per booking session. It walks a linear state
//! machine:
//!
//! ```text
//! Browsing -> Selecting -> DateTimePending -> Submitting -> Committed
//!                                                       \-> Failed -> DateTimePending
//! ```
//!
//! Validation failures never change state and never touch a collaborator. The
//! draft (selection, date, time) survives every failure and is only cleared by
//! a successful commit.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    AppointmentId, AppointmentStore, BookingError, BookingRequest, CustomerId,
    PersistenceError, Service, ServiceCatalog, ServiceId, ServiceSelection, ShopId, StoreError,
    TimeSlot,
};

/// Source of "today" for the past-date check.
pub trait Clock: fmt::Debug + Send + Sync {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookingDraft {
    pub selection: ServiceSelection,
    pub date: Option<NaiveDate>,
    pub time: Option<TimeSlot>,
}

#[derive(Debug, Clone)]
pub enum WorkflowState {
    Browsing,
    Selecting,
    DateTimePending,
    Submitting,
    Committed(AppointmentId),
    Failed(PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StateKind {
    Browsing,
    Selecting,
    DateTimePending,
    Submitting,
    Committed,
    Failed,
}

impl WorkflowState {
    pub fn kind(&self) -> StateKind {
        match self {
            WorkflowState::Browsing => StateKind::Browsing,
            WorkflowState::Selecting => StateKind::Selecting,
            WorkflowState::DateTimePending => StateKind::DateTimePending,
            WorkflowState::Submitting => StateKind::Submitting,
            WorkflowState::Committed(_) => StateKind::Committed,
            WorkflowState::Failed(_) => StateKind::Failed,
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StateKind::Browsing => "browsing",
            StateKind::Selecting => "selecting services",
            StateKind::DateTimePending => "awaiting date and time",
            StateKind::Submitting => "submitting",
            StateKind::Committed => "committed",
            StateKind::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
pub struct BookingWorkflow {
    shop_id: ShopId,
    catalog: Vec<Service>,
    draft: BookingDraft,
    state: WorkflowState,
    clock: Arc<dyn Clock>,
}

impl BookingWorkflow {
    /// Loads the shop's catalog and starts browsing it.
    pub async fn open<C>(shop_id: ShopId, catalog: &C, clock: Arc<dyn Clock>) -> Result<Self, BookingError>
    where
        C: ServiceCatalog + ?Sized,
    {
        let services = catalog.list_services(&shop_id).await.map_err(|source| {
            warn!("Service catalog unavailable for shop {}: {}", shop_id, source);
            BookingError::CatalogUnavailable {
                shop_id: shop_id.clone(),
                source,
            }
        })?;

        info!("Opened booking for shop {} with {} services", shop_id, services.len());
        Ok(Self::with_catalog(shop_id, services, clock))
    }

    pub fn with_catalog(shop_id: ShopId, catalog: Vec<Service>, clock: Arc<dyn Clock>) -> Self {
        Self {
            shop_id,
            catalog,
            draft: BookingDraft::default(),
            state: WorkflowState::Browsing,
            clock,
        }
    }

    pub fn shop_id(&self) -> &ShopId {
        &self.shop_id
    }

    pub fn catalog(&self) -> &[Service] {
        &self.catalog
    }

    pub fn catalog_service(&self, id: &ServiceId) -> Option<&Service> {
        self.catalog.iter().find(|s| &s.id == id)
    }

    pub fn draft(&self) -> &BookingDraft {
        &self.draft
    }

    pub fn selection(&self) -> &ServiceSelection {
        &self.draft.selection
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    /// A session may be dropped at any point except while a create is in flight.
    pub fn can_abandon(&self) -> bool {
        !matches!(self.state, WorkflowState::Submitting)
    }

    fn ensure_editable(&self) -> Result<(), BookingError> {
        match self.state {
            WorkflowState::Submitting => Err(BookingError::SubmissionInProgress),
            WorkflowState::Committed(_) => Err(BookingError::AlreadyCommitted),
            _ => Ok(()),
        }
    }

    /// Adding a service that is already selected leaves the selection as is.
    pub fn add_service(&mut self, service: Service) -> Result<&ServiceSelection, BookingError> {
        self.ensure_editable()?;

        let id = service.id.clone();
        if self.draft.selection.add(service) {
            debug!("Selected service {} for shop {}", id, self.shop_id);
        }
        if matches!(self.state, WorkflowState::Browsing) {
            self.state = WorkflowState::Selecting;
        }
        Ok(&self.draft.selection)
    }

    /// Removing a service that is not selected is not an error.
    pub fn remove_service(&mut self, service_id: &ServiceId) -> Result<&ServiceSelection, BookingError> {
        self.ensure_editable()?;

        if self.draft.selection.remove(service_id) {
            debug!("Deselected service {} for shop {}", service_id, self.shop_id);
        }
        if self.draft.selection.is_empty() && matches!(self.state, WorkflowState::DateTimePending) {
            self.state = WorkflowState::Selecting;
        }
        Ok(&self.draft.selection)
    }

    pub fn compute_total(&self) -> BigDecimal {
        self.draft.selection.total()
    }

    /// Past dates are accepted here and rejected at submit time.
    pub fn set_date(&mut self, date: NaiveDate) -> Result<&BookingDraft, BookingError> {
        self.ensure_editable()?;
        self.draft.date = Some(date);
        Ok(&self.draft)
    }

    pub fn set_time(&mut self, time: TimeSlot) -> Result<&BookingDraft, BookingError> {
        self.ensure_editable()?;
        self.draft.time = Some(time);
        Ok(&self.draft)
    }

    /// Moves on to date and time selection.
    pub fn proceed(&mut self) -> Result<(), BookingError> {
        self.ensure_editable()?;
        if self.draft.selection.is_empty() {
            return Err(BookingError::EmptySelection);
        }
        self.state = WorkflowState::DateTimePending;
        Ok(())
    }

    /// Validates the draft and enters `Submitting`.
    ///
    /// The returned request must be handed to an [`AppointmentStore`] and the
    /// outcome fed back through [`complete_submit`](Self::complete_submit).
    pub fn begin_submit(&mut self, customer_id: Option<CustomerId>) -> Result<BookingRequest, BookingError> {
        self.ensure_editable()?;

        let request = self.validate(customer_id).inspect_err(|e| {
            debug!("Rejected booking draft for shop {}: {}", self.shop_id, e);
        })?;

        self.state = WorkflowState::Submitting;
        info!(
            "Submitting booking for customer {} at shop {} on {} {}",
            request.customer_id, request.shop_id, request.date, request.time
        );
        Ok(request)
    }

    fn validate(&self, customer_id: Option<CustomerId>) -> Result<BookingRequest, BookingError> {
        let customer_id = customer_id
            .filter(|id| !id.is_blank())
            .ok_or(BookingError::NotAuthenticated)?;
        let date = self.draft.date.ok_or(BookingError::MissingDate)?;
        let time = self.draft.time.ok_or(BookingError::MissingTime)?;
        if self.draft.selection.is_empty() {
            return Err(BookingError::EmptySelection);
        }

        let today = self.clock.today();
        if date < today {
            return Err(BookingError::DateInPast { date, today });
        }

        Ok(BookingRequest {
            customer_id,
            shop_id: self.shop_id.clone(),
            services: self.draft.selection.as_slice().to_vec(),
            date,
            time,
        })
    }

    /// Applies the store's answer to a request produced by `begin_submit`.
    pub fn complete_submit(
        &mut self,
        request: &BookingRequest,
        outcome: Result<AppointmentId, StoreError>,
    ) -> Result<AppointmentId, BookingError> {
        if !matches!(self.state, WorkflowState::Submitting) {
            return Err(BookingError::InvalidTransition {
                action: "complete a submission",
                state: self.kind(),
            });
        }

        match outcome {
            Ok(id) => {
                info!("Booked appointment {} for customer {}", id, request.customer_id);
                self.state = WorkflowState::Committed(id);
                self.draft = BookingDraft::default();
                Ok(id)
            }
            Err(source) => {
                let failure = PersistenceError {
                    operation: "create_appointment",
                    shop_id: request.shop_id.clone(),
                    customer_id: request.customer_id.clone(),
                    source,
                };
                error!("Booking failed: {}", failure);
                self.state = WorkflowState::Failed(failure.clone());
                Err(failure.into())
            }
        }
    }

    /// Validates, creates the appointment and records the outcome.
    ///
    /// The future must be driven to completion once polled; dropping it midway
    /// leaves the workflow in `Submitting`.
    pub async fn submit<S>(&mut self, customer_id: Option<CustomerId>, store: &S) -> Result<AppointmentId, BookingError>
    where
        S: AppointmentStore + ?Sized,
    {
        let request = self.begin_submit(customer_id)?;
        let outcome = store.create_appointment(&request).await;
        self.complete_submit(&request, outcome)
    }

    /// Returns a failed attempt to `DateTimePending` with the draft untouched.
    pub fn retry(&mut self) -> Result<(), BookingError> {
        match self.state {
            WorkflowState::Failed(_) => {
                self.state = WorkflowState::DateTimePending;
                Ok(())
            }
            WorkflowState::Submitting => Err(BookingError::SubmissionInProgress),
            WorkflowState::Committed(_) => Err(BookingError::AlreadyCommitted),
            _ => Err(BookingError::InvalidTransition {
                action: "retry",
                state: self.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::Shop;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ten_am() -> TimeSlot {
        "10:00 AM".parse().unwrap()
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(date(2025, 5, 20)))
    }

    fn service(id: &str, name: &str, price: i64) -> Service {
        Service::new(id, name, BigDecimal::from(price)).unwrap()
    }

    fn haircut() -> Service {
        service("1", "Haircut", 25)
    }

    fn beard_trim() -> Service {
        service("2", "Beard Trim", 15)
    }

    fn shop(id: &str) -> Shop {
        Shop {
            id: ShopId::new(id),
            owner_id: "owner".to_string(),
            name: "Clip Joint".to_string(),
            location: "High St".to_string(),
            owner_name: "Alex".to_string(),
            email: "alex@example.com".to_string(),
            created_at: Utc::now(),
        }
    }

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new().with_shop(shop("s1"), vec![haircut(), beard_trim()])
    }

    fn workflow() -> BookingWorkflow {
        BookingWorkflow::with_catalog(ShopId::new("s1"), vec![haircut(), beard_trim()], clock())
    }

    fn customer() -> Option<CustomerId> {
        Some(CustomerId::new("u1"))
    }

    /// Counts create attempts and fails the first `failures` of them.
    #[derive(Debug)]
    struct FlakyStore {
        inner: InMemoryBackend,
        failures: usize,
        attempts: AtomicUsize,
    }

    impl FlakyStore {
        fn failing(failures: usize) -> Self {
            Self {
                inner: backend(),
                failures,
                attempts: AtomicUsize::new(0),
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AppointmentStore for FlakyStore {
        async fn create_appointment(&self, request: &BookingRequest) -> Result<AppointmentId, StoreError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(StoreError::Transport("connection reset".to_string()));
            }
            self.inner.create_appointment(request).await
        }
    }

    #[derive(Debug)]
    struct DownCatalog;

    #[async_trait]
    impl ServiceCatalog for DownCatalog {
        async fn list_services(&self, _shop_id: &ShopId) -> Result<Vec<Service>, StoreError> {
            Err(StoreError::PermissionDenied("catalog read".to_string()))
        }
    }

    #[tokio::test]
    async fn open_loads_catalog_and_starts_browsing() {
        let backend = backend();
        let flow = BookingWorkflow::open(ShopId::new("s1"), &backend, clock()).await.unwrap();
        assert_eq!(flow.kind(), StateKind::Browsing);
        assert_eq!(flow.catalog().len(), 2);
        assert!(flow.selection().is_empty());
    }

    #[tokio::test]
    async fn open_wraps_catalog_failures() {
        let err = BookingWorkflow::open(ShopId::new("s1"), &DownCatalog, clock())
            .await
            .unwrap_err();
        match err {
            BookingError::CatalogUnavailable { shop_id, source } => {
                assert_eq!(shop_id, ShopId::new("s1"));
                assert!(matches!(source, StoreError::PermissionDenied(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_shop_without_services_is_empty_not_an_error() {
        let backend = InMemoryBackend::new().with_shop(shop("empty"), Vec::new());
        let flow = BookingWorkflow::open(ShopId::new("empty"), &backend, clock()).await.unwrap();
        assert!(flow.catalog().is_empty());
    }

    #[test]
    fn total_of_haircut_and_beard_trim() {
        let mut flow = workflow();
        flow.add_service(haircut()).unwrap();
        flow.add_service(beard_trim()).unwrap();
        assert_eq!(flow.compute_total(), BigDecimal::from(40));
        assert_eq!(flow.kind(), StateKind::Selecting);
    }

    #[test]
    fn empty_selection_totals_zero() {
        assert_eq!(workflow().compute_total(), BigDecimal::from(0));
    }

    #[test]
    fn adding_twice_equals_adding_once() {
        let mut once = workflow();
        once.add_service(haircut()).unwrap();

        let mut twice = workflow();
        twice.add_service(haircut()).unwrap();
        let selection = twice.add_service(haircut()).unwrap();

        assert_eq!(selection.len(), 1);
        assert_eq!(once.selection(), twice.selection());
    }

    #[test]
    fn removing_absent_service_changes_nothing() {
        let mut flow = workflow();
        flow.add_service(haircut()).unwrap();
        let before = flow.selection().clone();

        let after = flow.remove_service(&ServiceId::new("42")).unwrap();
        assert_eq!(after, &before);
    }

    #[test]
    fn selection_stays_unique_over_mixed_sequences() {
        let catalog: Vec<Service> = (0..5)
            .map(|i| service(&i.to_string(), &format!("Service {i}"), i * 10 + 5))
            .collect();
        let mut flow = BookingWorkflow::with_catalog(ShopId::new("s1"), catalog.clone(), clock());

        // Deterministic walk mixing adds and removes.
        let mut seed: u64 = 7;
        for _ in 0..200 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let pick = &catalog[(seed >> 33) as usize % catalog.len()];
            if (seed >> 17) % 3 == 0 {
                flow.remove_service(&pick.id).unwrap();
            } else {
                flow.add_service(pick.clone()).unwrap();
            }

            let ids: Vec<_> = flow.selection().iter().map(|s| s.id.clone()).collect();
            let mut deduped = ids.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(ids.len(), deduped.len());

            let expected = flow
                .selection()
                .iter()
                .fold(BigDecimal::from(0), |acc, s| acc + &s.price);
            assert_eq!(flow.compute_total(), expected);
        }
    }

    #[test]
    fn setters_commute() {
        let mut a = workflow();
        a.set_date(date(2025, 6, 1)).unwrap();
        a.set_time(ten_am()).unwrap();

        let mut b = workflow();
        b.set_time(ten_am()).unwrap();
        b.set_date(date(2025, 6, 1)).unwrap();

        assert_eq!(a.draft(), b.draft());
    }

    #[test]
    fn proceed_requires_a_selection() {
        let mut flow = workflow();
        assert!(matches!(flow.proceed(), Err(BookingError::EmptySelection)));
        assert_eq!(flow.kind(), StateKind::Browsing);

        flow.add_service(haircut()).unwrap();
        flow.proceed().unwrap();
        assert_eq!(flow.kind(), StateKind::DateTimePending);

        flow.remove_service(&haircut().id).unwrap();
        assert_eq!(flow.kind(), StateKind::Selecting);
    }

    #[tokio::test]
    async fn submit_with_empty_selection_never_reaches_the_store() {
        let store = FlakyStore::failing(0);
        let mut flow = workflow();
        flow.set_date(date(2025, 6, 1)).unwrap();
        flow.set_time(ten_am()).unwrap();

        let err = flow.submit(customer(), &store).await.unwrap_err();
        assert!(matches!(err, BookingError::EmptySelection));
        assert_eq!(store.attempts(), 0);
    }

    #[tokio::test]
    async fn submit_checks_fields_in_order() {
        let store = FlakyStore::failing(0);
        let mut flow = workflow();

        let err = flow.submit(None, &store).await.unwrap_err();
        assert!(matches!(err, BookingError::NotAuthenticated));
        let err = flow.submit(Some(CustomerId::new("  ")), &store).await.unwrap_err();
        assert!(matches!(err, BookingError::NotAuthenticated));

        let err = flow.submit(customer(), &store).await.unwrap_err();
        assert!(matches!(err, BookingError::MissingDate));

        flow.set_date(date(2025, 6, 1)).unwrap();
        let err = flow.submit(customer(), &store).await.unwrap_err();
        assert!(matches!(err, BookingError::MissingTime));

        flow.set_time(ten_am()).unwrap();
        let err = flow.submit(customer(), &store).await.unwrap_err();
        assert!(matches!(err, BookingError::EmptySelection));
        assert!(err.is_validation());

        assert_eq!(store.attempts(), 0);
        assert_eq!(flow.kind(), StateKind::Browsing);
    }

    #[tokio::test]
    async fn submit_rejects_dates_before_today() {
        let store = FlakyStore::failing(0);
        let mut flow = workflow();
        flow.add_service(haircut()).unwrap();
        flow.set_date(date(2025, 5, 19)).unwrap();
        flow.set_time(ten_am()).unwrap();

        let err = flow.submit(customer(), &store).await.unwrap_err();
        assert!(matches!(err, BookingError::DateInPast { .. }));
        assert_eq!(store.attempts(), 0);

        flow.set_date(date(2025, 5, 20)).unwrap();
        flow.submit(customer(), &store).await.unwrap();
    }

    #[tokio::test]
    async fn successful_submit_commits_and_clears_draft() {
        let backend = backend();
        let mut flow = BookingWorkflow::open(ShopId::new("s1"), &backend, clock()).await.unwrap();
        flow.add_service(haircut()).unwrap();
        flow.proceed().unwrap();
        flow.set_date(date(2025, 6, 1)).unwrap();
        flow.set_time(ten_am()).unwrap();

        let id = flow.submit(customer(), &backend).await.unwrap();
        assert!(matches!(flow.state(), WorkflowState::Committed(committed) if *committed == id));
        assert_eq!(flow.draft(), &BookingDraft::default());
        assert_eq!(backend.appointment_count(), 1);

        let stored = crate::AppointmentDirectory::get_appointment(&backend, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, crate::AppointmentStatus::Scheduled);
        assert_eq!(stored.customer_id, CustomerId::new("u1"));
        assert_eq!(stored.shop_id, ShopId::new("s1"));
        assert_eq!(stored.time, ten_am());
        assert_eq!(stored.total, BigDecimal::from(25));

        assert!(matches!(flow.add_service(beard_trim()), Err(BookingError::AlreadyCommitted)));
        assert!(matches!(flow.submit(customer(), &backend).await, Err(BookingError::AlreadyCommitted)));
        assert_eq!(backend.appointment_count(), 1);
    }

    #[tokio::test]
    async fn store_failure_keeps_draft_and_allows_resubmit() {
        let store = FlakyStore::failing(1);
        let mut flow = workflow();
        flow.add_service(haircut()).unwrap();
        flow.set_date(date(2025, 6, 1)).unwrap();
        flow.set_time(ten_am()).unwrap();
        let draft = flow.draft().clone();

        let err = flow.submit(customer(), &store).await.unwrap_err();
        match &err {
            BookingError::Persistence(failure) => {
                assert_eq!(failure.operation, "create_appointment");
                assert_eq!(failure.customer_id, CustomerId::new("u1"));
                assert!(matches!(failure.source, StoreError::Transport(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_upstream());
        assert_eq!(flow.kind(), StateKind::Failed);
        assert_eq!(flow.draft(), &draft);

        flow.submit(customer(), &store).await.unwrap();
        assert_eq!(flow.kind(), StateKind::Committed);
        assert_eq!(store.attempts(), 2);
    }

    #[tokio::test]
    async fn retry_returns_failed_attempt_to_date_time_selection() {
        let store = FlakyStore::failing(1);
        let mut flow = workflow();
        assert!(matches!(flow.retry(), Err(BookingError::InvalidTransition { .. })));

        flow.add_service(haircut()).unwrap();
        flow.set_date(date(2025, 6, 1)).unwrap();
        flow.set_time(ten_am()).unwrap();
        flow.submit(customer(), &store).await.unwrap_err();

        flow.retry().unwrap();
        assert_eq!(flow.kind(), StateKind::DateTimePending);
        assert_eq!(flow.draft().time, Some(ten_am()));
    }

    #[test]
    fn second_submit_while_in_flight_is_rejected() {
        let mut flow = workflow();
        flow.add_service(haircut()).unwrap();
        flow.set_date(date(2025, 6, 1)).unwrap();
        flow.set_time(ten_am()).unwrap();

        let request = flow.begin_submit(customer()).unwrap();
        assert_eq!(flow.kind(), StateKind::Submitting);
        assert!(!flow.can_abandon());

        assert!(matches!(flow.begin_submit(customer()), Err(BookingError::SubmissionInProgress)));
        assert!(matches!(flow.add_service(beard_trim()), Err(BookingError::SubmissionInProgress)));
        assert!(matches!(flow.set_time(ten_am()), Err(BookingError::SubmissionInProgress)));
        assert!(matches!(flow.retry(), Err(BookingError::SubmissionInProgress)));

        let id = AppointmentId::generate();
        assert_eq!(flow.complete_submit(&request, Ok(id)).unwrap(), id);
        assert!(flow.can_abandon());
        assert!(matches!(
            flow.complete_submit(&request, Ok(id)),
            Err(BookingError::InvalidTransition { .. })
        ));
    }
}

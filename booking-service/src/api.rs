use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;
use uuid::Uuid;
use crate::sessions::BookingSessions;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub sessions: BookingSessions,
    pub slots: Arc<SlotSchedule>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(backend: Arc<dyn Backend>, slots: SlotSchedule, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            sessions: BookingSessions::new(),
            slots: Arc::new(slots),
            clock,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    UnknownSession(Uuid),
    NotFound(String),
    BadRequest(String),
    Booking(BookingError),
    Store(StoreError),
    Internal(String),
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        ApiError::Booking(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StoreError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        StoreError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownSession(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Booking(e) if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Booking(BookingError::CatalogUnavailable { source, .. }) => match source {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Booking(BookingError::Persistence(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Booking(_) => StatusCode::CONFLICT,
            ApiError::Store(e) => store_status(e),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::UnknownSession(id) => format!("booking session {} not found", id),
            ApiError::NotFound(what) => format!("{} not found", what),
            ApiError::BadRequest(message) | ApiError::Internal(message) => message.clone(),
            ApiError::Booking(e) => e.to_string(),
            ApiError::Store(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.message();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", error);
        }
        (status, Json(ErrorResponse { error })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
pub struct BookingView {
    pub session_id: Uuid,
    pub shop_id: ShopId,
    pub state: StateKind,
    pub catalog: Vec<Service>,
    pub selection: Vec<Service>,
    pub total: BigDecimal,
    pub date: Option<NaiveDate>,
    pub time: Option<TimeSlot>,
    pub appointment_id: Option<AppointmentId>,
    pub error: Option<String>,
}

impl BookingView {
    fn of(session_id: Uuid, flow: &BookingWorkflow) -> Self {
        let (appointment_id, error) = match flow.state() {
            WorkflowState::Committed(id) => (Some(*id), None),
            WorkflowState::Failed(failure) => (None, Some(failure.to_string())),
            _ => (None, None),
        };
        Self {
            session_id,
            shop_id: flow.shop_id().clone(),
            state: flow.kind(),
            catalog: flow.catalog().to_vec(),
            selection: flow.selection().as_slice().to_vec(),
            total: flow.compute_total(),
            date: flow.draft().date,
            time: flow.draft().time,
            appointment_id,
            error,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenBookingRequest {
    pub shop_id: ShopId,
}

#[derive(Debug, Deserialize)]
pub struct SelectServiceRequest {
    pub service_id: ServiceId,
}

#[derive(Debug, Deserialize)]
pub struct SetDateRequest {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct SetTimeRequest {
    pub time: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitBookingRequest {
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct ShopQuery {
    pub category: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/slots", get(list_slots))
        .route("/shops", get(list_shops).post(register_shop))
        .route("/shops/:shop_id", get(get_shop))
        .route("/shops/:shop_id/services", get(list_services).post(add_service))
        .route(
            "/shops/:shop_id/services/:service_id",
            put(update_service).delete(remove_service),
        )
        .route("/shops/:shop_id/appointments", get(shop_appointments))
        .route("/customers/:customer_id/appointments", get(customer_appointments))
        .route("/appointments/:id", get(get_appointment).delete(delete_appointment))
        .route("/appointments/:id/status", put(update_status))
        .route("/bookings", post(open_booking))
        .route("/bookings/:id", get(get_booking).delete(abandon_booking))
        .route("/bookings/:id/services", post(select_service))
        .route("/bookings/:id/services/:service_id", delete(deselect_service))
        .route("/bookings/:id/date", put(set_date))
        .route("/bookings/:id/time", put(set_time))
        .route("/bookings/:id/proceed", post(proceed))
        .route("/bookings/:id/submit", post(submit_booking))
        .route("/bookings/:id/retry", post(retry_booking))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn list_slots(State(state): State<AppState>) -> Json<Vec<TimeSlot>> {
    Json(state.slots.offered())
}

pub async fn list_shops(
    State(state): State<AppState>,
    Query(query): Query<ShopQuery>,
) -> ApiResult<Vec<Shop>> {
    match query.category.filter(|c| !c.trim().is_empty()) {
        Some(category) => Ok(Json(shops_offering(state.backend.as_ref(), &category).await?)),
        None => Ok(Json(state.backend.list_shops().await?)),
    }
}

pub async fn register_shop(
    State(state): State<AppState>,
    Json(request): Json<NewShop>,
) -> Result<(StatusCode, Json<Shop>), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("shop name must not be empty".to_string()));
    }
    let shop = state.backend.register_shop(request).await?;
    tracing::info!("Registered shop {} ({})", shop.name, shop.id);
    Ok((StatusCode::CREATED, Json(shop)))
}

pub async fn get_shop(State(state): State<AppState>, Path(shop_id): Path<ShopId>) -> ApiResult<Shop> {
    state
        .backend
        .get_shop(&shop_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("shop {}", shop_id)))
}

pub async fn list_services(
    State(state): State<AppState>,
    Path(shop_id): Path<ShopId>,
) -> ApiResult<Vec<Service>> {
    Ok(Json(state.backend.list_services(&shop_id).await?))
}

pub async fn add_service(
    State(state): State<AppState>,
    Path(shop_id): Path<ShopId>,
    Json(service): Json<NewService>,
) -> Result<(StatusCode, Json<Vec<Service>>), ApiError> {
    let catalog = state.backend.add_service(&shop_id, service).await?;
    Ok((StatusCode::CREATED, Json(catalog)))
}

pub async fn update_service(
    State(state): State<AppState>,
    Path((shop_id, service_id)): Path<(ShopId, ServiceId)>,
    Json(changes): Json<NewService>,
) -> ApiResult<Vec<Service>> {
    let service = changes.into_service(service_id).map_err(StoreError::from)?;
    Ok(Json(state.backend.update_service(&shop_id, service).await?))
}

pub async fn remove_service(
    State(state): State<AppState>,
    Path((shop_id, service_id)): Path<(ShopId, ServiceId)>,
) -> ApiResult<Vec<Service>> {
    Ok(Json(state.backend.remove_service(&shop_id, &service_id).await?))
}

pub async fn shop_appointments(
    State(state): State<AppState>,
    Path(shop_id): Path<ShopId>,
) -> ApiResult<Vec<Appointment>> {
    Ok(Json(state.backend.appointments_for_shop(&shop_id).await?))
}

pub async fn customer_appointments(
    State(state): State<AppState>,
    Path(customer_id): Path<CustomerId>,
) -> ApiResult<Vec<Appointment>> {
    Ok(Json(state.backend.appointments_for_customer(&customer_id).await?))
}

pub async fn get_appointment(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Appointment> {
    state
        .backend
        .get_appointment(AppointmentId::from(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("appointment {}", id)))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<Appointment> {
    Ok(Json(state.backend.update_status(AppointmentId::from(id), request.status).await?))
}

pub async fn delete_appointment(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.backend.delete_appointment(AppointmentId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Runs a synchronous step against an open booking session.
fn in_session<R>(
    state: &AppState,
    id: Uuid,
    f: impl FnOnce(&mut BookingWorkflow) -> Result<R, ApiError>,
) -> Result<R, ApiError> {
    state
        .sessions
        .with(id, f)
        .unwrap_or_else(|| Err(ApiError::UnknownSession(id)))
}

pub async fn open_booking(
    State(state): State<AppState>,
    Json(request): Json<OpenBookingRequest>,
) -> Result<(StatusCode, Json<BookingView>), ApiError> {
    let flow = BookingWorkflow::open(request.shop_id, state.backend.as_ref(), state.clock.clone()).await?;
    let session_id = state.sessions.insert(flow);
    let view = in_session(&state, session_id, |flow| Ok(BookingView::of(session_id, flow)))?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_booking(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<BookingView> {
    in_session(&state, id, |flow| Ok(Json(BookingView::of(id, flow))))
}

pub async fn abandon_booking(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    match state.sessions.abandon(id) {
        Some(Ok(())) => Ok(StatusCode::NO_CONTENT),
        Some(Err(e)) => Err(e.into()),
        None => Err(ApiError::UnknownSession(id)),
    }
}

pub async fn select_service(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SelectServiceRequest>,
) -> ApiResult<BookingView> {
    in_session(&state, id, |flow| {
        let service = flow
            .catalog_service(&request.service_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("service {}", request.service_id)))?;
        flow.add_service(service)?;
        Ok(Json(BookingView::of(id, flow)))
    })
}

pub async fn deselect_service(
    State(state): State<AppState>,
    Path((id, service_id)): Path<(Uuid, ServiceId)>,
) -> ApiResult<BookingView> {
    in_session(&state, id, |flow| {
        flow.remove_service(&service_id)?;
        Ok(Json(BookingView::of(id, flow)))
    })
}

pub async fn set_date(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetDateRequest>,
) -> ApiResult<BookingView> {
    in_session(&state, id, |flow| {
        flow.set_date(request.date)?;
        Ok(Json(BookingView::of(id, flow)))
    })
}

pub async fn set_time(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetTimeRequest>,
) -> ApiResult<BookingView> {
    let slot = state
        .slots
        .resolve(&request.time)
        .ok_or_else(|| ApiError::BadRequest(format!("{:?} is not an offered time slot", request.time)))?;

    in_session(&state, id, |flow| {
        flow.set_time(slot)?;
        Ok(Json(BookingView::of(id, flow)))
    })
}

pub async fn proceed(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<BookingView> {
    in_session(&state, id, |flow| {
        flow.proceed()?;
        Ok(Json(BookingView::of(id, flow)))
    })
}

pub async fn retry_booking(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<BookingView> {
    in_session(&state, id, |flow| {
        flow.retry()?;
        Ok(Json(BookingView::of(id, flow)))
    })
}

pub async fn submit_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitBookingRequest>,
) -> Result<(StatusCode, Json<BookingView>), ApiError> {
    let booking = in_session(&state, id, |flow| Ok(flow.begin_submit(request.customer_id)?))?;

    // Detached so the create, and recording its outcome, outlive a dropped request.
    let backend = state.backend.clone();
    let sessions = state.sessions.clone();
    let completion = tokio::spawn(async move {
        let outcome = backend.create_appointment(&booking).await;
        let applied = sessions.with(id, |flow| (flow.complete_submit(&booking, outcome), BookingView::of(id, flow)));
        if matches!(applied, Some((Ok(_), _))) {
            sessions.release(id);
        }
        applied
    });

    let (result, view) = completion
        .await
        .map_err(|e| ApiError::Internal(format!("booking submission task failed: {}", e)))?
        .ok_or(ApiError::UnknownSession(id))?;

    result?;
    tracing::info!("Booking session {} committed appointment {:?}", id, view.appointment_id);
    Ok((StatusCode::CREATED, Json(view)))
}

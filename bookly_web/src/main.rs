use std::{error::Error, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bookly::{
    domain::{
        core::{
            Addon, AddonId, AddonLine, AddonLineId, Booking, BookingCustomer, BookingId,
            BookingKind, BookingLedger, BookingStatus, ClientId, FeeConfig, LedgerError, Money,
            PaymentError,
            Provider, ProviderId, ProviderRepository, Service, ServiceId, ServiceRepository,
        },
        reconcile::{PaymentReconciler, ReconcileError, ReconcileOutcome},
        Entity, ID_GENERATOR,
    },
    infrastructure::{
        connect,
        core::{PgBookingLedger, PgCatalog, PgPaymentRecords},
    },
    BooklyConfig,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() {
    match BooklyConfig::load() {
        Ok(config) => {
            tracing_subscriber::fmt()
                .with_max_level(Level::from(&config.logger.level))
                .init();
            if let Err(error) = serve(&config).await {
                error!("application error: {}", error);
            }
        }
        Err(error) => {
            tracing_subscriber::fmt::init();
            error!("application error: {}", error)
        }
    }
}

#[derive(Clone)]
struct AppState {
    ledger: PgBookingLedger,
    catalog: PgCatalog,
    reconciler: Arc<PaymentReconciler<PgBookingLedger, PgPaymentRecords, PgCatalog>>,
}

async fn serve(config: &BooklyConfig) -> Result<(), Box<dyn Error>> {
    let pool = connect(&config.database).await?;
    sqlx::migrate!("../migrations").run(&pool).await?;

    let ledger = PgBookingLedger::new(pool.clone(), config.database.lock_timeout_ms);
    let catalog = PgCatalog::new(pool.clone());
    let fees = FeeConfig::try_from(&config.gateway)?;
    let reconciler = Arc::new(PaymentReconciler::new(
        ledger.clone(),
        PgPaymentRecords::new(pool),
        catalog.clone(),
        fees,
        config.gateway.webhook_secret.clone(),
    ));
    let state = AppState {
        ledger,
        catalog,
        reconciler,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/bookings", post(create_booking))
        .route("/bookings/manual", post(create_manual_booking))
        .route("/bookings/:id", get(find_booking))
        .route("/bookings/:id/status", post(transition_booking))
        .route("/bookings/:id/addons", post(replace_addon_lines))
        .route("/webhooks/payment", post(payment_webhook))
        .with_state(state);

    let addr = config.server.listen.parse()?;
    info!("listening on {}", addr);
    axum_server::bind(addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct CreateBookingRequest {
    provider_id: u64,
    service_id: u64,
    slot_start: DateTime<Utc>,
    client_id: Option<u64>,
    guest_name: Option<String>,
    guest_email: Option<String>,
    guest_phone: Option<String>,
    #[serde(default)]
    addon_ids: Vec<u64>,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct CreateManualBookingRequest {
    #[serde(flatten)]
    booking: CreateBookingRequest,
    price: i64,
    platform_fee: i64,
    provider_payout: i64,
}

impl CreateBookingRequest {
    fn customer(&self) -> BookingCustomer {
        match self.client_id {
            Some(id) => BookingCustomer::Registered {
                id: ClientId::from(id),
            },
            None => BookingCustomer::Guest {
                name: self.guest_name.clone().unwrap_or_default(),
                email: self.guest_email.clone().unwrap_or_default(),
                phone: self.guest_phone.clone(),
            },
        }
    }
}

/// Direct creation path for internal accounts. Providers on the standard
/// fee schedule never enter here; their bookings are created by the payment
/// reconciler once the gateway reports a settlement.
async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<Json<Booking>, ApiError> {
    let (provider, service, addons) = resolve_catalog(&state, &request).await?;
    if !provider.zero_fee() {
        return Err(ApiError::bad_request(
            "paid bookings are created through the payment gateway",
        ));
    }
    let booking =
        build_booking(&request, &service, BookingKind::Internal, addons).await?;
    let booking = state.ledger.create(booking).await?;
    Ok(Json(booking))
}

/// Administrative entry with caller-supplied commercial fields.
async fn create_manual_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateManualBookingRequest>,
) -> Result<Json<Booking>, ApiError> {
    let (_, service, addons) = resolve_catalog(&state, &request.booking).await?;
    let currency = service.price().currency();
    let kind = BookingKind::Manual {
        price: Money::new(request.price, currency),
        platform_fee: Money::new(request.platform_fee, currency),
        provider_payout: Money::new(request.provider_payout, currency),
    };
    let booking = build_booking(&request.booking, &service, kind, addons).await?;
    let booking = state.ledger.create(booking).await?;
    Ok(Json(booking))
}

async fn find_booking(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Booking>, ApiError> {
    let booking = state
        .ledger
        .find_by_id(BookingId::from(id))
        .await
        .map_err(LedgerError::from)?
        .ok_or(LedgerError::NotFound(id))?;
    Ok(Json(booking))
}

#[derive(Deserialize)]
struct TransitionRequest {
    status: BookingStatus,
}

/// Drives the booking state machine; cancellation through here frees the
/// slot for the conflict guard.
async fn transition_booking(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Booking>, ApiError> {
    let booking = state
        .ledger
        .transition(BookingId::from(id), request.status)
        .await?;
    Ok(Json(booking))
}

#[derive(Deserialize)]
struct ReplaceAddonsRequest {
    addon_ids: Vec<u64>,
}

/// Replaces the booking's add-on lines with fresh price snapshots and
/// re-derives the stored subtotal.
async fn replace_addon_lines(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ReplaceAddonsRequest>,
) -> Result<Json<Booking>, ApiError> {
    let booking_id = BookingId::from(id);
    let booking = state
        .ledger
        .find_by_id(booking_id)
        .await
        .map_err(LedgerError::from)?
        .ok_or(LedgerError::NotFound(id))?;
    let mut lines = Vec::with_capacity(request.addon_ids.len());
    for raw in &request.addon_ids {
        let addon = bookly::domain::core::AddonRepository::find_by_id(
            &state.catalog,
            AddonId::from(*raw),
        )
        .await
        .map_err(LedgerError::from)?
        .filter(|a| a.provider_id() == booking.provider_id())
        .ok_or(LedgerError::Referential {
            entity: Addon::ENTITY_NAME,
            id: *raw,
        })?;
        lines.push(AddonLine::snapshot(
            ID_GENERATOR.generate::<AddonLineId>(),
            &addon,
        ));
    }
    let booking = state.ledger.set_addon_lines(booking_id, lines).await?;
    Ok(Json(booking))
}

async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get("X-Gateway-Signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let outcome = state.reconciler.handle(&body, signature).await?;
    let body = match outcome {
        ReconcileOutcome::Created(booking) => {
            json!({ "outcome": "created", "booking_id": *booking.id() })
        }
        ReconcileOutcome::Duplicate(booking) => {
            json!({ "outcome": "duplicate", "booking_id": *booking.id() })
        }
        ReconcileOutcome::Updated(booking) => {
            json!({ "outcome": "updated", "booking_id": *booking.id() })
        }
        ReconcileOutcome::Ignored => json!({ "outcome": "ignored" }),
    };
    Ok(Json(body))
}

async fn resolve_catalog(
    state: &AppState,
    request: &CreateBookingRequest,
) -> Result<(Provider, Service, Vec<Addon>), ApiError> {
    let provider_id = ProviderId::from(request.provider_id);
    let provider = ProviderRepository::find_by_id(&state.catalog, provider_id)
        .await
        .map_err(LedgerError::from)?
        .ok_or(LedgerError::Referential {
            entity: Provider::ENTITY_NAME,
            id: request.provider_id,
        })?;
    let service = ServiceRepository::find_by_id(&state.catalog, ServiceId::from(request.service_id))
        .await
        .map_err(LedgerError::from)?
        .filter(|s| s.provider_id() == provider_id)
        .ok_or(LedgerError::Referential {
            entity: Service::ENTITY_NAME,
            id: request.service_id,
        })?;
    let mut addons = Vec::with_capacity(request.addon_ids.len());
    for raw in &request.addon_ids {
        let addon = bookly::domain::core::AddonRepository::find_by_id(
            &state.catalog,
            AddonId::from(*raw),
        )
        .await
        .map_err(LedgerError::from)?
        .filter(|a| a.provider_id() == provider_id)
        .ok_or(LedgerError::Referential {
            entity: Addon::ENTITY_NAME,
            id: *raw,
        })?;
        addons.push(addon);
    }
    Ok((provider, service, addons))
}

async fn build_booking(
    request: &CreateBookingRequest,
    service: &Service,
    kind: BookingKind,
    addons: Vec<Addon>,
) -> Result<Booking, ApiError> {
    let slot = request.slot_start..request.slot_start + service.duration();
    let mut booking = Booking::create(
        ID_GENERATOR.generate::<BookingId>(),
        service.provider_id(),
        service.id(),
        kind,
        slot,
        request.customer(),
        service.price(),
        None,
        request.notes.clone(),
    )
    .map_err(LedgerError::from)?;
    for addon in &addons {
        let line = AddonLine::snapshot(ID_GENERATOR.generate::<AddonLineId>(), addon);
        booking.add_line(line).map_err(LedgerError::from)?;
    }
    Ok(booking)
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_owned(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("request failed: {}", self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(value: LedgerError) -> Self {
        let status = match &value {
            LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::SlotConflict => StatusCode::CONFLICT,
            LedgerError::Referential { .. } | LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::LockTimeout => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::DataAccess(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: value.to_string(),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(value: ReconcileError) -> Self {
        match value {
            ReconcileError::Payment(e) => {
                let status = match e {
                    PaymentError::Unverifiable
                    | PaymentError::MalformedEvent(_)
                    | PaymentError::BlankTransactionId
                    | PaymentError::MissingMetadata { .. }
                    | PaymentError::MalformedMetadata { .. } => StatusCode::BAD_REQUEST,
                };
                Self {
                    status,
                    message: e.to_string(),
                }
            }
            ReconcileError::Ledger(e) => e.into(),
            ReconcileError::DataAccess(e) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: e.to_string(),
            },
        }
    }
}

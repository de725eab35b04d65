//! JSON-over-HTTP surface for the presentation layer.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use meter_client::domain::{AggregatedReading, ChartStats, Meter, Reading};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    analytics::{
        calculate_power_metrics, classify, is_inefficient, AggregationLevel, ChartWindow, Classification,
        PowerMetrics,
    },
    coordinator::{Coordinator, CoordinatorError},
    registration::MeterRegistration,
    store::StoreError,
};

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
    pub power_factor: f64,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/meters", get(list_meters).post(add_meter))
        .route("/meters/:id", axum::routing::delete(remove_meter))
        .route("/meters/:id/latest", get(latest_reading))
        .route("/meters/:id/stats", get(chart_stats))
        .route("/meters/:id/peak", get(peak_since))
        .route("/meters/:id/average", get(average_power))
        .route("/aggregates", get(aggregates))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: &'static str,
}

impl ApiError {
    const COULD_NOT_ADD_METER: ApiError = ApiError {
        status: StatusCode::BAD_REQUEST,
        message: "could not add meter",
    };

    const METER_NOT_FOUND: ApiError = ApiError {
        status: StatusCode::NOT_FOUND,
        message: "meter not found",
    };

    const INTERNAL: ApiError = ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "internal error",
    };

    const DATA_INTEGRITY: ApiError = ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "data integrity error",
    };

    const INVALID_QUERY: ApiError = ApiError {
        status: StatusCode::BAD_REQUEST,
        message: "invalid query parameters",
    };
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownMeter(_) => Self::METER_NOT_FOUND,
            StoreError::DuplicateMeter(_) => Self::COULD_NOT_ADD_METER,
            StoreError::Backend(_) => {
                tracing::error!(error = %e, "storage failure while serving request");
                Self::INTERNAL
            }
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::InvalidMeter(_) => Self::COULD_NOT_ADD_METER,
            CoordinatorError::Store(e) => e.into(),
            CoordinatorError::Aggregation(e) => {
                tracing::error!(error = %e, "aggregation failed while serving request");
                Self::DATA_INTEGRITY
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(error = %rejection.body_text(), "meter registration body rejected");
        Self::COULD_NOT_ADD_METER
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::warn!(error = %rejection.body_text(), "query string rejected");
        Self::INVALID_QUERY
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn list_meters(State(state): State<ApiState>) -> Json<Vec<Meter>> {
    Json(state.coordinator.meters().as_ref().clone())
}

async fn add_meter(
    State(state): State<ApiState>,
    registration: Result<Json<MeterRegistration>, JsonRejection>,
) -> Result<(StatusCode, Json<Meter>), ApiError> {
    let Json(registration) = registration?;
    let meter = state.coordinator.add_meter(registration).await?;
    Ok((StatusCode::CREATED, Json(meter)))
}

#[derive(Serialize)]
struct RemovedMeter {
    meter_id: String,
    readings_removed: u64,
}

async fn remove_meter(State(state): State<ApiState>, Path(meter_id): Path<String>) -> ApiResult<RemovedMeter> {
    let readings_removed = state.coordinator.remove_meter(&meter_id).await?;
    Ok(Json(RemovedMeter {
        meter_id,
        readings_removed,
    }))
}

#[derive(Serialize)]
struct LatestView {
    reading: Option<Reading>,
    classification: Option<Classification>,
    /// Coarse power threshold flag, separate from the recommendation.
    exceeds_inefficiency_threshold: Option<bool>,
    power: Option<PowerMetrics>,
}

async fn latest_reading(State(state): State<ApiState>, Path(meter_id): Path<String>) -> ApiResult<LatestView> {
    let reading = state.coordinator.store().latest_reading(&meter_id).await?;

    Ok(Json(LatestView {
        classification: reading.as_ref().map(classify),
        exceeds_inefficiency_threshold: reading.as_ref().map(is_inefficient),
        power: reading
            .as_ref()
            .map(|r| calculate_power_metrics(r.voltage, r.current, state.power_factor)),
        reading,
    }))
}

#[derive(Deserialize)]
struct StatsQuery {
    #[serde(default)]
    window: ChartWindow,
}

#[derive(Serialize)]
struct StatsView {
    window: ChartWindow,
    stats: Option<ChartStats>,
}

async fn chart_stats(
    State(state): State<ApiState>,
    Path(meter_id): Path<String>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> ApiResult<StatsView> {
    let Query(query) = query?;
    let stats = state.coordinator.chart_stats(&meter_id, query.window).await?;
    Ok(Json(StatsView {
        window: query.window,
        stats,
    }))
}

#[derive(Deserialize)]
struct PeakQuery {
    #[serde(with = "time::serde::rfc3339")]
    since: OffsetDateTime,
}

#[derive(Serialize)]
struct PeakView {
    peak_kw: Option<f64>,
}

async fn peak_since(
    State(state): State<ApiState>,
    Path(meter_id): Path<String>,
    query: Result<Query<PeakQuery>, QueryRejection>,
) -> ApiResult<PeakView> {
    let Query(query) = query?;
    let peak_kw = state.coordinator.store().peak_since(&meter_id, query.since).await?;
    Ok(Json(PeakView { peak_kw }))
}

#[derive(Serialize)]
struct AverageView {
    average_kw: Option<f64>,
}

async fn average_power(State(state): State<ApiState>, Path(meter_id): Path<String>) -> ApiResult<AverageView> {
    let average_kw = state.coordinator.store().average_power(&meter_id).await?;
    Ok(Json(AverageView { average_kw }))
}

#[derive(Deserialize)]
struct AggregatesQuery {
    #[serde(default)]
    level: AggregationLevel,
}

async fn aggregates(
    State(state): State<ApiState>,
    query: Result<Query<AggregatesQuery>, QueryRejection>,
) -> ApiResult<Vec<AggregatedReading>> {
    let Query(query) = query?;
    Ok(Json(state.coordinator.aggregated_readings(query.level).await?))
}

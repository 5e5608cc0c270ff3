use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::error::{BreakerOpen, ClassifiedError};
use crate::observability::PerformanceMetrics;
use crate::resilience::CircuitSnapshot;
use crate::state::ActionState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub consumers: usize,
}

/// Serializable view of one consumer.
#[derive(Serialize)]
pub struct ConsumerStatus<V> {
    pub id: String,
    pub polling: bool,
    pub last_result: Option<V>,
    pub last_error: Option<ClassifiedError>,
    pub breaker_open: Option<BreakerOpen>,
    pub connection_attempts: u32,
    pub rotation_index: usize,
    pub last_update_ms_ago: Option<u128>,
}

impl<V> ConsumerStatus<V> {
    fn from_state(id: String, state: ActionState<V>) -> Self {
        Self {
            id,
            polling: state.is_polling(),
            last_update_ms_ago: state.last_update.map(|at| at.elapsed().as_millis()),
            last_result: state.last_result,
            last_error: state.last_error,
            breaker_open: state.breaker_open,
            connection_attempts: state.connection_attempts,
            rotation_index: state.rotation_index,
        }
    }
}

#[derive(Serialize)]
pub struct CircuitStatus {
    pub name: String,
    #[serde(flatten)]
    pub snapshot: CircuitSnapshot,
}

pub async fn get_status<V>(State(state): State<AdminState<V>>) -> Json<SystemStatus>
where
    V: Clone + Send + Sync + 'static,
{
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        consumers: state.guard.states().len(),
    })
}

pub async fn get_consumers<V>(State(state): State<AdminState<V>>) -> Json<Vec<ConsumerStatus<V>>>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    let states = state.guard.states();
    let consumers = states
        .ids()
        .into_iter()
        .filter_map(|id| {
            let record = states.get(&id)?;
            Some(ConsumerStatus::from_state(id, record))
        })
        .collect();
    Json(consumers)
}

pub async fn get_consumer<V>(
    State(state): State<AdminState<V>>,
    Path(id): Path<String>,
) -> Result<Json<ConsumerStatus<V>>, StatusCode>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    let record = state.guard.state(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(ConsumerStatus::from_state(id, record)))
}

pub async fn get_circuits<V>(State(state): State<AdminState<V>>) -> Json<Vec<CircuitStatus>>
where
    V: Clone + Send + Sync + 'static,
{
    Json(
        state
            .guard
            .breakers()
            .snapshots()
            .into_iter()
            .map(|(name, snapshot)| CircuitStatus { name, snapshot })
            .collect(),
    )
}

pub async fn get_metrics<V>(State(state): State<AdminState<V>>) -> Json<PerformanceMetrics>
where
    V: Clone + Send + Sync + 'static,
{
    Json(state.guard.metrics())
}

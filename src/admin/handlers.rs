use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::error::BalancerError;
use crate::load_balancer::{Instance, Mode, Target};

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub service: String,
    pub strategy: String,
    pub mode: Mode,
    pub pool_size: usize,
    pub instances: Vec<InstanceStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub id: u64,
    pub address: String,
    pub queued: usize,
}

impl From<&Instance> for InstanceStatus {
    fn from(instance: &Instance) -> Self {
        Self {
            id: instance.id().get(),
            address: instance.target().to_string(),
            queued: instance.queued(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddInstance {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceAdded {
    pub id: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let balancer = &state.balancer;
    let instances = balancer.instances();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: balancer.name().to_string(),
        strategy: balancer.strategy().name().to_string(),
        mode: balancer.mode(),
        pool_size: instances.len(),
        instances: instances.iter().map(InstanceStatus::from).collect(),
    })
}

pub async fn get_instances(State(state): State<AdminState>) -> Json<Vec<InstanceStatus>> {
    let instances = state.balancer.instances();
    Json(instances.iter().map(InstanceStatus::from).collect())
}

pub async fn add_instance(
    State(state): State<AdminState>,
    Json(body): Json<AddInstance>,
) -> Result<(StatusCode, Json<InstanceAdded>), (StatusCode, String)> {
    if let Err(e) = Target::parse(&body.url) {
        return Err((StatusCode::BAD_REQUEST, e.to_string()));
    }

    match state.balancer.add_instance(&body.url) {
        Ok(id) => Ok((StatusCode::CREATED, Json(InstanceAdded { id: id.get() }))),
        // The URL parsed, so the only remaining configuration error is a duplicate.
        Err(e @ BalancerError::Configuration(_)) => Err((StatusCode::CONFLICT, e.to_string())),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

//! `GET /intelligence/<uuid>` (§6): the spec describes this as an HTML
//! rendering of a single archived item with "renderer is external" — HTML
//! templating itself is explicitly out of scope (§1 Non-goals). This
//! serves the same `ArchivedItem` an external renderer would consume, as
//! JSON, rather than attempting template output ourselves.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::App;
use crate::error::AppError;
use crate::model::ArchivedItem;

pub fn route() -> Router<App> {
    Router::<App>::new().route("/intelligence/{uuid}", get(handle_get_item))
}

async fn handle_get_item(State(app): State<App>, Path(uuid): Path<Uuid>) -> Result<Json<ArchivedItem>, AppError> {
    let item = app.query_engine.get(uuid).await.map_err(|e| AppError::Unhandled(e.to_string()))?;
    item.map(Json).ok_or(AppError::NotFound)
}

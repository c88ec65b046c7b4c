//! `GET /rssfeed.xml` (§6): serves the RSS Publisher's current feed.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::app::App;

pub fn route() -> Router<App> {
    Router::<App>::new().route("/rssfeed.xml", get(handle_feed))
}

async fn handle_feed(State(app): State<App>) -> impl IntoResponse {
    let xml = app.rss.generate_feed().await;
    ([(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")], xml)
}

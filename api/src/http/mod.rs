//! HTTP surface (§6): each submodule exposes a `route() -> Router<App>`,
//! merged here the way the upstream feature modules compose their own
//! routers rather than declaring every path in one place.

mod collect;
mod feed;
mod intelligence_view;
mod processed;
mod rpc;
mod statistics_routes;

use axum::Router;

use crate::app::App;

pub fn route() -> Router<App> {
    Router::<App>::new()
        .merge(collect::route())
        .merge(processed::route())
        .merge(rpc::route())
        .merge(feed::route())
        .merge(intelligence_view::route())
        .merge(statistics_routes::route())
}

pub mod redirectors;
pub mod servers;

use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post, put};

use crate::auth::auth_middleware;
use crate::state::AppState;
use crate::ws;

pub fn api_router(state: AppState) -> Router {
    let authed = Router::new()
        // Servers
        .route(
            "/servers",
            get(servers::list_servers)
                .post(servers::create_server)
                .delete(servers::remove_all_servers),
        )
        .route(
            "/servers/{id}",
            get(servers::get_server).delete(servers::remove_server),
        )
        .route("/servers/{id}/provision", post(servers::provision_server))
        .route("/servers/{id}/roles", put(servers::update_roles))
        .route(
            "/providers/{provider}/instances",
            get(servers::list_instances),
        )
        // Redirectors
        .route(
            "/redirectors",
            get(redirectors::list_redirectors).post(redirectors::create_redirector),
        )
        .route("/redirectors/{id}", delete(redirectors::delete_redirector))
        .route(
            "/redirectors/{id}/resync",
            post(redirectors::resync_redirector),
        )
        // Live notifications
        .route("/ws", get(ws::connect))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new().merge(authed).with_state(state)
}

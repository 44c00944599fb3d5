use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bx_db::models::{ADMIN_ACCESS_LEVEL, User};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated caller, resolved once per request and handed to every
/// orchestrator call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub username: String,
    pub access_level: i32,
}

impl RequestContext {
    pub fn is_admin(&self) -> bool {
        self.access_level >= ADMIN_ACCESS_LEVEL
    }
}

impl From<User> for RequestContext {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            access_level: user.access_level,
        }
    }
}

/// Middleware that validates `Authorization: Bearer <key>` against the
/// configured `CONTROL_PLANE_API_KEY`, then resolves `X-User-Id` to a user.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let user_id = match validate_headers(&state.config.control_plane_api_key, &req) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    match resolve_user(&state, user_id).await {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

async fn resolve_user(state: &AppState, user_id: Uuid) -> Result<RequestContext, ApiError> {
    let user = User::get_by_id(&state.db, user_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(user.into())
}

fn validate_headers(api_key: &str, req: &Request) -> Result<Uuid, ApiError> {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    if token != api_key {
        return Err(ApiError::Unauthorized);
    }

    req.headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(ApiError::BadRequest("missing or invalid X-User-Id header".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(auth: Option<&str>, user: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/servers");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn middleware_future_is_send() {
        fn assert_send<F: std::future::Future + Send>(_: fn(State<AppState>, Request, Next) -> F) {}
        assert_send(auth_middleware);
    }

    #[test]
    fn admin_level_gates_admin_checks() {
        let ctx = |access_level| RequestContext {
            user_id: Uuid::new_v4(),
            username: "operator".into(),
            access_level,
        };
        assert!(!ctx(1).is_admin());
        assert!(ctx(ADMIN_ACCESS_LEVEL).is_admin());
    }

    #[test]
    fn bearer_key_and_user_header_are_required() {
        let id = Uuid::new_v4().to_string();

        assert_eq!(
            validate_headers("key", &request(Some("Bearer key"), Some(&id))).unwrap().to_string(),
            id
        );
        assert!(matches!(
            validate_headers("key", &request(Some("Bearer nope"), Some(&id))),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            validate_headers("key", &request(None, Some(&id))),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            validate_headers("key", &request(Some("Bearer key"), Some("web01"))),
            Err(ApiError::BadRequest(_))
        ));
    }
}

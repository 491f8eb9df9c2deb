use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::db::models::requests::ActorRef;
use crate::workflow::error::{WorkflowError, WorkflowResult};

pub const ADMIN_ROLE: &str = "admin";

/// Decoded bearer tokens, so repeated calls skip signature verification.
pub type TokenCache = Arc<Cache<String, Claims>>;

pub fn create_token_cache() -> TokenCache {
    Arc::new(
        Cache::builder()
            .time_to_live(Duration::from_secs(600))
            .max_capacity(10_000)
            .build(),
    )
}

/// JWT claims issued by the back-office login service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject - actor id
    pub sub: String,
    pub username: String,
    pub role: String,
    /// Expiration (UNIX time)
    pub exp: usize,
}

impl Claims {
    fn expired(&self) -> bool {
        (self.exp as i64) <= chrono::Utc::now().timestamp()
    }
}

/// The authenticated caller, attached to every private request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub display_name: String,
    pub role: String,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    /// Approve, reject and policy changes are admin-only.
    pub fn require_admin(&self) -> WorkflowResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden(format!(
                "role '{}' may not review requests",
                self.role
            )))
        }
    }

    pub fn to_ref(&self) -> ActorRef {
        ActorRef {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
        }
    }

    fn development() -> Self {
        Self {
            id: "dev-admin".to_string(),
            display_name: "Development Admin".to_string(),
            role: ADMIN_ROLE.to_string(),
        }
    }
}

impl From<Claims> for Actor {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            display_name: claims.username,
            role: claims.role,
        }
    }
}

fn unauthorized(message: &str) -> Response {
    tracing::warn!("{}", message);
    WorkflowError::Unauthorized(message.to_string()).into_response()
}

/// Bearer-token authentication; inserts an [`Actor`] extension.
pub async fn jwt_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    if state.config.auth_disabled {
        req.extensions_mut().insert(Actor::development());
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get("Authorization")
        .ok_or_else(|| unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| unauthorized("Invalid Authorization header format"))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("Invalid token format (missing 'Bearer ' prefix)"))?
        .to_string();

    let claims = match state.token_cache.get(&token) {
        Some(claims) if !claims.expired() => claims,
        Some(_) => {
            state.token_cache.invalidate(&token);
            return Err(unauthorized("Token expired"));
        }
        None => {
            let data = decode::<Claims>(
                &token,
                &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
                &Validation::default(),
            )
            .map_err(|e| {
                tracing::warn!("JWT decoding failed: {:?}", e);
                unauthorized("Invalid token")
            })?;
            state.token_cache.insert(token, data.claims.clone());
            data.claims
        }
    };

    tracing::debug!(actor = %claims.sub, role = %claims.role, "Authenticated request");
    req.extensions_mut().insert(Actor::from(claims));
    Ok(next.run(req).await)
}

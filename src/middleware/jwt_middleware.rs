/// JWT Authentication Middleware
///
/// Validates the access token from the `Authorization: Bearer` header and
/// injects the caller's `Identity` into request extensions. Handlers behind
/// it take `web::ReqData<Identity>`.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use uuid::Uuid;

use crate::auth::validate_access_token;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};
use crate::user::Role;

/// Authenticated caller, as asserted by a verified access token
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

/// JWT middleware for protecting routes
pub struct JwtMiddleware {
    jwt_config: Rc<JwtSettings>,
}

impl JwtMiddleware {
    pub fn new(jwt_config: JwtSettings) -> Self {
        Self {
            jwt_config: Rc::new(jwt_config),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            jwt_config: self.jwt_config.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    jwt_config: Rc<JwtSettings>,
}

/// Extract the token from a `Bearer <token>` header value
fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn authenticate(req: &ServiceRequest, jwt_config: &JwtSettings) -> Result<Identity, AuthError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token)
        .ok_or(AuthError::MissingToken)?;

    let claims = validate_access_token(token, jwt_config)?;
    Ok(Identity {
        user_id: claims.user_id()?,
        role: claims.role,
    })
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        match authenticate(&req, &self.jwt_config) {
            Ok(identity) => {
                tracing::debug!(
                    user_id = %identity.user_id,
                    role = %identity.role,
                    "JWT validated successfully"
                );
                req.extensions_mut().insert(identity);

                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
            Err(e) => {
                tracing::warn!(path = %req.path(), error = %e, "Request rejected by auth gate");
                Box::pin(async move { Err(AppError::Auth(e).into()) })
            }
        }
    }
}

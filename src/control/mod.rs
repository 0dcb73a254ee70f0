use crate::access::controllers as access_controllers;
use crate::ai::AiError;
use crate::operation::{NewOperation, OperationRepository};
use crate::supply::SupplyPlanningError;
use actix::fut::{ready, Ready};
use actix::prelude::*;
use actix_session::Session;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    error::JsonPayloadError,
    http::StatusCode,
    http::Method,
    web::{self, Data, ServiceConfig},
    FromRequest, HttpMessage, HttpRequest, HttpResponse,
};
use derive_more::{Deref, Display, Error};
use futures_util::future::LocalBoxFuture;
use log_error::LogError;
use mpstats_client::FetchError;
use serde_json::json;
use std::sync::Arc;
use wb_types::access::service::UserCredentialsService;
use wb_types::access::{self, AccountError, Login, UserCredentials};
use wb_types::supply::PlanningError;

pub mod ai_helper;
pub mod item;
pub mod planning;

#[cfg(test)]
mod tests_api;

pub type Response = Result<HttpResponse, ControllerError>;

pub const SESSION_LOGIN_KEY: &str = "login";

#[derive(Debug, Display, Error)]
pub enum ControllerError {
    #[display("Not authenticated")]
    Unauthorized,
    #[error(ignore)]
    #[display("{_0}")]
    NotFound(String),
    #[error(ignore)]
    #[display("{_0}")]
    InvalidInput(String),
    #[display("Not enough sales data to build a supply plan")]
    InsufficientData,
    #[display("Upstream rate limit exceeded, try again later")]
    RateLimited,
    #[display("Upstream rejected the API credentials")]
    UpstreamAuth,
    #[display("Upstream request timed out")]
    UpstreamTimeout,
    #[error(ignore)]
    #[display("{_0}")]
    Upstream(String),
    #[error(ignore)]
    #[display("{_0}")]
    ServiceUnavailable(String),
    #[error(ignore)]
    #[display("Internal server error")]
    InternalServerError(anyhow::Error),
}

impl From<anyhow::Error> for ControllerError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AccountError>() {
            Ok(err) => err.into(),
            Err(err) => Self::InternalServerError(err),
        }
    }
}

impl From<actix::MailboxError> for ControllerError {
    fn from(err: actix::MailboxError) -> Self {
        Self::InternalServerError(err.into())
    }
}

impl From<AccountError> for ControllerError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InvalidCredentials | AccountError::UnknownUser => Self::Unauthorized,
            err => Self::InvalidInput(err.to_string()),
        }
    }
}

impl From<PlanningError> for ControllerError {
    fn from(err: PlanningError) -> Self {
        match err {
            PlanningError::InsufficientData => Self::InsufficientData,
            err => Self::InvalidInput(err.to_string()),
        }
    }
}

impl From<FetchError> for ControllerError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidRequest(msg) => Self::InvalidInput(msg),
            FetchError::NotFound => Self::NotFound("Item not found".to_string()),
            FetchError::UpstreamAuth => Self::UpstreamAuth,
            FetchError::UpstreamTimeout => Self::UpstreamTimeout,
            FetchError::RateLimited => Self::RateLimited,
            err @ (FetchError::Upstream { .. } | FetchError::Decode(_)) => {
                Self::Upstream(err.to_string())
            }
            FetchError::Transport(err) => Self::Upstream(format!("Upstream unavailable: {err}")),
        }
    }
}

impl From<SupplyPlanningError> for ControllerError {
    fn from(err: SupplyPlanningError) -> Self {
        match err {
            SupplyPlanningError::Fetch(err) => err.into(),
            SupplyPlanningError::Planning(err) => err.into(),
        }
    }
}

impl From<AiError> for ControllerError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::NotConfigured => Self::ServiceUnavailable(err.to_string()),
            AiError::EmptyPrompt => Self::InvalidInput(err.to_string()),
            AiError::Timeout => Self::UpstreamTimeout,
            AiError::Upstream { status: 429, .. } => Self::RateLimited,
            err @ (AiError::Upstream { .. } | AiError::Decode(_)) => Self::Upstream(err.to_string()),
            AiError::Transport(err) => Self::Upstream(format!("Upstream unavailable: {err}")),
        }
    }
}

impl actix_web::error::ResponseError for ControllerError {
    fn status_code(&self) -> StatusCode {
        use ControllerError::*;
        match self {
            Unauthorized => StatusCode::UNAUTHORIZED,
            NotFound(_) => StatusCode::NOT_FOUND,
            InvalidInput(_) => StatusCode::BAD_REQUEST,
            InsufficientData => StatusCode::UNPROCESSABLE_ENTITY,
            RateLimited => StatusCode::TOO_MANY_REQUESTS,
            UpstreamAuth | Upstream(_) => StatusCode::BAD_GATEWAY,
            UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            Self::InternalServerError(err) => log::error!("{err:?}"),
            err => log::warn!("{err}"),
        }
        HttpResponse::build(self.status_code()).json(json!({ "detail": self.to_string() }))
    }
}

/// Turns body deserialization failures into the regular error shape.
pub fn json_error_handler(err: JsonPayloadError, _: &HttpRequest) -> actix_web::Error {
    ControllerError::InvalidInput(err.to_string()).into()
}

#[derive(Clone)]
pub struct Identity {
    pub login: String,
}

impl FromRequest for Identity {
    type Error = ControllerError;
    type Future = Ready<Result<Self, Self::Error>>;

    #[inline]
    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Identity>()
                .cloned()
                .ok_or(ControllerError::Unauthorized),
        )
    }
}

/// The logged-in user as stored right now. Writes go through
/// `UserCredentialsService` messages, never by saving this copy back.
#[derive(Deref)]
pub struct CurrentUser(pub UserCredentials);

impl FromRequest for CurrentUser {
    type Error = ControllerError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    #[inline]
    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let login = Login(Identity::extract(&req).await?.login);
            let service = users(&req)?;
            let user = service
                .send(access::service::Get(login))
                .await??
                .ok_or(ControllerError::Unauthorized)?;
            Ok(Self(user))
        })
    }
}

fn users(req: &HttpRequest) -> Result<Data<Addr<UserCredentialsService>>, ControllerError> {
    req.app_data::<Data<Addr<UserCredentialsService>>>()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Unable to extract UserCredentialsService from request").into())
}

/// Copies the logged-in user from the session cookie into request extensions.
pub struct SessionMiddlewareFactory {}

impl<S, B: 'static> Transform<S, ServiceRequest> for SessionMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Transform = SessionMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SessionMiddleware {
            service: Arc::new(service),
        }))
    }
}

pub struct SessionMiddleware<S> {
    service: Arc<S>,
}

impl<S, B> Service<ServiceRequest> for SessionMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        Box::pin(async move {
            let session = req.extract::<Session>().await?;
            match session.get::<String>(SESSION_LOGIN_KEY) {
                Ok(Some(login)) => {
                    req.extensions_mut().insert(Identity { login });
                }
                Err(err) => {
                    log::error!("Unable to extract login from session:\n{err:?}");
                }
                _ => (),
            }
            service.call(req).await
        })
    }
}

/// Answers CORS preflights, 404 for everything else.
pub async fn fallback(req: HttpRequest) -> Response {
    if req.method() == Method::OPTIONS {
        return Ok(HttpResponse::NoContent().finish());
    }
    Err(ControllerError::NotFound("Not found".to_string()))
}

/// Writes an audit row. A failed write is logged and does not fail the request.
pub async fn audit(operations: &dyn OperationRepository, op: NewOperation) {
    operations
        .add(op)
        .await
        .log_error("Unable to record user operation");
}

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(access_controllers::register)
        .service(access_controllers::log_in)
        .service(access_controllers::log_out)
        .service(access_controllers::check)
        .service(access_controllers::profile)
        .service(access_controllers::dashboard)
        .service(access_controllers::list_operations)
        .service(access_controllers::change_password)
        .service(access_controllers::upgrade_subscription)
        .service(access_controllers::add_balance)
        .service(planning::monthly_analysis)
        .service(planning::monthly_analysis_export)
        .service(item::item_sales)
        .service(ai_helper::ai_helper)
        .default_service(web::to(fallback));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;
    use actix_web::body::to_bytes;

    async fn body(err: ControllerError) -> (StatusCode, serde_json::Value) {
        let res = err.error_response();
        let status = res.status();
        let bytes = to_bytes(res.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_rt::test]
    async fn insufficient_data_has_its_own_message() {
        let (status, body) = body(PlanningError::InsufficientData.into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body["detail"],
            "Not enough sales data to build a supply plan"
        );
    }

    #[test]
    fn fetch_errors_map_to_gateway_statuses() {
        let cases = [
            (FetchError::UpstreamAuth, StatusCode::BAD_GATEWAY),
            (FetchError::NotFound, StatusCode::NOT_FOUND),
            (FetchError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (FetchError::UpstreamTimeout, StatusCode::GATEWAY_TIMEOUT),
            (
                FetchError::Upstream {
                    status: 500,
                    body: String::new(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                FetchError::InvalidRequest("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ControllerError::from(err).status_code(), status);
        }
    }

    #[test]
    fn account_errors_inside_anyhow_keep_their_status() {
        let err: anyhow::Error = AccountError::LoginTaken.into();
        assert_eq!(ControllerError::from(err).status_code(), StatusCode::BAD_REQUEST);
        let err: anyhow::Error = AccountError::InvalidCredentials.into();
        assert_eq!(ControllerError::from(err).status_code(), StatusCode::UNAUTHORIZED);
        let err = anyhow::anyhow!("disk on fire");
        assert_eq!(
            ControllerError::from(err).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_rt::test]
    async fn internal_errors_hide_details() {
        let (status, body) =
            body(ControllerError::InternalServerError(anyhow::anyhow!("secret path"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Internal server error");
    }

    #[test]
    fn ai_errors_map_to_statuses() {
        assert_eq!(
            ControllerError::from(AiError::NotConfigured).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ControllerError::from(AiError::EmptyPrompt).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}

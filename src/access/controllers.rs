use crate::control::{audit, CurrentUser, Identity, Response, SESSION_LOGIN_KEY};
use crate::operation::{
    NewOperation, Operation, OperationKind, OperationRepository, OperationStatus, OPERATIONS_PAGE,
    RECENT_ACTIVITY,
};
use actix::Addr;
use actix_session::Session;
use actix_web::{
    get, post,
    web::{Data, Json},
    HttpResponse,
};
use anyhow::Context as AnyhowContext;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use wb_types::access::service::{UserCredentialsDto, UserCredentialsService};
use wb_types::access::{self, generate_salt, Login, Password, Plan, UserCredentials};

#[derive(Serialize)]
pub struct UserSummary {
    pub email: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    pub subscription_type: Plan,
}

impl From<&UserCredentials> for UserSummary {
    fn from(u: &UserCredentials) -> Self {
        Self {
            email: u.login.0.clone(),
            balance: u.balance,
            subscription_type: u.subscription,
        }
    }
}

#[derive(Serialize)]
pub struct Profile {
    #[serde(flatten)]
    pub summary: UserSummary,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
    pub total_analyses: u64,
}

#[derive(Serialize)]
pub struct OperationView {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub status: OperationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
}

impl From<Operation> for OperationView {
    fn from(op: Operation) -> Self {
        Self {
            id: op.id,
            kind: op.kind,
            description: op.description,
            amount: op.amount,
            status: op.status,
            date: op.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub item: String,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
}

#[post("/auth/register")]
pub async fn register(
    Json(dto): Json<UserCredentialsDto>,
    service: Data<Addr<UserCredentialsService>>,
) -> Response {
    let user = service
        .send(access::service::Register(dto))
        .await
        .context("Unable to send message to UserCredentialsService")??;
    log::info!("Registered {}", user.login);
    Ok(HttpResponse::Ok().json(json!({ "message": "User registered successfully" })))
}

#[post("/auth/login")]
pub async fn log_in(
    Json(dto): Json<UserCredentialsDto>,
    session: Session,
    service: Data<Addr<UserCredentialsService>>,
) -> Response {
    let user = service
        .send(access::service::Authenticate(dto))
        .await
        .context("Unable to send message to UserCredentialsService")??;
    session.renew();
    session
        .insert(SESSION_LOGIN_KEY, &user.login.0)
        .context("Unable to insert login into session")?;
    Ok(HttpResponse::Ok().json(json!({
        "authenticated": true,
        "user": UserSummary::from(&user),
    })))
}

#[get("/auth/logout")]
pub async fn log_out(session: Session) -> Response {
    session.purge();
    Ok(HttpResponse::Ok().json(json!({ "message": "Logged out" })))
}

#[get("/auth/check")]
pub async fn check(user: Option<CurrentUser>) -> Response {
    Ok(HttpResponse::Ok().json(match user {
        Some(user) => json!({ "authenticated": true, "user": UserSummary::from(&*user) }),
        None => json!({ "authenticated": false, "user": null }),
    }))
}

#[get("/user/profile")]
pub async fn profile(CurrentUser(user): CurrentUser) -> Response {
    Ok(HttpResponse::Ok().json(Profile {
        summary: UserSummary::from(&user),
        created_at: user.created_at,
        last_login: user.last_login,
        total_analyses: user.total_analyses,
    }))
}

#[get("/user/dashboard")]
pub async fn dashboard(
    CurrentUser(user): CurrentUser,
    operations: Data<Arc<dyn OperationRepository>>,
) -> Response {
    let stats = operations.stats(&user.login).await?;
    let recent = operations
        .recent(&user.login, &OperationKind::BLOCKS, RECENT_ACTIVITY)
        .await?
        .into_iter()
        .map(|op| Activity {
            kind: op.kind,
            item: op.description,
            date: op.created_at,
        })
        .collect::<Vec<_>>();
    Ok(HttpResponse::Ok().json(json!({
        "user": UserSummary::from(&user),
        "stats": {
            "supply_plans": stats.count(OperationKind::SupplyPlanning),
            "ai_helper_uses": stats.count(OperationKind::AiHelper),
            "blocks_used": stats.blocks_used(),
            "total_savings": stats.total_savings(),
        },
        "recent_activity": recent,
    })))
}

#[get("/user/operations")]
pub async fn list_operations(
    identity: Identity,
    operations: Data<Arc<dyn OperationRepository>>,
) -> Response {
    let items = operations
        .list_by_user(&Login(identity.login), OPERATIONS_PAGE)
        .await?
        .into_iter()
        .map(OperationView::from)
        .collect::<Vec<_>>();
    Ok(HttpResponse::Ok().json(items))
}

#[derive(Deserialize)]
pub struct ChangePasswordDto {
    pub new_password: String,
}

#[post("/user/change-password")]
pub async fn change_password(
    Json(dto): Json<ChangePasswordDto>,
    identity: Identity,
    service: Data<Addr<UserCredentialsService>>,
) -> Response {
    let password = Password::generate(&dto.new_password, generate_salt())?;
    service
        .send(access::service::SetPassword {
            login: Login(identity.login),
            password,
        })
        .await??;
    Ok(HttpResponse::Ok().json(json!({ "message": "Password changed successfully" })))
}

#[derive(Deserialize)]
pub struct UpgradeDto {
    pub plan: String,
}

#[post("/user/upgrade-subscription")]
pub async fn upgrade_subscription(
    Json(dto): Json<UpgradeDto>,
    identity: Identity,
    service: Data<Addr<UserCredentialsService>>,
    operations: Data<Arc<dyn OperationRepository>>,
) -> Response {
    let plan: Plan = dto.plan.parse()?;
    let login = Login(identity.login);
    let charged = service
        .send(access::service::Upgrade {
            login: login.clone(),
            plan,
        })
        .await??;
    if charged > Decimal::ZERO {
        audit(
            operations.get_ref().as_ref(),
            NewOperation::completed(
                login,
                OperationKind::Subscription,
                format!("Изменение подписки на {plan}"),
            )
            .with_amount(-charged),
        )
        .await;
    }
    Ok(HttpResponse::Ok().json(json!({ "message": format!("Subscription upgraded to {plan}") })))
}

#[derive(Deserialize)]
pub struct AddBalanceDto {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

#[post("/user/add-balance")]
pub async fn add_balance(
    Json(dto): Json<AddBalanceDto>,
    identity: Identity,
    service: Data<Addr<UserCredentialsService>>,
    operations: Data<Arc<dyn OperationRepository>>,
) -> Response {
    let login = Login(identity.login);
    let balance = service
        .send(access::service::TopUp {
            login: login.clone(),
            amount: dto.amount,
        })
        .await??;
    log::info!("{login} topped up by {}, balance {balance}", dto.amount);
    audit(
        operations.get_ref().as_ref(),
        NewOperation::completed(login, OperationKind::Payment, "Пополнение баланса")
            .with_amount(dto.amount),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("Balance increased by {}₽", dto.amount.normalize())
    })))
}


use crate::access::{
    generate_salt, repository::UserCredentialsRepository, AccountError, Login, Password, Plan,
    UserCredentials,
};
use actix::prelude::*;
use actix::{AtomicResponse, ResponseActFuture};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;
use typesafe_repository::IdentityOf;

/// Owns user credential storage. Every write runs atomically, so a balance
/// or plan change always starts from the stored row.
pub struct UserCredentialsService {
    repo: Arc<dyn UserCredentialsRepository>,
}

impl UserCredentialsService {
    pub fn new(repo: Arc<dyn UserCredentialsRepository>) -> Self {
        Self { repo }
    }
}

impl Actor for UserCredentialsService {
    type Context = Context<Self>;

    fn started(&mut self, _: &mut Self::Context) {
        log::info!("UserCredentialsService started");
    }
}

#[derive(Message)]
#[rtype(result = "Result<Option<UserCredentials>, anyhow::Error>")]
pub struct Get(pub IdentityOf<UserCredentials>);

#[derive(Deserialize, Clone)]
pub struct UserCredentialsDto {
    pub email: String,
    pub password: String,
}

#[derive(Message)]
#[rtype(result = "Result<UserCredentials, anyhow::Error>")]
pub struct Register(pub UserCredentialsDto);

/// Verifies the password and stamps `last_login`.
#[derive(Message)]
#[rtype(result = "Result<UserCredentials, anyhow::Error>")]
pub struct Authenticate(pub UserCredentialsDto);

#[derive(Message)]
#[rtype(result = "Result<Decimal, anyhow::Error>")]
pub struct TopUp {
    pub login: Login,
    pub amount: Decimal,
}

/// Charges the plan price and switches the plan. Resolves to the amount charged.
#[derive(Message)]
#[rtype(result = "Result<Decimal, anyhow::Error>")]
pub struct Upgrade {
    pub login: Login,
    pub plan: Plan,
}

#[derive(Message)]
#[rtype(result = "Result<(), anyhow::Error>")]
pub struct RecordAnalysis(pub Login);

#[derive(Message)]
#[rtype(result = "Result<(), anyhow::Error>")]
pub struct SetPassword {
    pub login: Login,
    pub password: Password,
}

impl UserCredentialsService {
    /// Re-reads the user, applies `f` and saves, without letting another
    /// write in between.
    fn modify<T, F>(&self, login: Login, f: F) -> AtomicResponse<Self, Result<T, anyhow::Error>>
    where
        T: 'static,
        F: FnOnce(&mut UserCredentials) -> Result<T, AccountError> + 'static,
    {
        let repo = self.repo.clone();
        AtomicResponse::new(Box::pin(
            async move {
                let mut user = repo
                    .get_one(&login)
                    .await?
                    .ok_or(AccountError::UnknownUser)?;
                let res = f(&mut user)?;
                repo.save(user).await?;
                Ok(res)
            }
            .into_actor(self),
        ))
    }
}

impl Handler<Get> for UserCredentialsService {
    type Result = ResponseActFuture<Self, Result<Option<UserCredentials>, anyhow::Error>>;

    fn handle(&mut self, Get(id): Get, _: &mut Self::Context) -> Self::Result {
        let repo = self.repo.clone();
        Box::pin(async move { repo.get_one(&id).await }.into_actor(self))
    }
}

impl Handler<Register> for UserCredentialsService {
    type Result = AtomicResponse<Self, Result<UserCredentials, anyhow::Error>>;

    fn handle(
        &mut self,
        Register(UserCredentialsDto { email, password }): Register,
        _: &mut Self::Context,
    ) -> Self::Result {
        let repo = self.repo.clone();
        AtomicResponse::new(Box::pin(
            async move {
                let login = Login::parse(&email)?;
                if repo.get_one(&login).await?.is_some() {
                    return Err(AccountError::LoginTaken.into());
                }
                let password = Password::generate(&password, generate_salt())?;
                let user = UserCredentials::new(login, password, OffsetDateTime::now_utc());
                repo.save(user.clone()).await?;
                log::info!("Registered user {}", user.login);
                Ok(user)
            }
            .into_actor(self),
        ))
    }
}

impl Handler<Authenticate> for UserCredentialsService {
    type Result = AtomicResponse<Self, Result<UserCredentials, anyhow::Error>>;

    fn handle(
        &mut self,
        Authenticate(UserCredentialsDto { email, password }): Authenticate,
        _: &mut Self::Context,
    ) -> Self::Result {
        let repo = self.repo.clone();
        AtomicResponse::new(Box::pin(
            async move {
                let login = Login::parse(&email).map_err(|_| AccountError::InvalidCredentials)?;
                let mut user = match repo.get_one(&login).await? {
                    Some(u) => u,
                    None => {
                        log::info!("Creds not found for {login}");
                        return Err(AccountError::InvalidCredentials.into());
                    }
                };
                if !user.password.check(&password)? {
                    return Err(AccountError::InvalidCredentials.into());
                }
                user.last_login = Some(OffsetDateTime::now_utc());
                repo.save(user.clone()).await?;
                Ok(user)
            }
            .into_actor(self),
        ))
    }
}

impl Handler<TopUp> for UserCredentialsService {
    type Result = AtomicResponse<Self, Result<Decimal, anyhow::Error>>;

    fn handle(&mut self, TopUp { login, amount }: TopUp, _: &mut Self::Context) -> Self::Result {
        self.modify(login, move |user| {
            user.top_up(amount)?;
            Ok(user.balance)
        })
    }
}

impl Handler<Upgrade> for UserCredentialsService {
    type Result = AtomicResponse<Self, Result<Decimal, anyhow::Error>>;

    fn handle(&mut self, Upgrade { login, plan }: Upgrade, _: &mut Self::Context) -> Self::Result {
        self.modify(login, move |user| user.upgrade(plan))
    }
}

impl Handler<RecordAnalysis> for UserCredentialsService {
    type Result = AtomicResponse<Self, Result<(), anyhow::Error>>;

    fn handle(&mut self, RecordAnalysis(login): RecordAnalysis, _: &mut Self::Context) -> Self::Result {
        self.modify(login, |user| {
            user.record_analysis();
            Ok(())
        })
    }
}

impl Handler<SetPassword> for UserCredentialsService {
    type Result = AtomicResponse<Self, Result<(), anyhow::Error>>;

    fn handle(
        &mut self,
        SetPassword { login, password }: SetPassword,
        _: &mut Self::Context,
    ) -> Self::Result {
        self.modify(login, move |user| {
            user.password = password;
            Ok(())
        })
    }
}

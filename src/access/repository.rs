use crate::{conversion_error, SqlWrapper};
use async_trait::async_trait;
use rusqlite::{params, types::Type, OptionalExtension};
use rust_decimal::Decimal;
use std::str::FromStr;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, Save};
use typesafe_repository::{IdentityOf, Repository};
use wb_types::access::repository::UserCredentialsRepository;
use wb_types::access::{Login, Password, Plan, Salt, UserCredentials};

pub struct SqliteUserCredentialsRepository {
    conn: Connection,
}

impl SqliteUserCredentialsRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS web_users (
                    email TEXT PRIMARY KEY,
                    password TEXT NOT NULL,
                    salt BLOB NOT NULL,
                    balance TEXT NOT NULL,
                    subscription TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    last_login INTEGER,
                    total_analyses INTEGER NOT NULL DEFAULT 0
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

impl Repository<UserCredentials> for SqliteUserCredentialsRepository {
    type Error = anyhow::Error;
}

fn timestamp(idx: usize, secs: i64) -> Result<OffsetDateTime, rusqlite::Error> {
    OffsetDateTime::from_unix_timestamp(secs).map_err(|e| conversion_error(idx, Type::Integer, e))
}

impl TryFrom<&rusqlite::Row<'_>> for SqlWrapper<UserCredentials> {
    type Error = rusqlite::Error;

    fn try_from(r: &rusqlite::Row<'_>) -> Result<Self, Self::Error> {
        let salt: Vec<u8> = r.get("salt")?;
        let salt: Salt = salt
            .as_slice()
            .try_into()
            .map_err(|e| conversion_error(2, Type::Blob, e))?;
        let balance: String = r.get("balance")?;
        let subscription: String = r.get("subscription")?;
        let total_analyses: i64 = r.get("total_analyses")?;
        Ok(SqlWrapper(UserCredentials {
            login: Login(r.get("email")?),
            password: Password::new(r.get("password")?, salt),
            balance: Decimal::from_str(&balance).map_err(|e| conversion_error(3, Type::Text, e))?,
            subscription: Plan::from_str(&subscription)
                .map_err(|e| conversion_error(4, Type::Text, e))?,
            created_at: timestamp(5, r.get("created_at")?)?,
            last_login: r
                .get::<_, Option<i64>>("last_login")?
                .map(|t| timestamp(6, t))
                .transpose()?,
            total_analyses: total_analyses.max(0) as u64,
        }))
    }
}

#[async_trait]
impl Get<UserCredentials> for SqliteUserCredentialsRepository {
    async fn get_one(
        &self,
        id: &IdentityOf<UserCredentials>,
    ) -> Result<Option<UserCredentials>, Self::Error> {
        let email = id.0.clone();
        let user = self
            .conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT email, password, salt, balance, subscription, created_at, last_login, total_analyses
                        FROM web_users WHERE email = ?1",
                        params![email],
                        |row| SqlWrapper::<UserCredentials>::from_sql(row),
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl Save<UserCredentials> for SqliteUserCredentialsRepository {
    async fn save(&self, user: UserCredentials) -> Result<(), Self::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO web_users (email, password, salt, balance, subscription, created_at, last_login, total_analyses)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT (email) DO UPDATE SET
                        password = ?2, salt = ?3, balance = ?4, subscription = ?5,
                        last_login = ?7, total_analyses = ?8",
                    params![
                        user.login.0,
                        user.password.password(),
                        &user.password.salt()[..],
                        user.balance.to_string(),
                        user.subscription.to_string(),
                        user.created_at.unix_timestamp(),
                        user.last_login.map(|t| t.unix_timestamp()),
                        user.total_analyses as i64,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl UserCredentialsRepository for SqliteUserCredentialsRepository {}

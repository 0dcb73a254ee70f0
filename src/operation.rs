use async_trait::async_trait;
use derive_more::Display;
use rusqlite::{params, types::Type};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;
use wb_types::access::Login;

use crate::{conversion_error, SqlWrapper};

/// Savings credited per analytics block the user ran, in roubles.
pub const SAVINGS_PER_BLOCK: u64 = 133;
pub const OPERATIONS_PAGE: usize = 50;
pub const RECENT_ACTIVITY: usize = 3;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    #[display("supply_planning")]
    SupplyPlanning,
    #[display("ai_helper")]
    AiHelper,
    #[display("subscription")]
    Subscription,
    #[display("payment")]
    Payment,
}

impl OperationKind {
    /// Kinds that count as a used analytics block.
    pub const BLOCKS: [OperationKind; 2] = [Self::SupplyPlanning, Self::AiHelper];

    pub fn is_block(&self) -> bool {
        Self::BLOCKS.contains(self)
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supply_planning" => Ok(Self::SupplyPlanning),
            "ai_helper" => Ok(Self::AiHelper),
            "subscription" => Ok(Self::Subscription),
            "payment" => Ok(Self::Payment),
            other => Err(format!("Unknown operation type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: i64,
    pub login: Login,
    pub kind: OperationKind,
    pub description: String,
    pub amount: Decimal,
    pub status: OperationStatus,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewOperation {
    pub login: Login,
    pub kind: OperationKind,
    pub description: String,
    pub amount: Decimal,
    pub status: OperationStatus,
    pub created_at: OffsetDateTime,
}

impl NewOperation {
    pub fn completed(login: Login, kind: OperationKind, description: impl Into<String>) -> Self {
        Self {
            login,
            kind,
            description: description.into(),
            amount: Decimal::ZERO,
            status: OperationStatus::Completed,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = amount;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationStats(pub BTreeMap<OperationKind, u64>);

impl OperationStats {
    pub fn count(&self, kind: OperationKind) -> u64 {
        self.0.get(&kind).copied().unwrap_or_default()
    }

    pub fn blocks_used(&self) -> u64 {
        self.0
            .iter()
            .filter(|(kind, _)| kind.is_block())
            .map(|(_, n)| n)
            .sum()
    }

    pub fn total_savings(&self) -> u64 {
        self.blocks_used() * SAVINGS_PER_BLOCK
    }
}

#[async_trait]
pub trait OperationRepository: Send + Sync {
    async fn add(&self, item: NewOperation) -> anyhow::Result<Operation>;
    /// Newest first.
    async fn list_by_user(&self, login: &Login, limit: usize) -> anyhow::Result<Vec<Operation>>;
    async fn recent(
        &self,
        login: &Login,
        kinds: &[OperationKind],
        limit: usize,
    ) -> anyhow::Result<Vec<Operation>>;
    async fn stats(&self, login: &Login) -> anyhow::Result<OperationStats>;
}

pub struct SqliteOperationRepository {
    conn: Connection,
}

impl SqliteOperationRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS user_operations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_email TEXT NOT NULL,
                    type TEXT NOT NULL,
                    description TEXT NOT NULL,
                    amount TEXT NOT NULL DEFAULT '0',
                    status TEXT NOT NULL DEFAULT 'completed',
                    created_at INTEGER NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS user_operations_email
                    ON user_operations (user_email, created_at)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

impl TryFrom<&rusqlite::Row<'_>> for SqlWrapper<Operation> {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row<'_>) -> Result<Self, Self::Error> {
        let kind: String = row.get(2)?;
        let amount: String = row.get(4)?;
        let status: String = row.get(5)?;
        let created_at: i64 = row.get(6)?;
        Ok(SqlWrapper(Operation {
            id: row.get(0)?,
            login: Login(row.get(1)?),
            kind: kind.parse().map_err(|e: String| conversion_error(2, Type::Text, e))?,
            description: row.get(3)?,
            amount: Decimal::from_str(&amount).map_err(|e| conversion_error(4, Type::Text, e))?,
            status: match status.as_str() {
                "failed" => OperationStatus::Failed,
                _ => OperationStatus::Completed,
            },
            created_at: OffsetDateTime::from_unix_timestamp(created_at)
                .map_err(|e| conversion_error(6, Type::Integer, e))?,
        }))
    }
}

const SELECT_OPERATION: &str =
    "SELECT id, user_email, type, description, amount, status, created_at FROM user_operations";

#[async_trait]
impl OperationRepository for SqliteOperationRepository {
    async fn add(&self, item: NewOperation) -> anyhow::Result<Operation> {
        let SqlWrapper(out) = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO user_operations (user_email, type, description, amount, status, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        item.login.0,
                        item.kind.to_string(),
                        item.description,
                        item.amount.to_string(),
                        item.status.as_str(),
                        item.created_at.unix_timestamp(),
                    ],
                )?;
                let id = conn.last_insert_rowid();
                Ok(SqlWrapper(Operation {
                    id,
                    login: item.login,
                    kind: item.kind,
                    description: item.description,
                    amount: item.amount,
                    status: item.status,
                    created_at: item.created_at,
                }))
            })
            .await?;
        Ok(out)
    }

    async fn list_by_user(&self, login: &Login, limit: usize) -> anyhow::Result<Vec<Operation>> {
        let login = login.0.clone();
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_OPERATION} WHERE user_email = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
                ))?;
                let items = stmt
                    .query_map(params![login, limit as i64], |row| {
                        SqlWrapper::<Operation>::from_sql(row)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    async fn recent(
        &self,
        login: &Login,
        kinds: &[OperationKind],
        limit: usize,
    ) -> anyhow::Result<Vec<Operation>> {
        // Filtering in SQL would need a variable-length IN list; the page is small.
        let mut items = self.list_by_user(login, OPERATIONS_PAGE).await?;
        items.retain(|op| kinds.contains(&op.kind));
        items.truncate(limit);
        Ok(items)
    }

    async fn stats(&self, login: &Login) -> anyhow::Result<OperationStats> {
        let login = login.0.clone();
        let SqlWrapper(rows) = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT type, COUNT(*) FROM user_operations WHERE user_email = ?1 GROUP BY type",
                )?;
                let rows = stmt
                    .query_map(params![login], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SqlWrapper(rows))
            })
            .await?;
        let counts = rows
            .into_iter()
            .filter_map(|(kind, n)| match kind.parse::<OperationKind>() {
                Ok(kind) => Some((kind, n.max(0) as u64)),
                Err(err) => {
                    log::warn!("{err}");
                    None
                }
            })
            .collect();
        Ok(OperationStats(counts))
    }
}

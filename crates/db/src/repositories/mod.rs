use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use orderly_core::domain::account::{AccountId, UserId};
use orderly_core::domain::company::{Company, CompanyId};
use orderly_core::domain::order::{NewOrder, Order, OrderId, OrderReceipt};
use orderly_core::domain::product::{Product, ProductId};
use orderly_core::domain::progress::{ProgressEntry, RunId};

pub mod company;
pub mod memory;
pub mod order;
pub mod product;
pub mod progress;

pub use company::SqlCompanyRepository;
pub use memory::{
    InMemoryCompanyRepository, InMemoryOrderRepository, InMemoryProductRepository,
    InMemoryProgressRepository,
};
pub use order::SqlOrderRepository;
pub use product::SqlProductRepository;
pub use progress::SqlProgressRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// A referenced record is missing or belongs to another account.
    #[error("scope violation: {0}")]
    ScopeViolation(String),
    #[error("invariant violation: {0}")]
    Invariant(String),
}

#[async_trait]
pub trait CompanyRepository: Send + Sync {
    /// Companies of the account whose name contains `fragment`, case-insensitively.
    async fn search_by_name(
        &self,
        account_id: &AccountId,
        fragment: &str,
    ) -> Result<Vec<Company>, RepositoryError>;

    async fn find_by_id(
        &self,
        account_id: &AccountId,
        id: &CompanyId,
    ) -> Result<Option<Company>, RepositoryError>;

    async fn save(&self, company: Company) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Active products of the account where the name or SKU contains `term`,
    /// or `term` contains the name or SKU.
    async fn search(
        &self,
        account_id: &AccountId,
        term: &str,
    ) -> Result<Vec<Product>, RepositoryError>;

    async fn find_by_id(
        &self,
        account_id: &AccountId,
        id: &ProductId,
    ) -> Result<Option<Product>, RepositoryError>;

    async fn save(&self, product: Product) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Writes the header and every line item atomically.
    ///
    /// The company and every product must belong to `order.account_id`; otherwise
    /// nothing is persisted.
    async fn create(&self, order: NewOrder) -> Result<OrderReceipt, RepositoryError>;

    async fn find_by_id(
        &self,
        account_id: &AccountId,
        id: &OrderId,
    ) -> Result<Option<Order>, RepositoryError>;

    async fn count_for_account(&self, account_id: &AccountId) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    async fn append(&self, entry: ProgressEntry) -> Result<(), RepositoryError>;

    async fn latest_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Option<ProgressEntry>, RepositoryError>;

    /// Oldest first.
    async fn list_for_run(&self, run_id: &RunId) -> Result<Vec<ProgressEntry>, RepositoryError>;

    async fn latest_for_user_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Option<ProgressEntry>, RepositoryError>;
}

pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

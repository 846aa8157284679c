pub mod config;
pub mod domain;
pub mod errors;
pub mod resolution;

pub use domain::account::{AccountId, UserId};
pub use domain::company::{Company, CompanyId};
pub use domain::order::{
    NewOrder, NewOrderItem, Order, OrderId, OrderItem, OrderItemId, OrderNumber, OrderReceipt,
    OrderStatus,
};
pub use domain::product::{Product, ProductId};
pub use domain::progress::{ProgressEntry, ProgressEntryId, RunId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use resolution::{FirstMatchRanker, MatchCandidate, MatchTier, RankedMatch, Ranker, TieredRanker};

pub use chrono;
pub use rust_decimal;

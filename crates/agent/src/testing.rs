//! Shared fixtures for unit tests. Mirrors `config/fixtures/demo_seed.sql`
//! row for row, in the same insertion order.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use orderly_core::domain::account::{AccountId, UserId};
use orderly_core::domain::company::{Company, CompanyId};
use orderly_core::domain::product::{Product, ProductId};
use orderly_core::domain::progress::RunId;
use orderly_core::TieredRanker;
use orderly_db::repositories::{
    CompanyRepository, InMemoryCompanyRepository, InMemoryOrderRepository,
    InMemoryProductRepository, ProductRepository,
};

use crate::message::RunState;
use crate::resolver::EntityResolver;
use crate::tools::ActionDispatcher;
use crate::writer::OrderWriter;

pub(crate) fn demo_account() -> AccountId {
    AccountId("acct-demo".to_string())
}

pub(crate) fn demo_state() -> RunState {
    RunState::new(RunId("run-test".to_string()), demo_account(), UserId("user-ops".to_string()))
}

pub(crate) async fn demo_catalog() -> (Arc<InMemoryCompanyRepository>, Arc<InMemoryProductRepository>) {
    let companies = Arc::new(InMemoryCompanyRepository::default());
    let products = Arc::new(InMemoryProductRepository::default());

    for (id, account, name) in [
        ("co-luxe-001", "acct-demo", "Luxe Beauty Gallery"),
        ("co-acme-001", "acct-demo", "Acme Corp"),
        ("co-acme-002", "acct-demo", "Acme Distribution"),
        ("co-north-001", "acct-other", "Northwind Traders"),
    ] {
        companies
            .save(Company {
                id: CompanyId(id.to_string()),
                account_id: AccountId(account.to_string()),
                name: name.to_string(),
                created_at: Utc::now(),
            })
            .await
            .expect("seed company");
    }

    for (id, account, sku, name, cents, active) in [
        ("prod-sk001", "acct-demo", "SK001", "Hydrating Toner", 1250, true),
        ("prod-serum", "acct-demo", "SK002", "Anti-aging Serum", 3990, true),
        ("prod-cream", "acct-demo", "SK003", "Night Cream", 2400, true),
        ("prod-retired", "acct-demo", "SK099", "Vitamin C Serum (retired)", 1900, false),
        ("prod-north-tea", "acct-other", "NW001", "Chai Tea", 475, true),
    ] {
        products
            .save(Product {
                id: ProductId(id.to_string()),
                account_id: AccountId(account.to_string()),
                sku: sku.to_string(),
                name: name.to_string(),
                unit_price: Decimal::new(cents, 2),
                active,
            })
            .await
            .expect("seed product");
    }

    (companies, products)
}

pub(crate) async fn demo_dispatcher() -> (ActionDispatcher, Arc<InMemoryOrderRepository>) {
    let (companies, products) = demo_catalog().await;
    let orders = Arc::new(InMemoryOrderRepository::new(companies.clone(), products.clone()));
    let resolver = EntityResolver::new(companies, products, Arc::new(TieredRanker));
    (ActionDispatcher::new(resolver, OrderWriter::new(orders.clone())), orders)
}

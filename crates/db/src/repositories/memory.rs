use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use orderly_core::domain::account::{AccountId, UserId};
use orderly_core::domain::company::{Company, CompanyId};
use orderly_core::domain::order::{
    line_total, NewOrder, Order, OrderId, OrderItem, OrderItemId, OrderNumber, OrderReceipt,
    OrderStatus,
};
use orderly_core::domain::product::{Product, ProductId};
use orderly_core::domain::progress::{ProgressEntry, RunId};

use super::{
    CompanyRepository, OrderRepository, ProductRepository, ProgressRepository, RepositoryError,
};

/// Insertion order is kept so searches return rows the way a table scan would.
#[derive(Default)]
pub struct InMemoryCompanyRepository {
    companies: RwLock<Vec<Company>>,
}

#[async_trait::async_trait]
impl CompanyRepository for InMemoryCompanyRepository {
    async fn search_by_name(
        &self,
        account_id: &AccountId,
        fragment: &str,
    ) -> Result<Vec<Company>, RepositoryError> {
        let fragment = fragment.trim().to_lowercase();
        if fragment.is_empty() {
            return Ok(Vec::new());
        }

        let companies = self.companies.read().await;
        Ok(companies
            .iter()
            .filter(|company| &company.account_id == account_id)
            .filter(|company| company.name.to_lowercase().contains(&fragment))
            .cloned()
            .collect())
    }

    async fn find_by_id(
        &self,
        account_id: &AccountId,
        id: &CompanyId,
    ) -> Result<Option<Company>, RepositoryError> {
        let companies = self.companies.read().await;
        Ok(companies
            .iter()
            .find(|company| &company.id == id && &company.account_id == account_id)
            .cloned())
    }

    async fn save(&self, company: Company) -> Result<(), RepositoryError> {
        let mut companies = self.companies.write().await;
        match companies.iter_mut().find(|existing| existing.id == company.id) {
            Some(existing) => *existing = company,
            None => companies.push(company),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProductRepository {
    products: RwLock<Vec<Product>>,
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn search(
        &self,
        account_id: &AccountId,
        term: &str,
    ) -> Result<Vec<Product>, RepositoryError> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let products = self.products.read().await;
        Ok(products
            .iter()
            .filter(|product| &product.account_id == account_id && product.active)
            .filter(|product| {
                let name = product.name.to_lowercase();
                let sku = product.sku.to_lowercase();
                name.contains(&term)
                    || sku.contains(&term)
                    || term.contains(&name)
                    || term.contains(&sku)
            })
            .cloned()
            .collect())
    }

    async fn find_by_id(
        &self,
        account_id: &AccountId,
        id: &ProductId,
    ) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products
            .iter()
            .find(|product| &product.id == id && &product.account_id == account_id)
            .cloned())
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        match products.iter_mut().find(|existing| existing.id == product.id) {
            Some(existing) => *existing = product,
            None => products.push(product),
        }
        Ok(())
    }
}

/// Validates scope against the shared catalog repositories before committing
/// the aggregate under a single write lock.
pub struct InMemoryOrderRepository {
    companies: Arc<InMemoryCompanyRepository>,
    products: Arc<InMemoryProductRepository>,
    orders: RwLock<HashMap<String, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new(
        companies: Arc<InMemoryCompanyRepository>,
        products: Arc<InMemoryProductRepository>,
    ) -> Self {
        Self { companies, products, orders: RwLock::new(HashMap::new()) }
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: NewOrder) -> Result<OrderReceipt, RepositoryError> {
        order.validate().map_err(|error| RepositoryError::Invariant(error.to_string()))?;

        if self.companies.find_by_id(&order.account_id, &order.company_id).await?.is_none() {
            return Err(RepositoryError::ScopeViolation(format!(
                "company {} does not belong to account {}",
                order.company_id.0, order.account_id
            )));
        }

        let order_id = OrderId(Uuid::new_v4().to_string());
        let mut items = Vec::with_capacity(order.items.len());
        let mut total_amount = Decimal::ZERO;
        for item in &order.items {
            let product = self
                .products
                .find_by_id(&order.account_id, &item.product_id)
                .await?
                .filter(|product| product.active)
                .ok_or_else(|| {
                    RepositoryError::ScopeViolation(format!(
                        "product {} is not an active product of account {}",
                        item.product_id.0, order.account_id
                    ))
                })?;
            let total = line_total(product.unit_price, item.quantity);
            total_amount += total;
            items.push(OrderItem {
                id: OrderItemId(Uuid::new_v4().to_string()),
                order_id: order_id.clone(),
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                unit_price: product.unit_price,
                line_total: total,
            });
        }

        let mut orders = self.orders.write().await;
        let sequence =
            orders.values().filter(|existing| existing.account_id == order.account_id).count()
                as i64
                + 1;
        let order_number = OrderNumber::from_sequence(sequence);
        let item_count = items.len();

        orders.insert(
            order_id.0.clone(),
            Order {
                id: order_id.clone(),
                account_id: order.account_id,
                company_id: order.company_id.clone(),
                order_number: order_number.clone(),
                status: OrderStatus::INITIAL,
                total_amount,
                created_by: order.created_by,
                run_id: order.run_id,
                items,
                created_at: Utc::now(),
            },
        );

        Ok(OrderReceipt {
            order_id,
            order_number,
            company_id: order.company_id,
            item_count,
            total_amount,
        })
    }

    async fn find_by_id(
        &self,
        account_id: &AccountId,
        id: &OrderId,
    ) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id.0).filter(|order| &order.account_id == account_id).cloned())
    }

    async fn count_for_account(&self, account_id: &AccountId) -> Result<u64, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.values().filter(|order| &order.account_id == account_id).count() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryProgressRepository {
    entries: RwLock<Vec<ProgressEntry>>,
}

impl InMemoryProgressRepository {
    /// Entries in append order, regardless of timestamps.
    pub async fn snapshot(&self) -> Vec<ProgressEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait::async_trait]
impl ProgressRepository for InMemoryProgressRepository {
    async fn append(&self, entry: ProgressEntry) -> Result<(), RepositoryError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn latest_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Option<ProgressEntry>, RepositoryError> {
        Ok(self.list_for_run(run_id).await?.pop())
    }

    async fn list_for_run(&self, run_id: &RunId) -> Result<Vec<ProgressEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<ProgressEntry> =
            entries.iter().filter(|entry| &entry.run_id == run_id).cloned().collect();
        // Stable sort keeps append order for identical timestamps.
        matching.sort_by_key(|entry| entry.created_at);
        Ok(matching)
    }

    async fn latest_for_user_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Option<ProgressEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| &entry.user_id == user_id && entry.created_at > since)
            .max_by_key(|(position, entry)| (entry.created_at, *position))
            .map(|(_, entry)| entry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use orderly_core::domain::account::{AccountId, UserId};
    use orderly_core::domain::company::{Company, CompanyId};
    use orderly_core::domain::order::{NewOrder, NewOrderItem};
    use orderly_core::domain::product::{Product, ProductId};
    use orderly_core::domain::progress::{ProgressEntry, RunId};

    use crate::repositories::{
        CompanyRepository, InMemoryCompanyRepository, InMemoryOrderRepository,
        InMemoryProductRepository, InMemoryProgressRepository, OrderRepository, ProductRepository,
        ProgressRepository, RepositoryError,
    };

    fn account() -> AccountId {
        AccountId("acct-1".to_string())
    }

    async fn catalog() -> (Arc<InMemoryCompanyRepository>, Arc<InMemoryProductRepository>) {
        let companies = Arc::new(InMemoryCompanyRepository::default());
        let products = Arc::new(InMemoryProductRepository::default());
        companies
            .save(Company {
                id: CompanyId("co-1".to_string()),
                account_id: account(),
                name: "Luxe Beauty Gallery".to_string(),
                created_at: Utc::now(),
            })
            .await
            .expect("save company");
        products
            .save(Product {
                id: ProductId("p-1".to_string()),
                account_id: account(),
                sku: "SK001".to_string(),
                name: "Hydrating Toner".to_string(),
                unit_price: Decimal::new(1250, 2),
                active: true,
            })
            .await
            .expect("save product");
        (companies, products)
    }

    #[tokio::test]
    async fn in_memory_search_matches_sku_inside_sentence() {
        let (_, products) = catalog().await;

        let found = products.search(&account(), "300 units of sk001").await.expect("search");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.0, "p-1");
    }

    #[tokio::test]
    async fn in_memory_order_repo_prices_lines_and_numbers_orders() {
        let (companies, products) = catalog().await;
        let repo = InMemoryOrderRepository::new(companies, products);

        let receipt = repo
            .create(NewOrder {
                account_id: account(),
                company_id: CompanyId("co-1".to_string()),
                created_by: UserId("user-1".to_string()),
                run_id: None,
                items: vec![NewOrderItem { product_id: ProductId("p-1".to_string()), quantity: 4 }],
            })
            .await
            .expect("create");

        assert_eq!(receipt.order_number.0, "ORD-00001");
        assert_eq!(receipt.total_amount, Decimal::new(5000, 2));
        let stored = repo.find_by_id(&account(), &receipt.order_id).await.expect("find");
        assert_eq!(stored.map(|order| order.items.len()), Some(1));
    }

    #[tokio::test]
    async fn in_memory_order_repo_rejects_unknown_product_without_writing() {
        let (companies, products) = catalog().await;
        let repo = InMemoryOrderRepository::new(companies, products);

        let error = repo
            .create(NewOrder {
                account_id: account(),
                company_id: CompanyId("co-1".to_string()),
                created_by: UserId("user-1".to_string()),
                run_id: None,
                items: vec![NewOrderItem {
                    product_id: ProductId("missing".to_string()),
                    quantity: 1,
                }],
            })
            .await
            .expect_err("unknown product");

        assert!(matches!(error, RepositoryError::ScopeViolation(_)));
        assert_eq!(repo.count_for_account(&account()).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn in_memory_progress_repo_keeps_runs_apart() {
        let repo = InMemoryProgressRepository::default();
        let user = UserId("user-1".to_string());
        let run_a = RunId("run-a".to_string());
        let run_b = RunId("run-b".to_string());

        repo.append(ProgressEntry::new(run_a.clone(), user.clone(), "Resolving the customer"))
            .await
            .expect("append");
        repo.append(ProgressEntry::new(run_b.clone(), user.clone(), "Finished"))
            .await
            .expect("append");

        let latest_a = repo.latest_for_run(&run_a).await.expect("latest");
        assert_eq!(latest_a.map(|entry| entry.content), Some("Resolving the customer".to_string()));
        assert_eq!(repo.list_for_run(&run_b).await.expect("list").len(), 1);
    }
}

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_COMPANY_IDS: &[&str] = &["co-luxe-001", "co-acme-001", "co-acme-002", "co-north-001"];

const SEED_PRODUCT_IDS: &[&str] =
    &["prod-sk001", "prod-serum", "prod-cream", "prod-retired", "prod-north-tea"];

/// Demo catalog used by `orderly seed`, the doctor command and the end-to-end tests.
///
/// Two tenants: `acct-demo` holds the companies and products the walkthrough
/// prompts refer to, `acct-other` exists so cross-tenant requests have something
/// to miss.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");
    pub const ACCOUNT_ID: &str = "acct-demo";

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        sqlx::raw_sql(Self::SQL).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(SeedResult {
            companies_seeded: SEED_COMPANY_IDS.len(),
            products_seeded: SEED_PRODUCT_IDS.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for company_id in SEED_COMPANY_IDS {
            let exists: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM companies WHERE id = ?1)")
                    .bind(*company_id)
                    .fetch_one(pool)
                    .await?;
            checks.push((*company_id, exists == 1));
        }

        for product_id in SEED_PRODUCT_IDS {
            let exists: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE id = ?1)")
                    .bind(*product_id)
                    .fetch_one(pool)
                    .await?;
            checks.push((*product_id, exists == 1));
        }

        let retired_inactive: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM products WHERE id = 'prod-retired' AND active = 0)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("retired-product-inactive", retired_inactive == 1));

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes seeded catalog rows together with any orders placed against them.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_companies = sql_array_from_ids(SEED_COMPANY_IDS);
        let quoted_products = sql_array_from_ids(SEED_PRODUCT_IDS);

        sqlx::query(&format!(
            "DELETE FROM order_items WHERE order_id IN
                (SELECT id FROM orders WHERE company_id IN {quoted_companies})"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DELETE FROM orders WHERE company_id IN {quoted_companies}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM products WHERE id IN {quoted_products}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM companies WHERE id IN {quoted_companies}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub companies_seeded: usize,
    pub products_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(DemoSeedDataset::SQL.contains("Luxe Beauty Gallery"));
    }

    #[tokio::test]
    async fn seed_is_idempotent_and_verifiable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        let first = DemoSeedDataset::load(&pool).await.expect("load seed fixtures");
        let first_verification = DemoSeedDataset::verify(&pool).await.expect("verify seed");
        assert!(first_verification.all_present);
        assert_eq!(first.companies_seeded, 4);

        DemoSeedDataset::load(&pool).await.expect("reload seed fixtures");
        let second_verification = DemoSeedDataset::verify(&pool).await.expect("re-verify seed");
        assert!(second_verification.all_present);
        assert_eq!(first_verification.checks, second_verification.checks);

        let company_count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM companies")
            .fetch_one(&pool)
            .await
            .expect("count companies");
        assert_eq!(company_count, 4);
    }

    #[tokio::test]
    async fn clean_removes_seeded_rows() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        DemoSeedDataset::load(&pool).await.expect("load seed fixtures");
        DemoSeedDataset::clean(&pool).await.expect("clean seed fixtures");

        let verification = DemoSeedDataset::verify(&pool).await.expect("verify after clean");
        assert!(!verification.all_present);
    }
}

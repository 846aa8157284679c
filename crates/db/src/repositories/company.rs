use sqlx::{sqlite::SqliteRow, Row};

use orderly_core::domain::account::AccountId;
use orderly_core::domain::company::{Company, CompanyId};

use super::{format_timestamp, parse_timestamp, CompanyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCompanyRepository {
    pool: DbPool,
}

impl SqlCompanyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CompanyRepository for SqlCompanyRepository {
    async fn search_by_name(
        &self,
        account_id: &AccountId,
        fragment: &str,
    ) -> Result<Vec<Company>, RepositoryError> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, account_id, name, created_at
             FROM companies
             WHERE account_id = ? AND instr(lower(name), lower(?)) > 0
             ORDER BY created_at ASC, id ASC",
        )
        .bind(account_id.as_str())
        .bind(fragment)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(company_from_row).collect()
    }

    async fn find_by_id(
        &self,
        account_id: &AccountId,
        id: &CompanyId,
    ) -> Result<Option<Company>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, account_id, name, created_at
             FROM companies
             WHERE id = ? AND account_id = ?",
        )
        .bind(&id.0)
        .bind(account_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(company_from_row).transpose()
    }

    async fn save(&self, company: Company) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO companies (id, account_id, name, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name",
        )
        .bind(&company.id.0)
        .bind(company.account_id.as_str())
        .bind(&company.name)
        .bind(format_timestamp(&company.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn company_from_row(row: SqliteRow) -> Result<Company, RepositoryError> {
    Ok(Company {
        id: CompanyId(row.try_get("id")?),
        account_id: AccountId(row.try_get("account_id")?),
        name: row.try_get("name")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

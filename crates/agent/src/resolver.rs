use std::sync::Arc;

use orderly_core::domain::account::AccountId;
use orderly_core::domain::company::Company;
use orderly_core::domain::product::ProductId;
use orderly_core::resolution::{best_match, MatchTier, Ranker};
use orderly_db::repositories::{CompanyRepository, ProductRepository};

use crate::errors::AgentError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductRequest {
    pub name: String,
    /// Defaults to 1 when the operator gave no quantity.
    pub quantity: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedCompany {
    pub company: Company,
    pub tier: MatchTier,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedProduct {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub tier: MatchTier,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedProduct {
    pub name: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductResolution {
    pub resolved: Vec<ResolvedProduct>,
    pub unresolved: Vec<UnresolvedProduct>,
}

/// Read-only lookups from free text to catalog ids, always inside one account.
pub struct EntityResolver {
    companies: Arc<dyn CompanyRepository>,
    products: Arc<dyn ProductRepository>,
    ranker: Arc<dyn Ranker>,
}

impl EntityResolver {
    pub fn new(
        companies: Arc<dyn CompanyRepository>,
        products: Arc<dyn ProductRepository>,
        ranker: Arc<dyn Ranker>,
    ) -> Self {
        Self { companies, products, ranker }
    }

    pub fn ranker_name(&self) -> &'static str {
        self.ranker.name()
    }

    /// `Ok(None)` when nothing in the account matches; a miss is not an error.
    pub async fn resolve_company(
        &self,
        account_id: &AccountId,
        company_name: &str,
    ) -> Result<Option<ResolvedCompany>, AgentError> {
        let query = collapse_whitespace(company_name);
        if query.is_empty() {
            return Ok(None);
        }

        let candidates = self.companies.search_by_name(account_id, &query).await?;
        Ok(best_match(self.ranker.as_ref(), &query, &candidates, MatchTier::Substring)
            .map(|(company, tier)| ResolvedCompany { company: company.clone(), tier }))
    }

    /// Never fails on partial resolution: every request lands in exactly one of
    /// `resolved` or `unresolved`, in request order.
    pub async fn resolve_products(
        &self,
        account_id: &AccountId,
        requests: &[ProductRequest],
    ) -> Result<ProductResolution, AgentError> {
        let mut resolution = ProductResolution::default();

        for request in requests {
            let query = collapse_whitespace(&request.name);
            let quantity = request.quantity.unwrap_or(1);

            if query.is_empty() {
                resolution.unresolved.push(UnresolvedProduct {
                    name: request.name.clone(),
                    reason: "no product name given".to_string(),
                });
                continue;
            }
            if quantity == 0 {
                resolution.unresolved.push(UnresolvedProduct {
                    name: request.name.clone(),
                    reason: "quantity must be at least 1".to_string(),
                });
                continue;
            }

            let candidates = self.products.search(account_id, &query).await?;
            match best_match(self.ranker.as_ref(), &query, &candidates, MatchTier::Contained) {
                Some((product, tier)) => resolution.resolved.push(ResolvedProduct {
                    product_id: product.id.clone(),
                    product_name: product.name.clone(),
                    quantity,
                    tier,
                }),
                None => resolution.unresolved.push(UnresolvedProduct {
                    name: request.name.clone(),
                    reason: "no matching product".to_string(),
                }),
            }
        }

        Ok(resolution)
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

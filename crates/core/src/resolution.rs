//! Name-matching policy used when free text has to be mapped onto catalog records.
//!
//! A [`Ranker`] sees the query and every candidate the store returned and picks
//! one. Store order never decides the winner under [`TieredRanker`]; the tier of
//! the match does, then the length of the matched name, then the id.

use serde::{Deserialize, Serialize};

use crate::domain::company::Company;
use crate::domain::product::Product;

/// How strongly a candidate name matched a query, strongest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Prefix,
    /// Candidate name contains the query.
    Substring,
    /// Query contains the candidate name ("300 units of SK001" vs "SK001").
    Contained,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
            Self::Substring => "substring",
            Self::Contained => "contained",
        }
    }
}

pub trait MatchCandidate {
    fn candidate_id(&self) -> &str;
    /// Names the query may match against. The first entry is the display name.
    fn candidate_names(&self) -> Vec<&str>;
}

impl MatchCandidate for Company {
    fn candidate_id(&self) -> &str {
        &self.id.0
    }

    fn candidate_names(&self) -> Vec<&str> {
        vec![self.name.as_str()]
    }
}

impl MatchCandidate for Product {
    fn candidate_id(&self) -> &str {
        &self.id.0
    }

    fn candidate_names(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.sku.as_str()]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RankedMatch {
    pub index: usize,
    pub tier: MatchTier,
}

pub trait Ranker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Picks the winning candidate among those matching at `weakest` or better.
    fn pick(
        &self,
        query: &str,
        candidates: &[&dyn MatchCandidate],
        weakest: MatchTier,
    ) -> Option<RankedMatch>;
}

/// Match tier for a single name, or `None` if the two strings are unrelated.
pub fn tier_for(query: &str, name: &str) -> Option<MatchTier> {
    let query = normalize(query);
    let name = normalize(name);
    if query.is_empty() || name.is_empty() {
        return None;
    }

    if name == query {
        Some(MatchTier::Exact)
    } else if name.starts_with(&query) {
        Some(MatchTier::Prefix)
    } else if name.contains(&query) {
        Some(MatchTier::Substring)
    } else if query.contains(&name) {
        Some(MatchTier::Contained)
    } else {
        None
    }
}

fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Best tier across all names of a candidate, with the length of the name that produced it.
fn best_tier(query: &str, candidate: &dyn MatchCandidate) -> Option<(MatchTier, usize)> {
    candidate
        .candidate_names()
        .into_iter()
        .filter_map(|name| tier_for(query, name).map(|tier| (tier, name.chars().count())))
        .min()
}

/// Exact > prefix > substring > contained, then shorter name, then smaller id.
#[derive(Clone, Copy, Debug, Default)]
pub struct TieredRanker;

impl Ranker for TieredRanker {
    fn name(&self) -> &'static str {
        "tiered"
    }

    fn pick(
        &self,
        query: &str,
        candidates: &[&dyn MatchCandidate],
        weakest: MatchTier,
    ) -> Option<RankedMatch> {
        candidates
            .iter()
            .enumerate()
            .filter_map(|(index, candidate)| {
                let (tier, name_len) = best_tier(query, *candidate)?;
                (tier <= weakest).then_some((index, tier, name_len, candidate.candidate_id()))
            })
            .min_by(|left, right| {
                left.1
                    .cmp(&right.1)
                    .then(left.2.cmp(&right.2))
                    .then_with(|| left.3.cmp(&right.3))
            })
            .map(|(index, tier, _, _)| RankedMatch { index, tier })
    }
}

/// First acceptable candidate in the order the store returned them.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstMatchRanker;

impl Ranker for FirstMatchRanker {
    fn name(&self) -> &'static str {
        "first_match"
    }

    fn pick(
        &self,
        query: &str,
        candidates: &[&dyn MatchCandidate],
        weakest: MatchTier,
    ) -> Option<RankedMatch> {
        candidates.iter().enumerate().find_map(|(index, candidate)| {
            let (tier, _) = best_tier(query, *candidate)?;
            (tier <= weakest).then_some(RankedMatch { index, tier })
        })
    }
}

/// Typed wrapper around [`Ranker::pick`].
pub fn best_match<'a, T: MatchCandidate>(
    ranker: &dyn Ranker,
    query: &str,
    candidates: &'a [T],
    weakest: MatchTier,
) -> Option<(&'a T, MatchTier)> {
    let erased: Vec<&dyn MatchCandidate> =
        candidates.iter().map(|candidate| candidate as &dyn MatchCandidate).collect();
    let ranked = ranker.pick(query, &erased, weakest)?;
    candidates.get(ranked.index).map(|candidate| (candidate, ranked.tier))
}

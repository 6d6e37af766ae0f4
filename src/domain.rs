use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub type TaxonId = u64;

pub const ACCEPTED: &str = "accepted";

/// Inclusive ranks sort first, so `rank < Rank::Genus` reads as "above
/// genus".
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    #[default]
    Unranked,
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl Rank {
    pub const ALL: [Rank; 8] = [
        Rank::Unranked,
        Rank::Kingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Unranked => "unranked",
            Rank::Kingdom => "kingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
        }
    }

    /// Unknown rank names (subspecies, variety, ...) are `Unranked`.
    pub fn parse_lenient(value: &str) -> Rank {
        value.parse().unwrap_or(Rank::Unranked)
    }

    pub fn is_ranked(&self) -> bool {
        *self != Rank::Unranked
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Rank::ALL
            .into_iter()
            .find(|rank| rank.as_str() == normalized)
            .ok_or_else(|| KiraError::InvalidRank(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxon {
    pub name: String,
    pub author: String,
    pub id: TaxonId,
    pub rank: Rank,
    pub status: String,
    pub parent: Option<TaxonId>,
}

impl Taxon {
    pub fn is_accepted(&self) -> bool {
        self.status == ACCEPTED
    }
}

pub fn canon(name: &str) -> String {
    let joined = normalize_spaces(name).to_lowercase();
    let mut chars = joined.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    // Multi-char upper forms (ß -> SS) would not survive a second pass.
    let mut upper = first.to_uppercase();
    let head = match (upper.next(), upper.next()) {
        (Some(single), None) => single,
        _ => first,
    };
    std::iter::once(head).chain(chars).collect()
}

pub fn normalize_spaces(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_status(value: &str) -> String {
    value.trim().to_lowercase()
}

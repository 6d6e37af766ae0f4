use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info};

use crate::domain::{ACCEPTED, Rank, TaxonId, canon};
use crate::error::KiraError;
use crate::gbif::{GbifClient, Species};
use crate::taxonomy::Taxonomy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Empty,
    Pick(usize),
    Ambiguous,
}

/// The only candidate, or the only accepted one among several.
pub fn classify(candidates: &[Species]) -> Selection {
    match candidates {
        [] => Selection::Empty,
        [_] => Selection::Pick(0),
        _ => {
            let mut accepted = candidates
                .iter()
                .enumerate()
                .filter(|(_, species)| species.status() == ACCEPTED)
                .map(|(index, _)| index);
            match (accepted.next(), accepted.next()) {
                (Some(index), None) => Selection::Pick(index),
                _ => Selection::Ambiguous,
            }
        }
    }
}

pub fn is_terminal(record: &Species, max_rank: Rank) -> bool {
    let rank = record.taxon_rank();
    record.status() == ACCEPTED && rank.is_ranked() && rank <= max_rank
}

pub struct Resolver<C: GbifClient> {
    client: C,
}

impl<C: GbifClient> Resolver<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn add_from_gbif(
        &self,
        tax: &mut Taxonomy,
        id: TaxonId,
        max_rank: Rank,
    ) -> Result<(), KiraError> {
        if id == 0 || tax.contains(id) {
            return Ok(());
        }
        let record = self.client.fetch_by_id(id)?;
        let chain = self.walk(tax, id, record, max_rank)?;
        self.commit(tax, id, &chain);
        Ok(())
    }

    pub fn add_name_from_gbif(
        &self,
        tax: &mut Taxonomy,
        name: &str,
        max_rank: Rank,
    ) -> Result<(), KiraError> {
        let name = canon(name);
        if name.is_empty() {
            return Ok(());
        }
        let mut candidates = self.client.fetch_by_name(&name)?;
        let record = match classify(&candidates) {
            Selection::Empty => return Ok(()),
            Selection::Pick(index) => candidates.swap_remove(index),
            Selection::Ambiguous => {
                return Err(KiraError::AmbiguousName {
                    name,
                    ids: candidates.iter().map(Species::id).collect(),
                });
            }
        };

        let id = record.id();
        if id == 0 || tax.contains(id) {
            return Ok(());
        }
        let chain = self.walk(tax, id, record, max_rank)?;
        self.commit(tax, id, &chain);
        Ok(())
    }

    pub fn fill(&self, tax: &mut Taxonomy, rank: Rank) -> Result<usize, KiraError> {
        let mut pending: BTreeSet<TaxonId> = tax.ids().into_iter().collect();
        let mut done = HashSet::new();
        let mut inserted = 0;
        while let Some(id) = pending.pop_first() {
            if !done.insert(id) {
                continue;
            }
            let taxon_rank = tax.rank(id);
            if !taxon_rank.is_ranked() || taxon_rank < rank {
                continue;
            }

            let mut records = self.client.fetch_children(id)?;
            records.extend(self.client.fetch_synonyms(id)?);
            for record in &records {
                let child = record.id();
                if child == 0 || done.contains(&child) {
                    continue;
                }
                if tax.add_species(record) {
                    inserted += 1;
                }
                if tax.contains(child) {
                    pending.insert(child);
                }
            }
        }
        info!(inserted, rank = %rank, "resolve.fill");
        Ok(inserted)
    }

    pub fn match_id(
        &self,
        tax: &mut Taxonomy,
        id: TaxonId,
        unmatched: &mut HashSet<TaxonId>,
    ) -> Result<bool, KiraError> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = id;
        loop {
            if current == 0 || unmatched.contains(&current) || !visited.insert(current) {
                break;
            }
            if tax.contains(current) {
                self.commit(tax, id, &chain);
                return Ok(true);
            }
            let record = self.client.fetch_by_id(current)?;
            let terminal = is_terminal(&record, Rank::Species);
            let next = record.next_key();
            chain.push(record);
            if terminal {
                break;
            }
            current = next.unwrap_or(0);
        }

        unmatched.insert(id);
        for record in &chain {
            unmatched.insert(record.key);
            if record.nub_key != 0 {
                unmatched.insert(record.nub_key);
            }
        }
        Ok(false)
    }

    fn walk(
        &self,
        tax: &Taxonomy,
        start: TaxonId,
        first: Species,
        max_rank: Rank,
    ) -> Result<Vec<Species>, KiraError> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([start, first.id()]);
        let mut record = first;
        loop {
            if record.name().is_empty() {
                debug!(key = record.key, "resolve.nameless_record");
                break;
            }
            let terminal = is_terminal(&record, max_rank);
            let next = record.next_key();
            chain.push(record);
            if terminal {
                break;
            }
            let Some(next) = next else {
                break;
            };
            if tax.contains(next) || !visited.insert(next) {
                break;
            }
            record = self.client.fetch_by_id(next)?;
            visited.insert(record.id());
        }
        Ok(chain)
    }

    // Oldest ancestor first, and only once the whole walk succeeded.
    fn commit(&self, tax: &mut Taxonomy, start: TaxonId, chain: &[Species]) -> usize {
        let inserted = chain
            .iter()
            .rev()
            .filter(|record| tax.add_species(record))
            .count();
        info!(id = start, inserted, "resolve.chain");
        inserted
    }
}

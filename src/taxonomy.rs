use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;

use tracing::warn;

use crate::domain::{Rank, Taxon, TaxonId, canon, normalize_spaces, normalize_status};
use crate::error::KiraError;
use crate::gbif::Species;

pub const MAX_DEPTH: usize = 20;

pub const HEADER: [&str; 6] = ["name", "author", "taxonKey", "rank", "status", "parent"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneMode {
    /// Keep the listed taxa with their ancestors and descendants.
    Keep,
    /// Delete the listed taxa with their descendants.
    Delete,
}

#[derive(Debug, Clone)]
struct Node {
    data: Taxon,
    children: BTreeSet<TaxonId>,
}

/// A node is a root when it has no parent or its parent is not in the
/// taxonomy; otherwise it sits in the children set of its parent.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    nodes: HashMap<TaxonId, Node>,
    roots: BTreeSet<TaxonId>,
    names: HashMap<String, BTreeSet<TaxonId>>,
}

impl Taxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: TaxonId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<TaxonId> {
        let mut ids: Vec<_> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn read<R: io::Read>(reader: R) -> Result<Self, KiraError> {
        let mut table = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .has_headers(true)
            .from_reader(reader);

        let headers = table
            .headers()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut fields = HashMap::new();
        for (index, header) in headers.iter().enumerate() {
            fields.insert(header.trim().to_lowercase(), index);
        }
        let mut columns = [0usize; HEADER.len()];
        for (slot, column) in columns.iter_mut().zip(HEADER) {
            *slot = *fields
                .get(&column.to_lowercase())
                .ok_or_else(|| KiraError::MalformedHeader {
                    column: column.to_string(),
                })?;
        }
        let [name_col, author_col, id_col, rank_col, status_col, parent_col] = columns;

        // Rows may reference parents that appear later in the table.
        let mut taxonomy = Taxonomy::new();
        let mut order = Vec::new();
        for row in table.records() {
            let row = row.map_err(|err| KiraError::MalformedRow {
                line: err.position().map(|pos| pos.line()).unwrap_or(0),
                field: "record".to_string(),
                value: err.to_string(),
            })?;
            let line = row.position().map(|pos| pos.line()).unwrap_or(0);
            let field = |index: usize| row.get(index).unwrap_or("");

            let name = canon(field(name_col));
            if name.is_empty() {
                continue;
            }
            let id = parse_id(field(id_col), line, HEADER[2])?;
            if id == 0 {
                warn!(line, name = %name, "taxonomy.row_without_id");
                continue;
            }
            if taxonomy.contains(id) {
                continue;
            }
            let parent = match field(parent_col).trim() {
                "" => None,
                value => Some(parse_id(value, line, HEADER[5])?).filter(|parent| *parent != 0),
            };

            taxonomy.index_node(Taxon {
                name,
                author: field(author_col).to_string(),
                id,
                rank: Rank::parse_lenient(field(rank_col)),
                status: field(status_col).to_string(),
                parent,
            });
            order.push(id);
        }

        for id in order {
            taxonomy.link(id);
        }
        Ok(taxonomy)
    }

    /// Writes the taxonomy as a tab-separated table, depth first from the
    /// roots. Siblings are ordered by rank (unranked first), accepted names
    /// before the rest, name and identifier, so repeated writes of the same
    /// taxonomy are byte-identical.
    pub fn write<W: io::Write>(&self, writer: W) -> Result<(), KiraError> {
        let mut out = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Never)
            .terminator(csv::Terminator::CRLF)
            .from_writer(writer);
        out.write_record(HEADER).map_err(write_error)?;

        let mut visited = HashSet::new();
        for id in self.sorted(self.roots.iter().copied()) {
            self.write_subtree(&mut out, id, &mut visited)?;
        }
        // Only nodes caught in a parent cycle are left at this point.
        let rest = self
            .nodes
            .keys()
            .copied()
            .filter(|id| !visited.contains(id))
            .collect::<Vec<_>>();
        for id in self.sorted(rest) {
            self.write_subtree(&mut out, id, &mut visited)?;
        }

        out.flush()
            .map_err(|err| KiraError::Filesystem(format!("when writing taxonomy: {err}")))
    }

    fn write_subtree<W: io::Write>(
        &self,
        out: &mut csv::Writer<W>,
        id: TaxonId,
        visited: &mut HashSet<TaxonId>,
    ) -> Result<(), KiraError> {
        if !visited.insert(id) {
            return Ok(());
        }
        let Some(node) = self.nodes.get(&id) else {
            return Ok(());
        };
        let data = &node.data;
        out.write_record([
            data.name.clone(),
            data.author.clone(),
            data.id.to_string(),
            data.rank.to_string(),
            data.status.clone(),
            data.parent.map(|parent| parent.to_string()).unwrap_or_default(),
        ])
        .map_err(write_error)?;

        for child in self.sorted(node.children.iter().copied()) {
            self.write_subtree(out, child, visited)?;
        }
        Ok(())
    }

    fn sorted(&self, ids: impl IntoIterator<Item = TaxonId>) -> Vec<TaxonId> {
        let mut taxa: Vec<&Taxon> = ids
            .into_iter()
            .filter_map(|id| self.nodes.get(&id).map(|node| &node.data))
            .collect();
        taxa.sort_by(|a, b| {
            (a.rank, !a.is_accepted(), &a.name, a.id).cmp(&(b.rank, !b.is_accepted(), &b.name, b.id))
        });
        taxa.into_iter().map(|taxon| taxon.id).collect()
    }

    /// The parent is the first of the accepted, parent and basionym
    /// references already in the taxonomy.
    pub fn add_species(&mut self, record: &Species) -> bool {
        let id = record.id();
        if id == 0 || self.contains(id) {
            return false;
        }
        let name = record.name();
        if name.is_empty() {
            return false;
        }
        let parent = record
            .references()
            .into_iter()
            .find(|key| *key != 0 && *key != id && self.contains(*key));

        self.insert(Taxon {
            name,
            author: record.author(),
            id,
            rank: record.taxon_rank(),
            status: record.status(),
            parent,
        })
    }

    /// Existing roots that name the new taxon as their parent are moved
    /// under it.
    pub fn insert(&mut self, taxon: Taxon) -> bool {
        let id = taxon.id;
        if id == 0 || self.contains(id) || canon(&taxon.name).is_empty() {
            return false;
        }
        self.index_node(taxon);
        self.link(id);
        self.adopt_orphans(id);
        true
    }

    fn index_node(&mut self, mut taxon: Taxon) {
        taxon.name = canon(&taxon.name);
        taxon.author = normalize_spaces(&taxon.author);
        taxon.status = normalize_status(&taxon.status);
        self.names
            .entry(taxon.name.clone())
            .or_default()
            .insert(taxon.id);
        self.nodes.insert(
            taxon.id,
            Node {
                data: taxon,
                children: BTreeSet::new(),
            },
        );
    }

    fn link(&mut self, id: TaxonId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let rank = node.data.rank;
        let parent = node.data.parent.filter(|parent| *parent != id);
        match parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            Some(parent) => {
                if rank.is_ranked() && parent.data.rank.is_ranked() && rank < parent.data.rank {
                    warn!(
                        id,
                        rank = %rank,
                        parent = parent.data.id,
                        parent_rank = %parent.data.rank,
                        "taxonomy.rank_above_parent"
                    );
                }
                parent.children.insert(id);
                self.roots.remove(&id);
            }
            None => {
                self.roots.insert(id);
            }
        }
    }

    fn adopt_orphans(&mut self, id: TaxonId) {
        let ancestors = self.parents(id);
        let orphans = self
            .roots
            .iter()
            .copied()
            .filter(|root| *root != id && !ancestors.contains(root))
            .filter(|root| {
                self.nodes
                    .get(root)
                    .is_some_and(|node| node.data.parent == Some(id))
            })
            .collect::<Vec<_>>();
        for orphan in orphans {
            self.link(orphan);
        }
    }

    pub fn taxon(&self, id: TaxonId) -> Option<&Taxon> {
        self.nodes.get(&id).map(|node| &node.data)
    }

    pub fn accepted(&self, id: TaxonId) -> Option<&Taxon> {
        self.find_up(id, Taxon::is_accepted)
    }

    pub fn accepted_and_ranked(&self, id: TaxonId) -> Option<&Taxon> {
        self.find_up(id, |taxon| taxon.is_accepted() && taxon.rank.is_ranked())
    }

    fn find_up(&self, id: TaxonId, matches: impl Fn(&Taxon) -> bool) -> Option<&Taxon> {
        let mut visited = HashSet::new();
        let mut current = Some(id);
        while let Some(id) = current {
            if !visited.insert(id) {
                return None;
            }
            let node = self.nodes.get(&id)?;
            if matches(&node.data) {
                return Some(&node.data);
            }
            current = node.data.parent;
        }
        None
    }

    pub fn by_name(&self, name: &str) -> Vec<TaxonId> {
        self.names
            .get(&canon(name))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn children(&self, id: TaxonId) -> Vec<TaxonId> {
        let mut found = BTreeSet::new();
        let mut stack = match self.nodes.get(&id) {
            Some(node) => node.children.iter().copied().collect::<Vec<_>>(),
            None => return Vec::new(),
        };
        while let Some(child) = stack.pop() {
            if child == id || !found.insert(child) {
                continue;
            }
            if let Some(node) = self.nodes.get(&child) {
                stack.extend(node.children.iter().copied());
            }
        }
        found.into_iter().collect()
    }

    pub fn parents(&self, id: TaxonId) -> Vec<TaxonId> {
        let mut found = Vec::new();
        let mut current = self.taxon(id).and_then(|taxon| taxon.parent);
        for _ in 0..MAX_DEPTH {
            let Some(parent) = current else {
                break;
            };
            if parent == id || found.contains(&parent) {
                break;
            }
            let Some(taxon) = self.taxon(parent) else {
                break;
            };
            found.push(parent);
            current = taxon.parent;
        }
        found.sort_unstable();
        found
    }

    pub fn del(&mut self, id: TaxonId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if let Some(parent) = node.data.parent {
            if let Some(parent) = self.nodes.get_mut(&parent) {
                parent.children.remove(&id);
            }
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            self.roots.remove(&current);
            if let Some(ids) = self.names.get_mut(&node.data.name) {
                ids.remove(&current);
                if ids.is_empty() {
                    self.names.remove(&node.data.name);
                }
            }
            stack.extend(node.children);
        }
    }

    pub fn rank(&self, id: TaxonId) -> Rank {
        let mut current = Some(id);
        for _ in 0..=MAX_DEPTH {
            let Some(taxon) = current.and_then(|id| self.taxon(id)) else {
                break;
            };
            if taxon.rank.is_ranked() {
                return taxon.rank;
            }
            current = taxon.parent;
        }
        Rank::Unranked
    }

    /// Minimum over the roots of each root's rank; an unranked root takes
    /// the minimum of its closest ranked descendants. Taxa below a ranked
    /// taxon are never consulted. `Unranked` means no information.
    pub fn min_rank(&self) -> Rank {
        let mut visited = HashSet::new();
        self.roots
            .iter()
            .map(|root| self.top_rank(*root, &mut visited))
            .filter(Rank::is_ranked)
            .min()
            .unwrap_or(Rank::Unranked)
    }

    fn top_rank(&self, id: TaxonId, visited: &mut HashSet<TaxonId>) -> Rank {
        if !visited.insert(id) {
            return Rank::Unranked;
        }
        let Some(node) = self.nodes.get(&id) else {
            return Rank::Unranked;
        };
        if node.data.rank.is_ranked() {
            return node.data.rank;
        }
        node.children
            .iter()
            .map(|child| self.top_rank(*child, visited))
            .filter(Rank::is_ranked)
            .min()
            .unwrap_or(Rank::Unranked)
    }

    /// Returns the number of removed taxa.
    pub fn prune(&mut self, names: &[String], mode: PruneMode) -> usize {
        let before = self.len();
        let mut selected = BTreeSet::new();
        for name in names {
            for id in self.by_name(name) {
                if !selected.insert(id) || mode == PruneMode::Delete {
                    continue;
                }
                selected.extend(self.children(id));
                selected.extend(self.parents(id));
            }
        }

        let doomed = match mode {
            PruneMode::Delete => selected.into_iter().collect::<Vec<_>>(),
            PruneMode::Keep => self
                .ids()
                .into_iter()
                .filter(|id| !selected.contains(id))
                .collect(),
        };
        for id in doomed {
            self.del(id);
        }
        before - self.len()
    }
}

fn parse_id(value: &str, line: u64, field: &str) -> Result<TaxonId, KiraError> {
    value.trim().parse().map_err(|_| KiraError::MalformedRow {
        line,
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn write_error(err: csv::Error) -> KiraError {
    KiraError::Filesystem(format!("when writing taxonomy: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxon(id: TaxonId, name: &str, rank: Rank, status: &str, parent: Option<TaxonId>) -> Taxon {
        Taxon {
            name: name.to_string(),
            author: String::new(),
            id,
            rank,
            status: status.to_string(),
            parent,
        }
    }

    #[test]
    fn late_parent_adopts_orphan_root() {
        let mut tax = Taxonomy::new();
        tax.insert(taxon(2, "Felis catus", Rank::Species, "accepted", Some(1)));
        assert_eq!(tax.parents(2), Vec::<TaxonId>::new());

        tax.insert(taxon(1, "Felis", Rank::Genus, "accepted", None));
        assert_eq!(tax.parents(2), vec![1]);
        assert_eq!(tax.children(1), vec![2]);
        assert!(!tax.roots.contains(&2));
    }

    #[test]
    fn del_detaches_from_parent() {
        let mut tax = Taxonomy::new();
        tax.insert(taxon(1, "Felis", Rank::Genus, "accepted", None));
        tax.insert(taxon(2, "Felis catus", Rank::Species, "accepted", Some(1)));
        tax.del(2);
        assert!(tax.nodes[&1].children.is_empty());
        assert!(tax.names.get("Felis catus").is_none());
    }

    #[test]
    fn self_parent_is_a_root() {
        let mut tax = Taxonomy::new();
        tax.insert(taxon(7, "Loop", Rank::Genus, "synonym", Some(7)));
        assert!(tax.roots.contains(&7));
        assert!(tax.accepted(7).is_none());
        assert!(tax.parents(7).is_empty());
    }
}

use std::sync::{Arc, Mutex};

use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::GbifConfig;
use crate::domain::{Rank, TaxonId, canon, normalize_spaces, normalize_status};
use crate::error::KiraError;
use crate::pipeline::{HttpTransport, Pipeline};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Species {
    pub key: TaxonId,
    pub nub_key: TaxonId,
    pub accepted_key: TaxonId,
    pub basionym_key: TaxonId,
    pub parent_key: TaxonId,
    pub canonical_name: String,
    pub scientific_name: String,
    pub authorship: String,
    pub rank: String,
    pub taxonomic_status: String,
    pub dataset_key: String,
    pub published_in: String,

    pub kingdom_key: TaxonId,
    pub phylum_key: TaxonId,
    pub class_key: TaxonId,
    pub order_key: TaxonId,
    pub family_key: TaxonId,
    pub genus_key: TaxonId,
    pub species_key: TaxonId,

    pub kingdom: String,
    pub phylum: String,
    pub class: String,
    pub order: String,
    pub family: String,
    pub genus: String,
    pub species: String,
}

impl Species {
    pub fn id(&self) -> TaxonId {
        if self.nub_key != 0 {
            self.nub_key
        } else {
            self.key
        }
    }

    /// Empty for records without a usable name (BOLD placeholders).
    pub fn name(&self) -> String {
        let name = canon(&self.canonical_name);
        if !name.is_empty() {
            return name;
        }
        canon(&self.species)
    }

    pub fn author(&self) -> String {
        normalize_spaces(&self.authorship)
    }

    pub fn status(&self) -> String {
        normalize_status(&self.taxonomic_status)
    }

    pub fn taxon_rank(&self) -> Rank {
        Rank::parse_lenient(&self.rank)
    }

    pub fn references(&self) -> [TaxonId; 3] {
        [self.accepted_key, self.parent_key, self.basionym_key]
    }

    pub fn next_key(&self) -> Option<TaxonId> {
        self.references().into_iter().find(|key| *key != 0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Page {
    limit: u64,
    end_of_records: bool,
    results: Vec<Species>,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 0,
            end_of_records: true,
            results: Vec::new(),
        }
    }
}

pub trait GbifClient: Send + Sync {
    fn fetch_by_id(&self, id: TaxonId) -> Result<Species, KiraError>;
    fn fetch_by_name(&self, name: &str) -> Result<Vec<Species>, KiraError>;
    fn fetch_children(&self, id: TaxonId) -> Result<Vec<Species>, KiraError>;
    fn fetch_synonyms(&self, id: TaxonId) -> Result<Vec<Species>, KiraError>;
}

static PIPELINE: Mutex<Option<Arc<Pipeline>>> = Mutex::new(None);

/// Starts the process-wide GBIF pipeline. Safe to call many times: only the
/// first successful call spawns a worker, later calls share it.
pub fn open(config: &GbifConfig) -> Result<Arc<Pipeline>, KiraError> {
    let mut slot = PIPELINE
        .lock()
        .map_err(|_| KiraError::GbifHttp("pipeline lock poisoned".to_string()))?;
    if let Some(pipeline) = slot.as_ref() {
        return Ok(Arc::clone(pipeline));
    }
    let transport = HttpTransport::new(config)?;
    let pipeline = Arc::new(Pipeline::spawn(transport, config.wait(), config.buffer)?);
    *slot = Some(Arc::clone(&pipeline));
    Ok(pipeline)
}

#[derive(Clone)]
pub struct GbifHttpClient {
    pipeline: Arc<Pipeline>,
    base_url: String,
    retries: usize,
}

impl GbifHttpClient {
    pub fn new(config: &GbifConfig) -> Result<Self, KiraError> {
        Ok(Self::with_pipeline(open(config)?, config))
    }

    pub fn with_pipeline(pipeline: Arc<Pipeline>, config: &GbifConfig) -> Self {
        Self {
            pipeline,
            base_url: config.base(),
            retries: config.retries,
        }
    }

    pub fn species_url(&self, id: TaxonId) -> String {
        format!("{}species/{id}", self.base_url)
    }

    fn list_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, KiraError> {
        Url::parse_with_params(&format!("{}{path}", self.base_url), params)
            .map_err(|err| KiraError::InvalidQuery(err.to_string()))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, KiraError> {
        let mut last_error = None;
        for attempt in 1..=self.retries {
            let Some(answer) = self.pipeline.submit(url) else {
                debug!(url, attempt, "gbif.no_answer");
                continue;
            };
            let decoded = answer.and_then(|body| {
                serde_json::from_str(&body).map_err(|err| KiraError::GbifDecode(err.to_string()))
            });
            match decoded {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(url, attempt, error = %err, "gbif.retry");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(KiraError::TransportExhausted {
                retries: self.retries,
                message: err.to_string(),
            }),
            None => Err(KiraError::NoAnswer {
                retries: self.retries,
            }),
        }
    }

    // Only backbone records (`key == nubKey`) are kept.
    fn list(&self, path: &str, extra: &[(&str, String)]) -> Result<Vec<Species>, KiraError> {
        let mut records = Vec::new();
        let mut offset = 0u64;
        loop {
            let mut params = extra.to_vec();
            params.push(("offset", offset.to_string()));
            let url = self.list_url(path, &params)?;
            let page: Page = self.get_json(url.as_str())?;
            debug!(path, offset, results = page.results.len(), "gbif.page");
            records.extend(
                page.results
                    .into_iter()
                    .filter(|species| species.key == species.nub_key),
            );
            if page.end_of_records || page.limit == 0 {
                break;
            }
            offset += page.limit;
        }
        Ok(records)
    }
}

impl GbifClient for GbifHttpClient {
    fn fetch_by_id(&self, id: TaxonId) -> Result<Species, KiraError> {
        if id == 0 {
            return Err(KiraError::InvalidQuery("empty species ID".to_string()));
        }
        self.get_json(&self.species_url(id))
    }

    fn fetch_by_name(&self, name: &str) -> Result<Vec<Species>, KiraError> {
        let name = normalize_spaces(name);
        if name.is_empty() {
            return Err(KiraError::InvalidQuery("empty taxon name".to_string()));
        }
        self.list("species", &[("name", name)])
    }

    fn fetch_children(&self, id: TaxonId) -> Result<Vec<Species>, KiraError> {
        self.list(&format!("species/{id}/children"), &[])
    }

    fn fetch_synonyms(&self, id: TaxonId) -> Result<Vec<Species>, KiraError> {
        self.list(&format!("species/{id}/synonyms"), &[])
    }
}

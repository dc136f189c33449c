//! Donor entity resolution.
//!
//! Raw contributor names are canonicalized, grouped into blocks by state and name prefix,
//! and clustered with a bounded edit distance. The result is an immutable [`NameMap`]
//! that every later stage reads through an `Arc`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::config::ResolverConfig;

/// Uppercase, drop punctuation, collapse runs of whitespace
pub fn canonicalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
    {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_uppercase));
    }
    out
}

/// Stable donor id: `DNR-` and the first 12 hex chars of SHA-256 over state and canonical form
pub fn donor_id(state: &str, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(state.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("DNR-{}", &digest[..12])
}

/// One resolved donor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DonorEntity {
    pub donor_id: String,
    /// Lexicographically smallest raw spelling in the cluster
    pub canonical_name: String,
    pub state: String,
}

/// A raw spelling and the entity it resolved to, as written to `name_map.csv`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct NameMapEntry {
    pub raw_name: String,
    pub state: String,
    pub donor_id: String,
    pub canonical_name: String,
}

/// Immutable raw name → donor mapping built once per run
#[derive(Debug, Default)]
pub struct NameMap {
    /// state → raw name → entity index
    lookup: HashMap<String, HashMap<String, usize>>,
    entities: Vec<DonorEntity>,
    entries: Vec<NameMapEntry>,
    fuzzy_merges: usize,
}

impl NameMap {
    /// Resolve every distinct (raw name, state) pair
    #[instrument(skip_all)]
    pub fn build<'a, I>(names: I, config: &ResolverConfig) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        // block key → canonical form → raw spellings
        let mut blocks: BTreeMap<(String, String), BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();
        let mut seen = 0usize;
        for (raw, state) in names {
            let raw = raw.trim();
            let canonical = canonicalize(raw);
            if canonical.is_empty() {
                continue;
            }
            seen += 1;
            let prefix: String = canonical.chars().take(2).collect();
            blocks
                .entry((state.trim().to_ascii_uppercase(), prefix))
                .or_default()
                .entry(canonical)
                .or_default()
                .insert(raw.to_string());
        }

        let clustered: Vec<(String, Vec<Cluster>)> = blocks
            .into_par_iter()
            .map(|((state, _), forms)| (state, cluster_block(forms, config)))
            .collect();

        let mut map = NameMap::default();
        for (state, clusters) in clustered {
            for cluster in clusters {
                map.fuzzy_merges += cluster.forms - 1;
                let canonical_name = cluster
                    .raw_names
                    .iter()
                    .next()
                    .cloned()
                    .unwrap_or_default();
                let entity = DonorEntity {
                    donor_id: donor_id(&state, &canonicalize(&canonical_name)),
                    canonical_name,
                    state: state.clone(),
                };
                let index = map.entities.len();
                let by_raw = map.lookup.entry(state.clone()).or_default();
                for raw in &cluster.raw_names {
                    by_raw.insert(raw.clone(), index);
                    map.entries.push(NameMapEntry {
                        raw_name: raw.clone(),
                        state: state.clone(),
                        donor_id: entity.donor_id.clone(),
                        canonical_name: entity.canonical_name.clone(),
                    });
                }
                map.entities.push(entity);
            }
        }

        crate::metrics::resolve::names_seen(seen);
        crate::metrics::resolve::entities_created(map.entities.len());
        crate::metrics::resolve::fuzzy_merges(map.fuzzy_merges);
        info!(
            "Resolved {} raw spellings into {} donors ({} fuzzy merges)",
            map.entries.len(),
            map.entities.len(),
            map.fuzzy_merges
        );
        map
    }

    pub fn resolve(&self, raw_name: &str, state: &str) -> Option<&DonorEntity> {
        let state = state.trim();
        let by_raw = match self.lookup.get(state) {
            Some(by_raw) => by_raw,
            None => self.lookup.get(&state.to_ascii_uppercase())?,
        };
        by_raw.get(raw_name.trim()).map(|&idx| &self.entities[idx])
    }

    pub fn entities(&self) -> &[DonorEntity] {
        &self.entities
    }

    pub fn entries(&self) -> &[NameMapEntry] {
        &self.entries
    }

    pub fn fuzzy_merges(&self) -> usize {
        self.fuzzy_merges
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

struct Cluster {
    /// Sorted, so the first is the canonical spelling
    raw_names: BTreeSet<String>,
    forms: usize,
}

/// Greedy leader clustering of one block, visiting canonical forms in lexicographic order.
/// A form joins the nearest leader within `fuzzy_max_edits`, ties going to the
/// lexicographically smallest leader; otherwise it leads a new cluster.
fn cluster_block(forms: BTreeMap<String, BTreeSet<String>>, config: &ResolverConfig) -> Vec<Cluster> {
    let mut leaders: Vec<(String, usize)> = Vec::new();
    let mut clusters: Vec<Cluster> = Vec::new();

    for (form, raws) in forms {
        let len = form.chars().count();
        let mut best: Option<(usize, usize)> = None;
        if len >= config.fuzzy_min_name_len {
            for (leader, cluster_idx) in &leaders {
                let leader_len = leader.chars().count();
                if leader_len < config.fuzzy_min_name_len || leader_len.abs_diff(len) > config.fuzzy_max_edits {
                    continue;
                }
                let distance = strsim::levenshtein(leader, &form);
                if distance <= config.fuzzy_max_edits && best.map_or(true, |(d, _)| distance < d) {
                    best = Some((distance, *cluster_idx));
                }
            }
        }
        match best {
            Some((distance, idx)) => {
                debug!("Merged '{}' into cluster of '{}' (distance {})", form, leaders_name(&leaders, idx), distance);
                clusters[idx].raw_names.extend(raws);
                clusters[idx].forms += 1;
            }
            None => {
                leaders.push((form, clusters.len()));
                clusters.push(Cluster { raw_names: raws, forms: 1 });
            }
        }
    }
    clusters
}

fn leaders_name(leaders: &[(String, usize)], cluster_idx: usize) -> &str {
    leaders
        .iter()
        .find(|(_, idx)| *idx == cluster_idx)
        .map(|(name, _)| name.as_str())
        .unwrap_or("")
}

//! Nearest-neighbour search over unit vectors.
//!
//! For unit vectors the inner product is the cosine similarity, so both
//! strategies rank by `<v, q>`. Results are ordered by similarity descending,
//! ties by item id ascending.

use crate::utils::rank_order;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Exact,
    #[default]
    Accelerated,
}

impl SearchStrategy {
    pub fn build(self) -> Box<dyn NeighborSearch> {
        match self {
            SearchStrategy::Exact => Box::new(ExactSearch),
            SearchStrategy::Accelerated => Box::new(AcceleratedSearch),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Exact => "exact",
            SearchStrategy::Accelerated => "accelerated",
        }
    }
}

pub trait NeighborSearch: Send + Sync {
    /// Top `n` rows of `vectors` by cosine with `query`, skipping ids in `exclude`.
    fn search(
        &self,
        vectors: &Array2<f32>,
        ids: &[String],
        query: ArrayView1<'_, f32>,
        n: usize,
        exclude: &HashSet<String>,
    ) -> Vec<(String, f32)>;

    fn strategy(&self) -> SearchStrategy;
}

fn neighbor_order(ids: &[String], a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    rank_order((&ids[a.0], a.1 as f64), (&ids[b.0], b.1 as f64))
}

fn into_results(ids: &[String], scored: Vec<(usize, f32)>) -> Vec<(String, f32)> {
    scored
        .into_iter()
        .map(|(idx, sim)| (ids[idx].clone(), sim.clamp(-1.0, 1.0)))
        .collect()
}

/// Brute force: one dot product per row, full sort.
pub struct ExactSearch;

impl NeighborSearch for ExactSearch {
    fn search(
        &self,
        vectors: &Array2<f32>,
        ids: &[String],
        query: ArrayView1<'_, f32>,
        n: usize,
        exclude: &HashSet<String>,
    ) -> Vec<(String, f32)> {
        if n == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = vectors
            .rows()
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !exclude.contains(&ids[*idx]))
            .map(|(idx, row)| {
                let sim: f32 = row.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                (idx, sim)
            })
            .collect();

        scored.sort_by(|a, b| neighbor_order(ids, a, b));
        scored.truncate(n);
        into_results(ids, scored)
    }

    fn strategy(&self) -> SearchStrategy {
        SearchStrategy::Exact
    }
}

/// Single matrix-vector product, then partial selection of the top `n`.
pub struct AcceleratedSearch;

impl NeighborSearch for AcceleratedSearch {
    fn search(
        &self,
        vectors: &Array2<f32>,
        ids: &[String],
        query: ArrayView1<'_, f32>,
        n: usize,
        exclude: &HashSet<String>,
    ) -> Vec<(String, f32)> {
        if n == 0 || vectors.nrows() == 0 {
            return Vec::new();
        }

        let sims = vectors.dot(&query);
        let mut scored: Vec<(usize, f32)> = sims
            .iter()
            .enumerate()
            .filter(|(idx, _)| !exclude.contains(&ids[*idx]))
            .map(|(idx, sim)| (idx, *sim))
            .collect();

        if scored.len() > n {
            scored.select_nth_unstable_by(n - 1, |a, b| neighbor_order(ids, a, b));
            scored.truncate(n);
        }
        scored.sort_by(|a, b| neighbor_order(ids, a, b));
        into_results(ids, scored)
    }

    fn strategy(&self) -> SearchStrategy {
        SearchStrategy::Accelerated
    }
}

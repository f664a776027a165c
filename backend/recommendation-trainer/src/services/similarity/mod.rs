// ============================================
// Similarity Graph Expander
// ============================================
//
// Widens a profile's candidate pool with items that share a category,
// author or publisher with one of its anchors (top scored items).
// Related items inherit a discounted anchor score so they can surface
// without any direct interaction.

use crate::models::{CandidateEntry, ProfileScores};
use crate::sources::ItemCatalog;
use std::collections::HashMap;
use tracing::debug;

pub const ANCHOR_COUNT: usize = 3;
pub const RELATED_SCORE_FACTOR: f64 = 0.6;

/// Inverted attribute indexes over the catalogue. Id lists are ascending.
#[derive(Debug, Clone, Default)]
pub struct SimilarityIndex {
    by_category: HashMap<i64, Vec<i64>>,
    by_author: HashMap<i64, Vec<i64>>,
    by_publisher: HashMap<i64, Vec<i64>>,
}

impl SimilarityIndex {
    pub fn build(catalog: &ItemCatalog) -> Self {
        let mut index = Self::default();
        // catalogue iterates in ascending id order, so pushes keep lists sorted
        for item in catalog.iter() {
            if let Some(category_id) = item.category_id {
                index.by_category.entry(category_id).or_default().push(item.item_id);
            }
            if let Some(author_id) = item.author_id {
                index.by_author.entry(author_id).or_default().push(item.item_id);
            }
            if let Some(publisher_id) = item.publisher_id {
                index.by_publisher.entry(publisher_id).or_default().push(item.item_id);
            }
        }
        index
    }

    pub fn same_category(&self, category_id: i64) -> &[i64] {
        self.by_category.get(&category_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn same_author(&self, author_id: i64) -> &[i64] {
        self.by_author.get(&author_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn same_publisher(&self, publisher_id: i64) -> &[i64] {
        self.by_publisher.get(&publisher_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_category.is_empty() && self.by_author.is_empty() && self.by_publisher.is_empty()
    }
}

pub struct SimilarityGraphExpander<'a> {
    catalog: &'a ItemCatalog,
    index: &'a SimilarityIndex,
}

impl<'a> SimilarityGraphExpander<'a> {
    pub fn new(catalog: &'a ItemCatalog, index: &'a SimilarityIndex) -> Self {
        Self { catalog, index }
    }

    fn title_of(&self, item_id: i64) -> Option<String> {
        self.catalog.get(item_id).and_then(|item| item.title.clone())
    }

    /// Candidate pool for one profile: scored items first (incoming order),
    /// then related items in discovery order.
    pub fn expand(&self, profile: &ProfileScores) -> Vec<CandidateEntry> {
        let mut pool: Vec<CandidateEntry> = Vec::with_capacity(profile.items.len());
        let mut positions: HashMap<i64, usize> = HashMap::new();

        for item in &profile.items {
            let Ok(item_id) = item.item_id.parse::<i64>() else {
                continue;
            };
            if positions.contains_key(&item_id) {
                continue;
            }
            let mut entry = CandidateEntry::new(item_id, self.title_of(item_id), item.score);
            entry.same_category = true;
            positions.insert(item_id, pool.len());
            pool.push(entry);
        }

        if self.catalog.is_empty() {
            return pool;
        }

        // Stable sort keeps incoming order among equal scores
        let mut anchors: Vec<(i64, f64)> = pool
            .iter()
            .map(|entry| (entry.item_id, entry.base_score))
            .collect();
        anchors.sort_by(|a, b| b.1.total_cmp(&a.1));
        anchors.truncate(ANCHOR_COUNT);

        let seeded = pool.len();
        for (anchor_id, anchor_score) in anchors {
            let Some(anchor) = self.catalog.get(anchor_id) else {
                continue;
            };
            let related_score = anchor_score * RELATED_SCORE_FACTOR;

            let groups: [(Option<&[i64]>, fn(&mut CandidateEntry)); 3] = [
                (
                    anchor.category_id.map(|id| self.index.same_category(id)),
                    |entry| entry.same_category = true,
                ),
                (
                    anchor.author_id.map(|id| self.index.same_author(id)),
                    |entry| entry.same_author = true,
                ),
                (
                    anchor.publisher_id.map(|id| self.index.same_publisher(id)),
                    |entry| entry.same_publisher = true,
                ),
            ];

            for (related, mark) in groups {
                for &related_id in related.unwrap_or(&[]) {
                    if related_id == anchor_id {
                        continue;
                    }
                    let position = match positions.get(&related_id) {
                        Some(&position) => position,
                        None => {
                            positions.insert(related_id, pool.len());
                            pool.push(CandidateEntry::new(
                                related_id,
                                self.title_of(related_id),
                                0.0,
                            ));
                            pool.len() - 1
                        }
                    };
                    let entry = &mut pool[position];
                    mark(entry);
                    entry.base_score = entry.base_score.max(related_score);
                }
            }
        }

        debug!(
            profile = %profile.key,
            seeded,
            expanded = pool.len() - seeded,
            "Expanded candidate pool"
        );
        pool
    }
}

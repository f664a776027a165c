// ============================================
// Embedding Index
// ============================================
//
// Item vectors built once per run from the catalogue:
// 1. Render a short descriptor per item (title / category / author / publisher)
// 2. Encode descriptors in batches through the external encoder
// 3. L2-normalize and store row-wise for neighbour search
//
// Without an encoder the index is inert: every lookup returns nothing and
// downstream stages skip the embedding signal.

pub mod encoder;
pub mod search;

pub use encoder::{EmbeddingEncoder, OpenAiEncoder};
pub use search::{AcceleratedSearch, ExactSearch, NeighborSearch, SearchStrategy};

use crate::models::{ItemMetadata, ScoredItem};
use crate::sources::ItemCatalog;
use crate::utils::l2_normalize;
use ndarray::{Array1, Array2, ArrayView1};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Descriptor text fed to the encoder.
pub fn render_item_text(item: &ItemMetadata) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(title) = item.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(title.to_string());
    }
    if let Some(category_id) = item.category_id {
        parts.push(format!("Category {}", category_id));
    }
    if let Some(author_id) = item.author_id {
        parts.push(format!("Author {}", author_id));
    }
    if let Some(publisher_id) = item.publisher_id {
        parts.push(format!("Publisher {}", publisher_id));
    }

    if parts.is_empty() {
        format!("Book {}", item.item_id)
    } else {
        parts.join(" | ")
    }
}

pub struct EmbeddingIndex {
    ids: Vec<String>,
    positions: HashMap<String, usize>,
    vectors: Array2<f32>,
    search: Box<dyn NeighborSearch>,
    model: Option<String>,
}

impl EmbeddingIndex {
    /// Index with no vectors; every query degrades to "no signal".
    pub fn inert(strategy: SearchStrategy) -> Self {
        Self {
            ids: Vec::new(),
            positions: HashMap::new(),
            vectors: Array2::zeros((0, 0)),
            search: strategy.build(),
            model: None,
        }
    }

    pub async fn build(
        catalog: &ItemCatalog,
        encoder: Option<&dyn EmbeddingEncoder>,
        batch_size: usize,
        strategy: SearchStrategy,
    ) -> Self {
        let Some(encoder) = encoder else {
            info!("No embedding encoder configured, embedding index is inert");
            return Self::inert(strategy);
        };
        if catalog.is_empty() {
            return Self::inert(strategy);
        }

        let items: Vec<&ItemMetadata> = catalog.iter().collect();
        let texts: Vec<String> = items.iter().map(|item| render_item_text(item)).collect();

        let mut encoded: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size.max(1)) {
            match encoder.encode(batch).await {
                Ok(vectors) if vectors.len() == batch.len() => encoded.extend(vectors),
                Ok(vectors) => {
                    warn!(
                        expected = batch.len(),
                        received = vectors.len(),
                        "Encoder returned wrong number of vectors, embedding index is inert"
                    );
                    return Self::inert(strategy);
                }
                Err(e) => {
                    warn!(error = %e, "Embedding encoder failed, embedding index is inert");
                    return Self::inert(strategy);
                }
            }
        }

        let dimension = encoded.iter().map(Vec::len).find(|len| *len > 0).unwrap_or(0);
        let mut ids = Vec::new();
        let mut flat: Vec<f32> = Vec::new();
        for (item, raw) in items.iter().zip(encoded) {
            if raw.len() != dimension {
                warn!(item_id = item.item_id, "Skipping embedding with unexpected dimension");
                continue;
            }
            let mut vector = Array1::from(raw);
            if !l2_normalize(&mut vector) {
                warn!(item_id = item.item_id, "Skipping zero or non-finite embedding");
                continue;
            }
            ids.push(item.item_id.to_string());
            flat.extend(vector.iter());
        }

        if ids.is_empty() {
            return Self::inert(strategy);
        }

        let vectors = match Array2::from_shape_vec((ids.len(), dimension), flat) {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(error = %e, "Failed to assemble embedding matrix, embedding index is inert");
                return Self::inert(strategy);
            }
        };

        info!(
            items = ids.len(),
            dimension,
            model = encoder.model_name(),
            strategy = strategy.as_str(),
            "Embedding index built"
        );

        Self::from_parts(ids, vectors, strategy, Some(encoder.model_name().to_string()))
    }

    fn from_parts(
        ids: Vec<String>,
        vectors: Array2<f32>,
        strategy: SearchStrategy,
        model: Option<String>,
    ) -> Self {
        let positions = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.clone(), idx))
            .collect();
        Self {
            ids,
            positions,
            vectors,
            search: strategy.build(),
            model,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn strategy(&self) -> SearchStrategy {
        self.search.strategy()
    }

    pub fn vector_of(&self, item_id: &str) -> Option<ArrayView1<'_, f32>> {
        self.positions.get(item_id).map(|&idx| self.vectors.row(idx))
    }

    /// Behaviour-weighted average of the interacted items' vectors, re-normalized.
    pub fn profile_vector(&self, items: &[ScoredItem]) -> Option<Array1<f32>> {
        if !self.is_active() || items.is_empty() {
            return None;
        }

        let mut aggregate = Array1::<f32>::zeros(self.vectors.ncols());
        let mut weight_sum = 0.0_f64;
        for item in items {
            if !item.score.is_finite() || item.score <= 0.0 {
                continue;
            }
            let Some(vector) = self.vector_of(&item.item_id) else {
                continue;
            };
            aggregate.scaled_add(item.score as f32, &vector);
            weight_sum += item.score;
        }

        if weight_sum <= 0.0 || aggregate.iter().all(|v| *v == 0.0) {
            return None;
        }
        if l2_normalize(&mut aggregate) {
            Some(aggregate)
        } else {
            None
        }
    }

    pub fn nearest(
        &self,
        query: ArrayView1<'_, f32>,
        n: usize,
        exclude: &HashSet<String>,
    ) -> Vec<(String, f32)> {
        if !self.is_active() || query.len() != self.vectors.ncols() {
            return Vec::new();
        }
        self.search
            .search(&self.vectors, &self.ids, query, n, exclude)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::{Result, TrainerError};
    use async_trait::async_trait;

    /// Encoder returning fixed vectors keyed by descriptor text.
    pub struct TableEncoder {
        pub table: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingEncoder for TableEncoder {
        async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            texts
                .iter()
                .map(|text| {
                    self.table
                        .get(text)
                        .cloned()
                        .ok_or_else(|| TrainerError::Embedding(format!("unknown text {}", text)))
                })
                .collect()
        }

        fn model_name(&self) -> &str {
            "table"
        }
    }

    pub struct FailingEncoder;

    #[async_trait]
    impl EmbeddingEncoder for FailingEncoder {
        async fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(TrainerError::Embedding("encoder offline".to_string()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{FailingEncoder, TableEncoder};
    use super::*;

    fn titled(item_id: i64, title: &str) -> ItemMetadata {
        ItemMetadata {
            item_id,
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    fn catalog() -> ItemCatalog {
        ItemCatalog::from_items(vec![
            titled(1, "Dune"),
            titled(2, "Dune Messiah"),
            titled(3, "Cookbook"),
            titled(4, "Broken"),
        ])
    }

    fn encoder() -> TableEncoder {
        TableEncoder {
            table: HashMap::from([
                ("Dune".to_string(), vec![2.0, 0.0]),
                ("Dune Messiah".to_string(), vec![3.0, 1.0]),
                ("Cookbook".to_string(), vec![0.0, 5.0]),
                ("Broken".to_string(), vec![0.0, 0.0]),
            ]),
        }
    }

    #[test]
    fn test_render_item_text() {
        let full = ItemMetadata {
            item_id: 7,
            title: Some("  Dune ".to_string()),
            category_id: Some(2),
            author_id: Some(3),
            publisher_id: None,
            ..Default::default()
        };
        assert_eq!(render_item_text(&full), "Dune | Category 2 | Author 3");

        let bare = ItemMetadata {
            item_id: 9,
            ..Default::default()
        };
        assert_eq!(render_item_text(&bare), "Book 9");
    }

    #[tokio::test]
    async fn test_build_normalizes_and_skips_zero_vectors() {
        let encoder = encoder();
        let index = EmbeddingIndex::build(&catalog(), Some(&encoder), 2, SearchStrategy::Exact).await;

        assert!(index.is_active());
        assert_eq!(index.len(), 3);
        assert!(index.vector_of("4").is_none());

        let v = index.vector_of("2").unwrap();
        assert!((v.dot(&v) - 1.0).abs() < 1e-5);
        assert_eq!(index.model(), Some("table"));
    }

    #[tokio::test]
    async fn test_profile_vector_is_weighted_and_unit() {
        let encoder = encoder();
        let index = EmbeddingIndex::build(&catalog(), Some(&encoder), 64, SearchStrategy::Exact).await;

        let profile = vec![
            ScoredItem::new("1", 3.0),
            ScoredItem::new("3", 1.0),
            ScoredItem::new("2", -4.0),
            ScoredItem::new("99", 10.0),
        ];
        let vector = index.profile_vector(&profile).unwrap();
        assert!((vector.dot(&vector) - 1.0).abs() < 1e-5);
        // 3 * (1, 0) + 1 * (0, 1) normalized
        assert!((vector[0] - 3.0 / 10f32.sqrt()).abs() < 1e-5);
        assert!((vector[1] - 1.0 / 10f32.sqrt()).abs() < 1e-5);

        assert!(index
            .profile_vector(&[ScoredItem::new("1", 0.0), ScoredItem::new("99", 2.0)])
            .is_none());
    }

    #[tokio::test]
    async fn test_nearest_excludes_and_orders() {
        let encoder = encoder();
        let index =
            EmbeddingIndex::build(&catalog(), Some(&encoder), 64, SearchStrategy::Accelerated).await;

        let query = index.vector_of("1").unwrap().to_owned();
        let exclude = HashSet::from(["1".to_string()]);
        let results = index.nearest(query.view(), 5, &exclude);

        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert!(results[0].1 > results[1].1);
    }

    #[tokio::test]
    async fn test_missing_or_failing_encoder_is_inert() {
        let index = EmbeddingIndex::build(&catalog(), None, 64, SearchStrategy::Exact).await;
        assert!(!index.is_active());
        assert!(index.vector_of("1").is_none());
        assert!(index.profile_vector(&[ScoredItem::new("1", 1.0)]).is_none());
        assert!(index
            .nearest(ndarray::array![1.0_f32, 0.0].view(), 3, &HashSet::new())
            .is_empty());

        let failing = EmbeddingIndex::build(&catalog(), Some(&FailingEncoder), 64, SearchStrategy::Exact).await;
        assert!(!failing.is_active());
    }
}

use crate::error::{Result, TrainerError};
use crate::models::{ItemMetadata, RawId};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Read-only item metadata keyed by integer item id.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    items: BTreeMap<i64, ItemMetadata>,
}

/// Row of the backend's book metadata export.
#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(default, alias = "productId")]
    product_id: Option<RawId>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    category_id: Option<RawId>,
    #[serde(default)]
    author_id: Option<RawId>,
    #[serde(default)]
    publisher_id: Option<RawId>,
    #[serde(default)]
    price: Option<RawId>,
    #[serde(default)]
    stock: Option<RawId>,
}

fn number_of(raw: Option<RawId>) -> Option<f64> {
    match raw? {
        RawId::Int(v) => Some(v as f64),
        RawId::Float(f) if f.is_finite() => Some(f),
        RawId::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

impl CatalogRow {
    fn into_metadata(self) -> Option<ItemMetadata> {
        let item_id = self.product_id.as_ref().and_then(RawId::as_integer)?;
        Some(ItemMetadata {
            item_id,
            title: self.title,
            category_id: self.category_id.as_ref().and_then(RawId::as_integer),
            author_id: self.author_id.as_ref().and_then(RawId::as_integer),
            publisher_id: self.publisher_id.as_ref().and_then(RawId::as_integer),
            price: number_of(self.price),
            stock: number_of(self.stock),
        })
    }
}

impl ItemCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = ItemMetadata>) -> Self {
        Self {
            items: items.into_iter().map(|item| (item.item_id, item)).collect(),
        }
    }

    /// Parse a JSON array export. Rows without an integer-like id are skipped.
    pub fn from_json(raw: &str) -> Result<Self> {
        let rows: Vec<CatalogRow> = serde_json::from_str(raw)
            .map_err(|e| TrainerError::Metadata(format!("Invalid item metadata JSON: {}", e)))?;
        let total = rows.len();
        let catalog = Self::from_items(rows.into_iter().filter_map(CatalogRow::into_metadata));
        if catalog.len() < total {
            warn!(
                skipped = total - catalog.len(),
                "Skipped item metadata rows without a usable id"
            );
        }
        Ok(catalog)
    }

    /// Load the export from disk. A missing file yields an empty catalogue.
    pub async fn load_json(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!(path = %path.display(), "Item metadata file not found, continuing without it");
            return Ok(Self::empty());
        }

        let raw = tokio::fs::read_to_string(path).await?;
        let catalog = Self::from_json(&raw)?;
        info!(path = %path.display(), items = catalog.len(), "Loaded item metadata");
        Ok(catalog)
    }

    pub fn get(&self, item_id: i64) -> Option<&ItemMetadata> {
        self.items.get(&item_id)
    }

    /// Items in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &ItemMetadata> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::{AssetFilter, CatalogStore, MediaAsset};

const CATALOG_FILE: &str = "catalog.json";

/// Catálogo persistido como un único archivo JSON.
///
/// Todo el catálogo vive en memoria; cada escritura reescribe el archivo
/// completo de forma atómica (archivo temporal + rename) mientras se
/// mantiene el lock de escritura, así que las escrituras quedan serializadas.
pub struct JsonCatalog {
    data_dir: PathBuf,
    assets: RwLock<HashMap<Uuid, MediaAsset>>,
}

impl JsonCatalog {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir).await?;

        let assets = Self::load(&data_dir.join(CATALOG_FILE)).await?;
        info!(
            "📁 Catálogo inicializado en {} ({} entradas)",
            data_dir.display(),
            assets.len()
        );

        Ok(Self {
            data_dir,
            assets: RwLock::new(assets),
        })
    }

    pub fn file_path(&self) -> PathBuf {
        self.data_dir.join(CATALOG_FILE)
    }

    async fn load(path: &Path) -> Result<HashMap<Uuid, MediaAsset>> {
        if !fs::try_exists(path).await? {
            return Ok(HashMap::new());
        }

        let content = fs::read(path)
            .await
            .with_context(|| format!("leyendo {}", path.display()))?;
        let list: Vec<MediaAsset> = serde_json::from_slice(&content)
            .with_context(|| format!("catálogo corrupto en {}", path.display()))?;

        Ok(list.into_iter().map(|asset| (asset.id, asset)).collect())
    }

    async fn persist(&self, assets: &HashMap<Uuid, MediaAsset>) -> Result<()> {
        let mut list: Vec<&MediaAsset> = assets.values().collect();
        list.sort_by_key(|asset| asset.id);
        let content = serde_json::to_vec_pretty(&list)?;

        let dir = self.data_dir.clone();
        let target = self.file_path();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&content)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target)?;
            Ok(())
        })
        .await??;

        debug!("💾 Catálogo guardado ({} entradas)", assets.len());
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for JsonCatalog {
    async fn find_by_url(&self, url: &str) -> Result<Option<MediaAsset>> {
        let assets = self.assets.read().await;
        Ok(assets.values().find(|asset| asset.url == url).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<MediaAsset>> {
        Ok(self.assets.read().await.get(&id).cloned())
    }

    async fn insert_if_absent(&self, asset: MediaAsset) -> Result<(MediaAsset, bool)> {
        let mut assets = self.assets.write().await;

        if let Some(existing) = assets.values().find(|a| a.url == asset.url) {
            return Ok((existing.clone(), false));
        }

        assets.insert(asset.id, asset.clone());
        if let Err(e) = self.persist(&assets).await {
            assets.remove(&asset.id);
            return Err(e);
        }

        info!("📝 Nuevo asset en catálogo: {} ({})", asset.title, asset.url);
        Ok((asset, true))
    }

    async fn update(&self, asset: &MediaAsset) -> Result<()> {
        let mut assets = self.assets.write().await;

        let previous = match assets.get_mut(&asset.id) {
            Some(slot) => std::mem::replace(slot, asset.clone()),
            None => anyhow::bail!("asset {} no existe en el catálogo", asset.id),
        };

        if let Err(e) = self.persist(&assets).await {
            assets.insert(previous.id, previous);
            return Err(e);
        }

        Ok(())
    }

    async fn list(&self, filter: AssetFilter) -> Result<Vec<MediaAsset>> {
        let assets = self.assets.read().await;
        Ok(assets.values().filter(|asset| filter.matches(asset)).cloned().collect())
    }
}

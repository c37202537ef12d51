use anyhow::Result;
use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{AssetFilter, CatalogStore};

/// Barre `media_dir` cada `interval` hasta que se cancele `shutdown`.
pub async fn run(
    catalog: Arc<dyn CatalogStore>,
    media_dir: impl AsRef<Path>,
    interval: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }

        let removed = sweep(catalog.as_ref(), media_dir.as_ref()).await?;
        if removed > 0 {
            info!("🧹 Janitor eliminó {} archivos huérfanos", removed);
        }
    }
}

/// Elimina los archivos cuyo nombre base no corresponde a ningún asset.
///
/// Con el catálogo vacío no borra nada: un catálogo que no cargó no debe
/// vaciar el directorio de medios.
pub async fn sweep(catalog: &dyn CatalogStore, media_dir: &Path) -> Result<usize> {
    let assets = catalog.list(AssetFilter::All).await?;
    if assets.is_empty() {
        debug!("Janitor: catálogo vacío, nada que hacer");
        return Ok(0);
    }

    let known: HashSet<String> = assets.iter().map(|asset| asset.file_stem()).collect();

    let mut removed = 0;
    let mut entries = fs::read_dir(media_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let stem = name.split('.').next().unwrap_or("");

        if known.contains(stem) || !entry.file_type().await?.is_file() {
            continue;
        }

        match fs::remove_file(entry.path()).await {
            Ok(()) => {
                debug!("🗑️ Janitor: {}", name);
                removed += 1;
            }
            Err(e) => warn!("Janitor no pudo eliminar {}: {}", name, e),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{catalog::MediaAsset, storage::JsonCatalog};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_sweep_removes_only_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();

        let catalog = JsonCatalog::new(dir.path().join("data")).await.unwrap();
        let (asset, _) = catalog
            .insert_if_absent(MediaAsset::new(1, "a".into(), "https://x/a".into(), Duration::ZERO))
            .await
            .unwrap();

        let stem = asset.file_stem();
        std::fs::write(media.join(format!("{}.ro", stem)), b"frames").unwrap();
        std::fs::write(media.join(format!("{}.wav", stem)), b"wav").unwrap();
        std::fs::write(media.join("huerfano.ro"), b"x").unwrap();
        std::fs::write(media.join("otro.wav"), b"x").unwrap();
        std::fs::create_dir_all(media.join("subdir")).unwrap();

        assert_eq!(sweep(&catalog, &media).await.unwrap(), 2);

        let mut left: Vec<String> = std::fs::read_dir(&media)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        let mut expected = vec![format!("{}.ro", stem), format!("{}.wav", stem), "subdir".to_string()];
        expected.sort();
        assert_eq!(left, expected);
    }

    #[tokio::test]
    async fn test_sweep_with_empty_catalog_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(media.join("algo.ro"), b"x").unwrap();

        let catalog = JsonCatalog::new(dir.path().join("data")).await.unwrap();
        assert_eq!(sweep(&catalog, &media).await.unwrap(), 0);
        assert!(media.join("algo.ro").exists());
    }
}

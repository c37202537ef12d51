use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{audio::connection::Connection, catalog::CatalogStore};

/// Espera a que el asset quede procesado y lo pasa a la playlist.
///
/// Termina al promoverlo, cuando la adquisición se da por fallida, si el
/// asset desaparece del catálogo, o cuando la conexión se cierra.
pub async fn wait_for_asset(
    conn: Arc<Connection>,
    catalog: Arc<dyn CatalogStore>,
    asset_id: Uuid,
    poll: Duration,
) {
    let shutdown = conn.shutdown_token();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Waiter de {} cancelado", asset_id);
                return;
            }
            _ = tokio::time::sleep(poll) => {}
        }

        let current = match catalog.find_by_id(asset_id).await {
            Ok(current) => current,
            Err(e) => {
                warn!("Waiter no pudo leer el catálogo: {:?}", e);
                continue;
            }
        };

        let Some(asset) = current else {
            warn!("⚠️ {} ya no existe en el catálogo", asset_id);
            conn.queue().write().drop_pending(asset_id);
            return;
        };

        if asset.processed {
            let title = asset.title.clone();
            if conn.queue().write().promote(asset) {
                info!("☑️ Listo para reproducir: {}", title);
                conn.link()
                    .notifier
                    .notify(
                        conn.text_channel(),
                        &format!("☑️ `{}` terminó de descargarse 😃", title),
                    )
                    .await;
            }
            return;
        }

        if asset.failed {
            conn.queue().write().drop_pending(asset_id);
            conn.link()
                .notifier
                .notify(
                    conn.text_channel(),
                    &format!("❌ No pude descargar `{}` 😦", asset.title),
                )
                .await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::testing::{test_link, wait_until},
        catalog::MediaAsset,
        storage::JsonCatalog,
    };
    use serenity::all::{ChannelId, GuildId};

    async fn setup() -> (tempfile::TempDir, Arc<JsonCatalog>, MediaAsset) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(JsonCatalog::new(dir.path().to_path_buf()).await.unwrap());
        let (asset, _) = catalog
            .insert_if_absent(MediaAsset::new(1, "Lenta".into(), "https://x/lenta".into(), Duration::ZERO))
            .await
            .unwrap();
        (dir, catalog, asset)
    }

    #[tokio::test]
    async fn test_failed_asset_leaves_pending() {
        let (_dir, catalog, asset) = setup().await;
        let t = test_link(Some(1), Duration::ZERO);
        let conn = Connection::new(GuildId::new(1), ChannelId::new(2), t.link);
        conn.queue().write().push_pending(asset.clone());

        let mut failed = asset.clone();
        failed.failed = true;
        catalog.update(&failed).await.unwrap();

        wait_for_asset(conn.clone(), catalog, asset.id, Duration::from_millis(5)).await;
        assert_eq!(conn.queue().read().pending_len(), 0);
        assert_eq!(conn.queue().read().playlist_len(), 0);
        assert!(t.notifier.contains("No pude descargar"));
    }

    #[tokio::test]
    async fn test_closed_connection_stops_waiting() {
        let (_dir, catalog, asset) = setup().await;
        let t = test_link(Some(1), Duration::ZERO);
        let conn = Connection::new(GuildId::new(1), ChannelId::new(2), t.link);
        conn.queue().write().push_pending(asset.clone());

        let waiter = tokio::spawn(wait_for_asset(
            conn.clone(),
            catalog,
            asset.id,
            Duration::from_millis(5),
        ));
        conn.close();

        wait_until(Duration::from_secs(5), || waiter.is_finished()).await;
        assert_eq!(conn.queue().read().pending_len(), 1);
    }
}

use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::audio::{connection::Connection, player::MusicPlayer};

/// Vigila el canal de voz y sale cuando no queda ningún humano.
pub async fn watch(player: Arc<MusicPlayer>, conn: Arc<Connection>, interval: Duration) -> Result<()> {
    let shutdown = conn.shutdown_token();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }

        match conn.link().presence.human_listeners().await {
            Some(0) => {
                info!("👋 Canal vacío en guild {}, saliendo", conn.guild_id());
                player.auto_leave(&conn).await;
                return Ok(());
            }
            Some(listeners) => debug!("{} oyentes en guild {}", listeners, conn.guild_id()),
            None => debug!("No se pudo contar oyentes en guild {}", conn.guild_id()),
        }
    }
}

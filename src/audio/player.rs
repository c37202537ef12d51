use dashmap::DashMap;
use serenity::all::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    connection::{Connection, ConnectionSnapshot, Control, DriverGuard, VoiceLink},
    driver,
    occupancy::VoiceOccupancy,
    queue::PendingInsert,
};
use crate::{
    catalog::{self, AssetFilter, CatalogStore, MediaAsset},
    config::{Config, Timings},
    error::{MusicError, MusicResult},
    sources::{self, MediaResolver},
    tasks,
};

#[derive(Debug, Clone, Copy)]
pub struct PlayerSettings {
    pub max_duration: Duration,
    pub timings: Timings,
}

impl PlayerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_duration: config.max_duration(),
            timings: config.timings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    Resumed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// Ya procesado: directo a la playlist
    Ready(MediaAsset),
    /// Esperando la adquisición
    Queued(MediaAsset),
    /// Ya estaba en la cola de descargas de esta conexión
    AlreadyQueued(MediaAsset),
}

/// Registro de conexiones y punto de entrada de todos los comandos.
pub struct MusicPlayer {
    connections: DashMap<GuildId, Arc<Connection>>,
    catalog: Arc<dyn CatalogStore>,
    resolver: Arc<dyn MediaResolver>,
    occupancy: Arc<VoiceOccupancy>,
    settings: PlayerSettings,
}

impl MusicPlayer {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        resolver: Arc<dyn MediaResolver>,
        occupancy: Arc<VoiceOccupancy>,
        settings: PlayerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
            catalog,
            resolver,
            occupancy,
            settings,
        })
    }

    pub fn occupancy(&self) -> &Arc<VoiceOccupancy> {
        &self.occupancy
    }

    pub fn connection(&self, guild_id: GuildId) -> MusicResult<Arc<Connection>> {
        self.connections
            .get(&guild_id)
            .map(|conn| Arc::clone(conn.value()))
            .ok_or(MusicError::NotConnected)
    }

    pub fn is_connected(&self, guild_id: GuildId) -> bool {
        self.connections.contains_key(&guild_id)
    }

    /// Registra la conexión de la guild e inicia su vigilancia de canal vacío.
    ///
    /// Si ya existe una conexión se devuelve esa y `link` se descarta.
    pub fn join(self: &Arc<Self>, guild_id: GuildId, text_channel: ChannelId, link: VoiceLink) -> Arc<Connection> {
        let mut created = None;
        let conn = self
            .connections
            .entry(guild_id)
            .or_insert_with(|| {
                let conn = Connection::new(guild_id, text_channel, link);
                created = Some(Arc::clone(&conn));
                conn
            })
            .clone();

        if let Some(conn) = created {
            info!("🔊 Conectado en guild {}", guild_id);
            self.spawn_auto_leave(conn);
        }
        conn
    }

    pub async fn leave(&self, guild_id: GuildId) -> MusicResult<()> {
        let (_, conn) = self
            .connections
            .remove(&guild_id)
            .ok_or(MusicError::NotConnected)?;

        info!("👋 Saliendo del canal de voz en guild {}", guild_id);
        self.teardown(&conn).await;
        Ok(())
    }

    /// Salida por canal vacío.
    pub async fn auto_leave(&self, conn: &Arc<Connection>) {
        let removed = self
            .connections
            .remove_if(&conn.guild_id(), |_, current| Arc::ptr_eq(current, conn))
            .is_some();
        if !removed {
            debug!("La conexión de guild {} ya no estaba registrada", conn.guild_id());
        }

        self.teardown(conn).await;
        conn.link()
            .notifier
            .notify(conn.text_channel(), "¿A dónde se fueron todos? 😦")
            .await;
    }

    async fn teardown(&self, conn: &Connection) {
        conn.close();
        if let Err(e) = conn.link().transport.disconnect().await {
            warn!("Error al desconectar la voz en guild {}: {:?}", conn.guild_id(), e);
        }
        self.occupancy.free(conn.guild_id());
    }

    /// Inicia el driver, o lo reanuda si ya hay uno.
    pub fn play(&self, guild_id: GuildId) -> MusicResult<PlayOutcome> {
        let conn = self.connection(guild_id)?;

        let (playlist_len, pending) = {
            let queue = conn.queue().read();
            (queue.playlist_len(), queue.pending_len())
        };
        if playlist_len == 0 {
            return Err(MusicError::EmptyPlaylist { pending });
        }

        match conn.claim_driver() {
            Some(guard) => {
                self.spawn_driver(guard);
                Ok(PlayOutcome::Started)
            }
            None => {
                conn.send_control(Control::Resume)?;
                debug!("⏯️ Driver ya activo en guild {} (época {})", guild_id, conn.generation());
                Ok(PlayOutcome::Resumed)
            }
        }
    }

    pub fn pause(&self, guild_id: GuildId) -> MusicResult<()> {
        self.connection(guild_id)?.send_control(Control::Pause)
    }

    pub fn skip(&self, guild_id: GuildId) -> MusicResult<()> {
        self.connection(guild_id)?.send_control(Control::Skip)
    }

    pub fn stop(&self, guild_id: GuildId) -> MusicResult<()> {
        let conn = self.connection(guild_id)?;
        let had_driver = conn.has_driver();
        conn.stop();
        info!("⏹️ Reproducción detenida en guild {} (driver activo: {})", guild_id, had_driver);
        Ok(())
    }

    pub fn now_playing(&self, guild_id: GuildId) -> MusicResult<MediaAsset> {
        let conn = self.connection(guild_id)?;
        let queue = conn.queue().read();
        if !queue.is_playing() {
            return Err(MusicError::NotPlaying);
        }
        queue.head().cloned().ok_or(MusicError::NotPlaying)
    }

    pub fn playlist(&self, guild_id: GuildId) -> MusicResult<Vec<MediaAsset>> {
        Ok(self.connection(guild_id)?.queue().read().playlist())
    }

    pub fn pending(&self, guild_id: GuildId) -> MusicResult<Vec<MediaAsset>> {
        Ok(self.connection(guild_id)?.queue().read().pending())
    }

    /// Agrega un link a la conexión.
    ///
    /// Un link ya procesado va directo a la playlist; uno nuevo se valida,
    /// se registra sin procesar y queda esperando a la adquisición.
    pub async fn add(
        &self,
        guild_id: GuildId,
        requester: u64,
        raw_link: &str,
        privileged: bool,
    ) -> MusicResult<AddOutcome> {
        let conn = self.connection(guild_id)?;
        let url = sources::normalize_link(raw_link)?;

        if let Some(known) = self.catalog.find_by_url(&url).await? {
            debug!("💾 Cache hit: {}", known.title);
            return self.enqueue(&conn, known).await;
        }

        let probe = self.resolver.probe(&url).await?;
        let asset = probe.into_asset(requester, url, self.settings.max_duration, privileged)?;
        let (stored, inserted) = self.catalog.insert_if_absent(asset).await?;
        if inserted {
            info!("🆕 Nuevo asset en el catálogo: {} ({})", stored.title, stored.url);
        }

        self.enqueue(&conn, stored).await
    }

    async fn enqueue(&self, conn: &Arc<Connection>, mut asset: MediaAsset) -> MusicResult<AddOutcome> {
        if asset.processed {
            conn.queue().write().push_ready(asset.clone());
            return Ok(AddOutcome::Ready(asset));
        }

        // Pedirlo de nuevo le da otra oportunidad a una adquisición descartada
        if asset.failed {
            info!("🔁 Reintentando adquisición descartada: {}", asset.title);
            asset.failed = false;
            asset.attempts = 0;
            asset.next_attempt_at = None;
            self.catalog.update(&asset).await?;
        }

        let inserted = conn.queue().write().push_pending(asset.clone());
        match inserted {
            PendingInsert::Queued => {
                self.spawn_waiter(conn, asset.id);
                Ok(AddOutcome::Queued(asset))
            }
            PendingInsert::AlreadyPending | PendingInsert::AlreadyInPlaylist => {
                Ok(AddOutcome::AlreadyQueued(asset))
            }
        }
    }

    /// Agrega un asset procesado al azar que no esté ya en la playlist.
    pub async fn random(&self, guild_id: GuildId) -> MusicResult<MediaAsset> {
        let conn = self.connection(guild_id)?;
        let candidates = self.catalog.list(AssetFilter::Processed).await?;

        let mut queue = conn.queue().write();
        let pick = catalog::pick_random(&candidates, &queue.playlist_ids())?;
        queue.push_ready(pick.clone());
        Ok(pick)
    }

    pub async fn search(&self, query: &str) -> MusicResult<Vec<MediaAsset>> {
        let candidates = self.catalog.list(AssetFilter::Processed).await?;
        catalog::search(&candidates, query)
    }

    pub fn snapshot(&self, guild_id: GuildId) -> MusicResult<ConnectionSnapshot> {
        Ok(self.connection(guild_id)?.snapshot())
    }

    fn spawn_driver(&self, guard: DriverGuard) {
        let conn = guard.connection();
        let name = format!("driver {} #{}", conn.guild_id(), guard.epoch().generation);
        let token = guard.epoch().token.clone();
        let timings = self.settings.timings;

        let guard = Arc::new(guard);
        tokio::spawn(tasks::supervise(name, timings.restart_delay, token, move || {
            let guard = Arc::clone(&guard);
            async move { driver::run(&guard, timings.driver_idle_poll).await }
        }));
    }

    fn spawn_auto_leave(self: &Arc<Self>, conn: Arc<Connection>) {
        let name = format!("auto-leave {}", conn.guild_id());
        let token = conn.shutdown_token();
        let timings = self.settings.timings;
        let player = Arc::clone(self);

        tokio::spawn(tasks::supervise(name, timings.restart_delay, token, move || {
            tasks::auto_leave::watch(
                Arc::clone(&player),
                Arc::clone(&conn),
                timings.auto_leave_interval,
            )
        }));
    }

    fn spawn_waiter(&self, conn: &Arc<Connection>, asset_id: Uuid) {
        tokio::spawn(tasks::waiter::wait_for_asset(
            Arc::clone(conn),
            Arc::clone(&self.catalog),
            asset_id,
            self.settings.timings.waiter_poll,
        ));
    }
}

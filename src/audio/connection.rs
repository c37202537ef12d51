use parking_lot::{Mutex, RwLock};
use serenity::all::{ChannelId, GuildId};
use std::{fmt, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{
    queue::MusicQueue,
    transport::{Notifier, VoicePresence, VoiceTransport},
};
use crate::error::{MusicError, MusicResult};

/// Mensajes de control para el driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Skip,
    Pause,
    Resume,
}

const CONTROL_CAPACITY: usize = 8;

/// Lo que la conexión necesita del mundo exterior
#[derive(Clone)]
pub struct VoiceLink {
    pub transport: Arc<dyn VoiceTransport>,
    pub presence: Arc<dyn VoicePresence>,
    pub notifier: Arc<dyn Notifier>,
}

/// Señales de una época de reproducción.
///
/// Stop no reutiliza las señales: cancela la época actual y crea otra. Un
/// driver o sender que aún apunte a la época vieja la ve como cancelada.
struct Epoch {
    generation: u64,
    token: CancellationToken,
    control_tx: mpsc::Sender<Control>,
    control_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Control>>>,
    /// Época que posee el driver actual, si hay uno
    driver: Option<u64>,
    /// Asset que el driver de esta época está enviando ahora
    streaming: Option<Uuid>,
}

impl Epoch {
    fn new(generation: u64, parent: &CancellationToken, driver: Option<u64>) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        Self {
            generation,
            token: parent.child_token(),
            control_tx,
            control_rx: Arc::new(tokio::sync::Mutex::new(control_rx)),
            driver,
            streaming: None,
        }
    }
}

/// Lo que recibe un driver al obtener la propiedad de una época.
pub struct EpochHandle {
    pub generation: u64,
    pub token: CancellationToken,
    pub control: Arc<tokio::sync::Mutex<mpsc::Receiver<Control>>>,
}

/// Conexión de voz de una guild.
pub struct Connection {
    guild_id: GuildId,
    text_channel: ChannelId,
    link: VoiceLink,
    queue: RwLock<MusicQueue>,
    epoch: Mutex<Epoch>,
    /// Se cierra al salir del canal; despierta a todas las tareas
    shutdown: CancellationToken,
    /// Solo un driver escribe en el transporte a la vez
    voice_lane: tokio::sync::Mutex<()>,
}

impl Connection {
    pub fn new(guild_id: GuildId, text_channel: ChannelId, link: VoiceLink) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let epoch = Epoch::new(0, &shutdown, None);

        Arc::new(Self {
            guild_id,
            text_channel,
            link,
            queue: RwLock::new(MusicQueue::new()),
            epoch: Mutex::new(epoch),
            shutdown,
            voice_lane: tokio::sync::Mutex::new(()),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn text_channel(&self) -> ChannelId {
        self.text_channel
    }

    pub fn link(&self) -> &VoiceLink {
        &self.link
    }

    pub fn queue(&self) -> &RwLock<MusicQueue> {
        &self.queue
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn generation(&self) -> u64 {
        self.epoch.lock().generation
    }

    pub(crate) fn voice_lane(&self) -> &tokio::sync::Mutex<()> {
        &self.voice_lane
    }

    /// Intenta obtener la propiedad del driver para la época actual.
    ///
    /// Tiene éxito una sola vez por época; el guard la libera al soltarse.
    pub fn claim_driver(self: &Arc<Self>) -> Option<DriverGuard> {
        let mut epoch = self.epoch.lock();
        if self.shutdown.is_cancelled() || epoch.driver == Some(epoch.generation) {
            return None;
        }

        epoch.driver = Some(epoch.generation);
        debug!(
            "🎛️ Driver adquirido en guild {} (época {})",
            self.guild_id, epoch.generation
        );

        Some(DriverGuard {
            connection: Arc::clone(self),
            handle: EpochHandle {
                generation: epoch.generation,
                token: epoch.token.clone(),
                control: Arc::clone(&epoch.control_rx),
            },
        })
    }

    pub fn has_driver(&self) -> bool {
        let epoch = self.epoch.lock();
        epoch.driver == Some(epoch.generation)
    }

    /// Sender de control de la época actual
    #[cfg(test)]
    pub fn control(&self) -> mpsc::Sender<Control> {
        self.epoch.lock().control_tx.clone()
    }

    /// Envía un mensaje al driver de la época actual.
    ///
    /// Skip y Pause solo se aceptan mientras un asset se está enviando; un
    /// driver ocioso no tiene nada que saltar ni pausar.
    pub fn send_control(&self, control: Control) -> MusicResult<()> {
        let tx = {
            let epoch = self.epoch.lock();
            if epoch.driver != Some(epoch.generation) {
                return Err(MusicError::NotPlaying);
            }
            if control != Control::Resume && epoch.streaming.is_none() {
                return Err(MusicError::NotPlaying);
            }
            epoch.control_tx.clone()
        };

        tx.try_send(control).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => MusicError::NotPlaying,
            mpsc::error::TrySendError::Full(_) => {
                MusicError::Internal(anyhow::anyhow!("demasiados controles pendientes"))
            }
        })
    }

    /// Stop: invalida la época actual, vacía la playlist.
    pub fn stop(&self) {
        {
            let mut epoch = self.epoch.lock();
            epoch.token.cancel();
            let next = Epoch::new(epoch.generation + 1, &self.shutdown, epoch.driver);
            *epoch = next;
        }
        self.queue.write().clear_playlist();
    }

    /// Leave: cierra todas las señales de la conexión.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn release_driver(&self, generation: u64) {
        let mut epoch = self.epoch.lock();
        if epoch.driver == Some(generation) {
            epoch.driver = None;
            epoch.streaming = None;
        }
    }

    /// Marca el asset en curso; ignorado si la época ya cambió.
    pub(crate) fn set_streaming(&self, generation: u64, asset: Option<Uuid>) {
        let mut epoch = self.epoch.lock();
        if epoch.generation == generation {
            epoch.streaming = asset;
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let queue = self.queue.read();
        let epoch = self.epoch.lock();
        ConnectionSnapshot {
            guild_id: self.guild_id,
            text_channel: self.text_channel,
            generation: epoch.generation,
            driver_generation: epoch.driver,
            streaming: epoch.streaming,
            playing: queue.is_playing(),
            closed: self.shutdown.is_cancelled(),
            playlist: queue.playlist().into_iter().map(|a| a.title).collect(),
            pending: queue.pending().into_iter().map(|a| a.title).collect(),
        }
    }
}

/// Propiedad del driver; se libera al soltarse.
pub struct DriverGuard {
    connection: Arc<Connection>,
    handle: EpochHandle,
}

impl DriverGuard {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn epoch(&self) -> &EpochHandle {
        &self.handle
    }
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.connection.release_driver(self.handle.generation);
        debug!(
            "🎛️ Driver liberado en guild {} (época {})",
            self.connection.guild_id, self.handle.generation
        );
    }
}

/// Estado interno para el comando de depuración
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub guild_id: GuildId,
    pub text_channel: ChannelId,
    pub generation: u64,
    pub driver_generation: Option<u64>,
    pub streaming: Option<Uuid>,
    pub playing: bool,
    pub closed: bool,
    pub playlist: Vec<String>,
    pub pending: Vec<String>,
}

impl fmt::Display for ConnectionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#?}", self)
    }
}

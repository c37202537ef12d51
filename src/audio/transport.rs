use anyhow::Result;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex as SyncMutex;
use serenity::{
    all::{Cache, ChannelId, GuildId, Http, UserId},
    builder::CreateMessage,
};
use songbird::{
    input::{AudioStream, Input, LiveInput},
    Call, Songbird,
};
use std::{io, sync::Arc, time::Duration};
use symphonia::core::{io::MediaSource, probe::Hint};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Duración de un frame opus de Discord
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Frame opus de silencio
pub const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Salida de audio de un canal de voz.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn is_ready(&self) -> bool;

    /// Indicador de "hablando"; se activa al empezar un audio y se apaga al terminar.
    async fn set_speaking(&self, speaking: bool) -> Result<()>;

    /// Envía un frame; espera mientras el buffer de salida esté lleno.
    async fn send_frame(&self, frame: Bytes) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Cuenta los oyentes humanos del canal de voz del bot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoicePresence: Send + Sync {
    /// `None` si no se puede determinar (canal o guild fuera de caché).
    async fn human_listeners(&self) -> Option<usize>;
}

/// Avisos de texto al canal desde donde se creó la conexión.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: ChannelId, content: &str);
}

/// Transporte sobre songbird.
///
/// Cada audio es una pista en vivo con formato DCA1 que songbird reproduce
/// en modo passthrough: los frames ya están codificados en opus. El canal
/// acotado entre `send_frame` y la pista es el buffer de salida.
pub struct SongbirdTransport {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    buffer_frames: usize,
    sink: SyncMutex<Option<flume::Sender<Bytes>>>,
}

impl SongbirdTransport {
    pub fn new(
        guild_id: GuildId,
        manager: Arc<Songbird>,
        call: Arc<Mutex<Call>>,
        buffer_frames: usize,
    ) -> Self {
        Self {
            guild_id,
            manager,
            call,
            buffer_frames,
            sink: SyncMutex::new(None),
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn is_ready(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn set_speaking(&self, speaking: bool) -> Result<()> {
        if !speaking {
            // Cerrar el sender termina la pista con EOF
            self.sink.lock().take();
            return Ok(());
        }

        let (tx, rx) = flume::bounded(self.buffer_frames);
        let input = frame_stream_input(rx);

        let mut call = self.call.lock().await;
        call.play_only_input(input);
        *self.sink.lock() = Some(tx);

        debug!("🔊 Nueva pista de frames en guild {}", self.guild_id);
        Ok(())
    }

    async fn send_frame(&self, frame: Bytes) -> Result<()> {
        let sink = self
            .sink
            .lock()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no hay pista activa en guild {}", self.guild_id))?;

        sink.send_async(frame)
            .await
            .map_err(|_| anyhow::anyhow!("la pista de guild {} se cerró", self.guild_id))
    }

    async fn disconnect(&self) -> Result<()> {
        self.sink.lock().take();
        self.manager.remove(self.guild_id).await?;
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        Ok(())
    }
}

/// Crea la entrada de songbird alimentada por el canal de frames.
fn frame_stream_input(frames: flume::Receiver<Bytes>) -> Input {
    let mut hint = Hint::new();
    hint.with_extension("dca");

    let source: Box<dyn MediaSource> = Box::new(FrameStreamSource::new(frames));
    Input::Live(
        LiveInput::Raw(AudioStream {
            input: source,
            hint: Some(hint),
        }),
        None,
    )
}

/// Adaptador `Read` que serializa los frames recibidos como DCA1.
///
/// Si no llega ningún frame durante un periodo de frame entrega silencio,
/// así una pausa nunca bloquea el mixer. Cuando el sender se cierra
/// devuelve EOF.
struct FrameStreamSource {
    frames: flume::Receiver<Bytes>,
    pending: BytesMut,
    finished: bool,
}

impl FrameStreamSource {
    fn new(frames: flume::Receiver<Bytes>) -> Self {
        Self {
            frames,
            pending: dca_header(),
            finished: false,
        }
    }

    fn push_frame(&mut self, frame: &[u8]) {
        self.pending.put_i16_le(frame.len() as i16);
        self.pending.put_slice(frame);
    }
}

fn dca_header() -> BytesMut {
    let metadata = serde_json::json!({
        "dca": {
            "version": 1,
            "tool": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION"), "url": null, "author": null }
        },
        "opus": {
            "mode": "music",
            "sample_rate": 48000,
            "frame_size": 960,
            "abr": null,
            "vbr": true,
            "channels": 2
        },
        "info": null,
        "origin": null,
        "extra": null
    });
    let metadata = metadata.to_string();

    let mut header = BytesMut::with_capacity(8 + metadata.len());
    header.put_slice(b"DCA1");
    header.put_i32_le(metadata.len() as i32);
    header.put_slice(metadata.as_bytes());
    header
}

impl io::Read for FrameStreamSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() && !self.finished {
            match self.frames.recv_timeout(FRAME_DURATION) {
                Ok(frame) => self.push_frame(&frame),
                Err(flume::RecvTimeoutError::Timeout) => self.push_frame(&SILENCE_FRAME),
                Err(flume::RecvTimeoutError::Disconnected) => self.finished = true,
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

impl io::Seek for FrameStreamSource {
    fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "stream en vivo"))
    }
}

impl MediaSource for FrameStreamSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Presencia leída de la caché de serenity.
pub struct SerenityPresence {
    guild_id: GuildId,
    bot_id: UserId,
    cache: Arc<Cache>,
    call: Arc<Mutex<Call>>,
}

impl SerenityPresence {
    pub fn new(guild_id: GuildId, bot_id: UserId, cache: Arc<Cache>, call: Arc<Mutex<Call>>) -> Self {
        Self {
            guild_id,
            bot_id,
            cache,
            call,
        }
    }
}

#[async_trait]
impl VoicePresence for SerenityPresence {
    async fn human_listeners(&self) -> Option<usize> {
        let channel = self.call.lock().await.current_channel()?;
        let channel_id = ChannelId::from(channel.0);

        let guild = self.cache.guild(self.guild_id)?;
        let count = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .filter(|state| state.user_id != self.bot_id)
            .filter(|state| !state.member.as_ref().is_some_and(|m| m.user.bot))
            .count();

        Some(count)
    }
}

/// Envía avisos por HTTP.
pub struct HttpNotifier {
    http: Arc<Http>,
}

impl HttpNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, channel: ChannelId, content: &str) {
        if let Err(e) = channel
            .send_message(&self.http, CreateMessage::new().content(content))
            .await
        {
            warn!("No se pudo enviar aviso a {}: {:?}", channel, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Read;

    fn read_all(source: &mut FrameStreamSource) -> Vec<u8> {
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_stream_starts_with_dca_header_and_frames() {
        let (tx, rx) = flume::bounded(4);
        tx.send(Bytes::from_static(b"opus")).unwrap();
        drop(tx);

        let mut source = FrameStreamSource::new(rx);
        let bytes = read_all(&mut source);

        assert_eq!(&bytes[..4], b"DCA1");
        let meta_len = i32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let meta: serde_json::Value = serde_json::from_slice(&bytes[8..8 + meta_len]).unwrap();
        assert_eq!(meta["opus"]["sample_rate"], 48000);

        let body = &bytes[8 + meta_len..];
        assert_eq!(body, &[4, 0, b'o', b'p', b'u', b's']);
    }

    #[test]
    fn test_idle_stream_yields_silence() {
        let (_tx, rx) = flume::bounded::<Bytes>(1);
        let mut source = FrameStreamSource::new(rx);
        source.pending.clear();

        let mut buf = [0u8; 16];
        let n = source.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[3, 0, 0xF8, 0xFF, 0xFE]);
    }

    #[test]
    fn test_source_is_not_seekable() {
        let (_tx, rx) = flume::bounded::<Bytes>(1);
        let mut source = FrameStreamSource::new(rx);
        assert!(!source.is_seekable());
        assert!(io::Seek::seek(&mut source, io::SeekFrom::Start(0)).is_err());
    }
}

//! Dobles de prueba para el transporte de voz, los avisos y el resolver.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::all::ChannelId;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{
    connection::VoiceLink,
    frames::FrameWriter,
    transport::{MockVoicePresence, Notifier, VoiceTransport},
};
use crate::{
    catalog::MediaAsset,
    config::Timings,
    error::{MusicError, MusicResult},
    sources::{MediaResolver, ProbeInfo},
};

/// Guarda todo lo que el driver envía.
pub struct RecordingTransport {
    pub ready: AtomicBool,
    pub frames: Mutex<Vec<Bytes>>,
    pub speaking: Mutex<Vec<bool>>,
    pub disconnects: AtomicUsize,
    frame_delay: Duration,
}

impl RecordingTransport {
    pub fn new(frame_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(true),
            frames: Mutex::new(Vec::new()),
            speaking: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            frame_delay,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Frames recibidos con la etiqueta de asset dada
    pub fn frames_tagged(&self, tag: u8) -> Vec<u16> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f[0] == tag)
            .map(|f| u16::from_be_bytes([f[1], f[2]]))
            .collect()
    }

    pub fn speaking_starts(&self) -> usize {
        self.speaking.lock().iter().filter(|s| **s).count()
    }
}

#[async_trait]
impl VoiceTransport for RecordingTransport {
    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn set_speaking(&self, speaking: bool) -> Result<()> {
        self.speaking.lock().push(speaking);
        Ok(())
    }

    async fn send_frame(&self, frame: Bytes) -> Result<()> {
        tokio::time::sleep(self.frame_delay).await;
        self.frames.lock().push(frame);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, _channel: ChannelId, content: &str) {
        self.messages.lock().push(content.to_string());
    }
}

/// Resolver con respuestas fijas por URL.
#[derive(Default)]
pub struct StaticResolver {
    pub answers: Mutex<HashMap<String, ProbeInfo>>,
    pub probes: AtomicUsize,
}

impl StaticResolver {
    pub fn with(self, url: &str, title: &str, secs: f64) -> Self {
        self.answers.lock().insert(
            url.to_string(),
            ProbeInfo {
                title: Some(title.to_string()),
                duration: Some(secs),
                is_live: Some(false),
                kind: Some("video".to_string()),
            },
        );
        self
    }
}

#[async_trait]
impl MediaResolver for StaticResolver {
    async fn probe(&self, url: &str) -> MusicResult<ProbeInfo> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.answers
            .lock()
            .get(url)
            .cloned()
            .ok_or(MusicError::InvalidLink)
    }
}

pub struct TestLink {
    pub link: VoiceLink,
    pub transport: Arc<RecordingTransport>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Enlace con presencia fija de oyentes.
pub fn test_link(listeners: Option<usize>, frame_delay: Duration) -> TestLink {
    let transport = RecordingTransport::new(frame_delay);
    let notifier = Arc::new(RecordingNotifier::default());

    let mut presence = MockVoicePresence::new();
    presence
        .expect_human_listeners()
        .returning(move || listeners);

    TestLink {
        link: VoiceLink {
            transport: transport.clone(),
            presence: Arc::new(presence),
            notifier: notifier.clone(),
        },
        transport,
        notifier,
    }
}

pub fn fast_timings() -> Timings {
    Timings {
        acquisition_poll: Duration::from_millis(10),
        waiter_poll: Duration::from_millis(10),
        janitor_interval: Duration::from_millis(10),
        auto_leave_interval: Duration::from_millis(10),
        driver_idle_poll: Duration::from_millis(5),
        restart_delay: Duration::from_millis(10),
    }
}

/// Escribe un archivo de frames `[tag, idx_hi, idx_lo]`.
pub async fn write_frame_file(dir: &Path, tag: u8, count: u16) -> PathBuf {
    let path = dir.join(format!("asset-{}.ro", tag));
    let file = tokio::fs::File::create(&path).await.unwrap();
    let mut writer = FrameWriter::new(tokio::io::BufWriter::new(file));
    for i in 0..count {
        let [hi, lo] = i.to_be_bytes();
        writer.write_frame(&[tag, hi, lo]).await.unwrap();
    }
    writer.finish().await.unwrap();
    path
}

/// Asset procesado con un archivo de `count` frames.
pub async fn ready_asset(dir: &Path, tag: u8, count: u16) -> MediaAsset {
    let mut asset = MediaAsset::new(
        1,
        format!("pista {}", tag),
        format!("https://example.com/{}", tag),
        Duration::from_secs(60),
    );
    asset.processed = true;
    asset.path = Some(write_frame_file(dir, tag, count).await);
    asset
}

/// Espera hasta que `cond` se cumpla o falla el test.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "la condición no se cumplió a tiempo"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

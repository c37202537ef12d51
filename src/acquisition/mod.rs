//! # Acquisition Module
//!
//! Background worker that turns unprocessed catalog entries into playable
//! frame files.
//!
//! A single worker polls the catalog on a fixed interval and handles due
//! assets **one at a time**:
//!
//! 1. download + extract audio with yt-dlp into `<media>/<stem>.wav`
//! 2. decode with ffmpeg to raw PCM and stream it into the opus encoder
//! 3. validate the encoder output while writing `<media>/<stem>.ro`
//! 4. delete the WAV and mark the asset as processed
//!
//! Failures leave the asset unprocessed and schedule a retry with
//! exponential backoff; after [`RetryPolicy::max_attempts`] the asset is
//! marked as failed and ignored.

pub mod transcode;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    catalog::{AssetFilter, CatalogStore, MediaAsset, FRAME_EXTENSION},
    config::Config,
};

/// Un programa externo con argumentos iniciales.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Comando listo para agregar argumentos; el proceso muere con el handle.
    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Política de reintentos para adquisiciones fallidas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Espera después del intento número `attempts` (desde 1).
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Próximo intento, o `None` si se agotaron los intentos.
    pub fn next_attempt(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if attempts >= self.max_attempts {
            return None;
        }
        let delay = chrono::Duration::from_std(self.delay_after(attempts))
            .unwrap_or_else(|_| chrono::Duration::days(1));
        Some(now + delay)
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub media_dir: PathBuf,
    pub ytdlp: ToolCommand,
    pub ffmpeg: ToolCommand,
    pub encoder: ToolCommand,
    pub max_download_size: String,
    pub gain_db: f32,
    pub pipe_chunks: usize,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
}

impl AcquisitionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            media_dir: config.media_dir.clone(),
            ytdlp: config.ytdlp(),
            ffmpeg: config.ffmpeg(),
            encoder: config.encoder(),
            max_download_size: config.max_download_size.clone(),
            gain_db: config.decoder_gain_db,
            pipe_chunks: config.pipe_chunks,
            retry: config.retry_policy(),
            poll_interval: config.timings.acquisition_poll,
        }
    }

    pub fn frame_path(&self, stem: &str) -> PathBuf {
        self.media_dir.join(format!("{}.{}", stem, FRAME_EXTENSION))
    }
}

/// Worker único de adquisición.
pub struct AcquisitionWorker {
    catalog: Arc<dyn CatalogStore>,
    settings: AcquisitionSettings,
}

impl AcquisitionWorker {
    pub fn new(catalog: Arc<dyn CatalogStore>, settings: AcquisitionSettings) -> Self {
        Self { catalog, settings }
    }

    /// Bucle de sondeo; termina limpio cuando se cancela `shutdown`.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        info!("🎛️ Worker de adquisición iniciado");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Worker de adquisición detenido");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            self.process_due().await?;
        }
    }

    /// Procesa en secuencia todos los assets pendientes cuyo turno llegó.
    pub async fn process_due(&self) -> Result<usize> {
        let now = Utc::now();
        let due: Vec<MediaAsset> = self
            .catalog
            .list(AssetFilter::Unprocessed)
            .await?
            .into_iter()
            .filter(|asset| asset.is_due(now))
            .collect();

        if due.is_empty() {
            return Ok(0);
        }

        info!("📥 {} assets sin procesar", due.len());

        let mut processed = 0;
        for asset in due {
            match self.acquire(&asset).await {
                Ok(path) => {
                    let mut done = asset;
                    done.processed = true;
                    done.path = Some(path);
                    done.next_attempt_at = None;
                    done.last_error = None;
                    self.catalog.update(&done).await?;
                    processed += 1;
                }
                Err(e) => self.record_failure(asset, e).await?,
            }
        }

        Ok(processed)
    }

    /// Descarga y transcodifica un asset; devuelve la ruta del archivo de frames.
    pub async fn acquire(&self, asset: &MediaAsset) -> Result<PathBuf> {
        let stem = asset.file_stem();
        let wav = self.settings.media_dir.join(format!("{}.wav", stem));
        let frames_path = self.settings.frame_path(&stem);

        let result = self.acquire_inner(asset, &stem, &wav, &frames_path).await;

        // El WAV nunca sobrevive; el archivo de frames solo si todo salió bien
        remove_if_exists(&wav).await;
        if result.is_err() {
            remove_if_exists(&frames_path).await;
        }

        result.map(|_| frames_path)
    }

    async fn acquire_inner(
        &self,
        asset: &MediaAsset,
        stem: &str,
        wav: &Path,
        frames_path: &Path,
    ) -> Result<()> {
        let settings = &self.settings;
        let started = Instant::now();

        info!("⬇️ Descargando {} como {}", asset.url, stem);
        let downloaded = transcode::download(
            &settings.ytdlp,
            &asset.url,
            &settings.media_dir,
            stem,
            &settings.max_download_size,
        )
        .await?;
        debug_assert_eq!(downloaded.as_path(), wav);

        let converting = Instant::now();
        info!("🎚️ PCM => OPUS | {}", stem);
        let frames = transcode::transcode(
            &settings.ffmpeg,
            &settings.encoder,
            wav,
            frames_path,
            settings.gain_db,
            settings.pipe_chunks,
        )
        .await?;

        info!(
            "✅ Descarga {}s | Conversión {}s | {} frames | {}",
            (converting - started).as_secs(),
            converting.elapsed().as_secs(),
            frames,
            asset.title
        );
        Ok(())
    }

    async fn record_failure(&self, mut asset: MediaAsset, err: anyhow::Error) -> Result<()> {
        asset.attempts += 1;
        asset.last_error = Some(format!("{:#}", err));

        match self.settings.retry.next_attempt(asset.attempts, Utc::now()) {
            Some(at) => {
                warn!(
                    "⚠️ Falló la adquisición de {} (intento {}/{}): {:#}. Reintento a las {}",
                    asset.url, asset.attempts, self.settings.retry.max_attempts, err, at
                );
                asset.next_attempt_at = Some(at);
            }
            None => {
                error!(
                    "❌ Adquisición de {} descartada tras {} intentos: {:#}",
                    asset.url, asset.attempts, err
                );
                asset.failed = true;
                asset.next_attempt_at = None;
            }
        }

        self.catalog.update(&asset).await
    }
}

async fn remove_if_exists(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("🗑️ Eliminado {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("No se pudo eliminar {}: {}", path.display(), e),
    }
}

/// Cómo se comprueba que una herramienta externa está disponible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCheck {
    /// Debe terminar bien con este flag
    Version(&'static str),
    /// Sin flag de versión; basta con que se pueda ejecutar
    Spawns,
}

/// Verifica que las herramientas externas respondan.
pub async fn verify_dependencies(tools: &[(&str, ToolCommand, ToolCheck)]) -> Result<()> {
    for (name, tool, check) in tools {
        let mut cmd = tool.command();
        if let ToolCheck::Version(flag) = check {
            cmd.arg(flag);
        }

        match (cmd.output().await, check) {
            (Ok(output), ToolCheck::Version(_)) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!(
                    "✅ {} disponible: {}",
                    name,
                    version.lines().next().unwrap_or("").trim()
                );
            }
            (Ok(_), ToolCheck::Spawns) => info!("✅ {} disponible", name),
            _ => {
                error!("❌ {} no encontrado ({})", name, tool.program);
                anyhow::bail!("{} no disponible", name);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::frames::FrameReader, storage::JsonCatalog};
    use pretty_assertions::assert_eq;

    const FAKE_YTDLP: &str = r#"prev=""; tmpl=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then tmpl="$a"; fi
  prev="$a"
done
out=$(printf '%s' "$tmpl" | sed 's/%(ext)s/wav/')
printf 'RIFFfake' > "$out""#;

    const FAKE_FFMPEG: &str = r#"prev=""
for a in "$@"; do
  if [ "$prev" = "-i" ]; then cat "$a"; fi
  prev="$a"
done"#;

    const FAKE_ENCODER: &str = r#"cat > /dev/null
printf '\003\000abc\002\000de'"#;

    const BROKEN_ENCODER: &str = "cat > /dev/null; exit 3";

    fn sh(script: &str, name: &str) -> ToolCommand {
        ToolCommand::new("sh").with_args(["-c", script, name])
    }

    fn settings(media_dir: &Path, encoder: &str, max_attempts: u32) -> AcquisitionSettings {
        AcquisitionSettings {
            media_dir: media_dir.to_path_buf(),
            ytdlp: sh(FAKE_YTDLP, "yt-dlp"),
            ffmpeg: sh(FAKE_FFMPEG, "ffmpeg"),
            encoder: sh(encoder, "ropus"),
            max_download_size: "1024m".into(),
            gain_db: -24.0,
            pipe_chunks: 2,
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
            },
            poll_interval: Duration::from_millis(10),
        }
    }

    async fn catalog_with(url: &str) -> (tempfile::TempDir, Arc<JsonCatalog>, MediaAsset) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(JsonCatalog::new(dir.path().join("data")).await.unwrap());
        let (asset, _) = catalog
            .insert_if_absent(MediaAsset::new(1, "Canción".into(), url.into(), Duration::from_secs(120)))
            .await
            .unwrap();
        (dir, catalog, asset)
    }

    #[tokio::test]
    async fn test_dependency_check_covers_every_tool_kind() {
        let version = ToolCommand::new("sh").with_args(["-c", "echo 'fake 1.0'", "tool"]);
        let encoder = ToolCommand::new("sh").with_args(["-c", "exit 3", "encoder"]);
        verify_dependencies(&[
            ("yt-dlp", version, ToolCheck::Version("--version")),
            ("encoder", encoder, ToolCheck::Spawns),
        ])
        .await
        .unwrap();

        let broken = ToolCommand::new("sh").with_args(["-c", "exit 1", "tool"]);
        assert!(verify_dependencies(&[("ffmpeg", broken, ToolCheck::Version("-version"))])
            .await
            .is_err());

        let missing = ToolCommand::new("/nonexistent/jukebox-encoder");
        assert!(verify_dependencies(&[("encoder", missing, ToolCheck::Spawns)])
            .await
            .is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(10));
        assert_eq!(policy.delay_after(4), Duration::from_secs(40));
        assert_eq!(policy.delay_after(5), Duration::from_secs(60));
        assert_eq!(policy.delay_after(40), Duration::from_secs(60));
    }

    #[test]
    fn test_retry_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        let now = Utc::now();
        assert_eq!(policy.next_attempt(1, now), Some(now + chrono::Duration::seconds(1)));
        assert!(policy.next_attempt(3, now).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_acquisition_marks_asset_processed() {
        let (dir, catalog, asset) = catalog_with("https://example.com/a").await;
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();

        let worker = AcquisitionWorker::new(catalog.clone(), settings(&media, FAKE_ENCODER, 3));
        assert_eq!(worker.process_due().await.unwrap(), 1);

        let stored = catalog.find_by_id(asset.id).await.unwrap().unwrap();
        assert!(stored.processed);
        let path = stored.path.clone().unwrap();
        assert_eq!(path, media.join(format!("{}.ro", asset.file_stem())));

        let file = tokio::fs::File::open(&path).await.unwrap();
        let mut reader = FrameReader::new(file);
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().await.unwrap() {
            frames.push(frame.to_vec());
        }
        assert_eq!(frames, vec![b"abc".to_vec(), b"de".to_vec()]);

        // El WAV intermedio no queda en disco
        let leftovers: Vec<_> = std::fs::read_dir(&media)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec![format!("{}.ro", asset.file_stem())]);

        // Nada más que hacer en la siguiente vuelta
        assert_eq!(worker.process_due().await.unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_acquisition_schedules_retry() {
        let (dir, catalog, asset) = catalog_with("https://example.com/b").await;
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();

        let worker = AcquisitionWorker::new(catalog.clone(), settings(&media, BROKEN_ENCODER, 3));
        assert_eq!(worker.process_due().await.unwrap(), 0);

        let stored = catalog.find_by_id(asset.id).await.unwrap().unwrap();
        assert!(!stored.processed);
        assert!(!stored.failed);
        assert_eq!(stored.attempts, 1);
        assert!(stored.next_attempt_at.is_some());
        assert!(stored.last_error.is_some());
        assert_eq!(std::fs::read_dir(&media).unwrap().count(), 0);

        // En backoff: la siguiente vuelta lo ignora
        assert_eq!(worker.process_due().await.unwrap(), 0);
        assert_eq!(catalog.find_by_id(asset.id).await.unwrap().unwrap().attempts, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_last_attempt_marks_asset_failed() {
        let (dir, catalog, asset) = catalog_with("https://example.com/c").await;
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();

        let worker = AcquisitionWorker::new(catalog.clone(), settings(&media, BROKEN_ENCODER, 1));
        worker.process_due().await.unwrap();

        let stored = catalog.find_by_id(asset.id).await.unwrap().unwrap();
        assert!(stored.failed);
        assert!(stored.next_attempt_at.is_none());
        assert!(!stored.is_due(Utc::now()));
    }
}

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::acquisition::{RetryPolicy, ToolCommand};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo
    pub owner_ids: Vec<u64>,   // Pueden saltarse el límite de duración

    // Paths
    pub data_dir: PathBuf,
    pub media_dir: PathBuf,

    // Límites
    pub max_song_duration: u64, // En segundos
    pub max_download_size: String,

    // Herramientas externas
    pub ytdlp_bin: String,
    pub ffmpeg_bin: String,
    pub encoder_bin: String,
    pub decoder_gain_db: f32,

    // Buffers
    pub voice_buffer_frames: usize,
    pub pipe_chunks: usize,

    // Reintentos de adquisición
    pub acquisition_max_attempts: u32,
    pub acquisition_retry_base: u64, // En segundos
    pub acquisition_retry_max: u64,  // En segundos

    #[serde(skip)]
    pub timings: Timings,
}

/// Intervalos fijos de las tareas en segundo plano.
///
/// No se leen del entorno; los tests construyen valores más cortos.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub acquisition_poll: Duration,
    pub waiter_poll: Duration,
    pub janitor_interval: Duration,
    pub auto_leave_interval: Duration,
    pub driver_idle_poll: Duration,
    pub restart_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            acquisition_poll: Duration::from_secs(5),
            waiter_poll: Duration::from_secs(1),
            janitor_interval: Duration::from_secs(30),
            auto_leave_interval: Duration::from_secs(5),
            driver_idle_poll: Duration::from_secs(1),
            restart_delay: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),
            owner_ids: parse_id_list(&std::env::var("OWNER_IDS").unwrap_or_default())?,

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "/app/data".to_string())
                .into(),
            media_dir: std::env::var("MEDIA_DIR")
                .unwrap_or_else(|_| "/app/media".to_string())
                .into(),

            // Límites
            max_song_duration: std::env::var("MAX_SONG_DURATION")
                .unwrap_or_else(|_| "3900".to_string()) // 65 minutos
                .parse()?,
            max_download_size: std::env::var("MAX_DOWNLOAD_SIZE")
                .unwrap_or_else(|_| "1024m".to_string()),

            // Herramientas
            ytdlp_bin: std::env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            encoder_bin: std::env::var("ENCODER_BIN").unwrap_or_else(|_| "ropus".to_string()),
            decoder_gain_db: std::env::var("DECODER_GAIN_DB")
                .unwrap_or_else(|_| "-24".to_string())
                .parse()?,

            // Buffers
            voice_buffer_frames: std::env::var("VOICE_BUFFER_FRAMES")
                .unwrap_or_else(|_| "50".to_string()) // ~1s de audio
                .parse()?,
            pipe_chunks: std::env::var("PIPE_CHUNKS")
                .unwrap_or_else(|_| "16".to_string())
                .parse()?,

            // Reintentos
            acquisition_max_attempts: std::env::var("ACQUISITION_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            acquisition_retry_base: std::env::var("ACQUISITION_RETRY_BASE")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            acquisition_retry_max: std::env::var("ACQUISITION_RETRY_MAX")
                .unwrap_or_else(|_| "600".to_string())
                .parse()?,

            timings: Timings::default(),
        };

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.media_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Duration cap, buffer sizes and retry attempts must be > 0
    /// - Retry base delay must not exceed the maximum delay
    /// - Tool names must not be empty
    pub fn validate(&self) -> Result<()> {
        if self.max_song_duration == 0 {
            anyhow::bail!("Max song duration must be greater than 0");
        }

        if self.voice_buffer_frames == 0 {
            anyhow::bail!("Voice buffer must hold at least one frame");
        }

        if self.pipe_chunks == 0 {
            anyhow::bail!("Pipe capacity must be greater than 0");
        }

        if self.acquisition_max_attempts == 0 {
            anyhow::bail!("Acquisition attempts must be greater than 0");
        }

        if self.acquisition_retry_base > self.acquisition_retry_max {
            anyhow::bail!(
                "Retry base delay ({}s) exceeds max delay ({}s)",
                self.acquisition_retry_base,
                self.acquisition_retry_max
            );
        }

        // El janitor borra todo lo que no reconoce en media_dir
        if self.data_dir == self.media_dir {
            anyhow::bail!("DATA_DIR and MEDIA_DIR must be different directories");
        }

        for (name, bin) in [
            ("YTDLP_BIN", &self.ytdlp_bin),
            ("FFMPEG_BIN", &self.ffmpeg_bin),
            ("ENCODER_BIN", &self.encoder_bin),
        ] {
            if bin.trim().is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
        }

        Ok(())
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_song_duration)
    }

    pub fn is_owner(&self, user_id: u64) -> bool {
        self.owner_ids.contains(&user_id)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.acquisition_max_attempts,
            base_delay: Duration::from_secs(self.acquisition_retry_base),
            max_delay: Duration::from_secs(self.acquisition_retry_max),
        }
    }

    pub fn ytdlp(&self) -> ToolCommand {
        ToolCommand::new(&self.ytdlp_bin)
    }

    pub fn ffmpeg(&self) -> ToolCommand {
        ToolCommand::new(&self.ffmpeg_bin)
    }

    pub fn encoder(&self) -> ToolCommand {
        ToolCommand::new(&self.encoder_bin)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {}), {} owners\n  \
            Paths: catalog {}, media {}\n  \
            Limits: {}s max duration, {} max download\n  \
            Tools: {} / {} / {} ({} dB)\n  \
            Buffers: {} voice frames, {} pipe chunks\n  \
            Retries: {} attempts, {}s..{}s backoff",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.owner_ids.len(),
            self.data_dir.display(),
            self.media_dir.display(),
            self.max_song_duration,
            self.max_download_size,
            self.ytdlp_bin,
            self.ffmpeg_bin,
            self.encoder_bin,
            self.decoder_gain_db,
            self.voice_buffer_frames,
            self.pipe_chunks,
            self.acquisition_max_attempts,
            self.acquisition_retry_base,
            self.acquisition_retry_max
        )
    }
}

fn parse_id_list(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().map_err(|e| anyhow::anyhow!("ID inválido '{}': {}", s, e)))
        .collect()
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,
            owner_ids: Vec::new(),

            data_dir: "/app/data".into(),
            media_dir: "/app/media".into(),

            max_song_duration: 3900, // 65 minutes
            max_download_size: "1024m".to_string(),

            ytdlp_bin: "yt-dlp".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            encoder_bin: "ropus".to_string(),
            decoder_gain_db: -24.0,

            voice_buffer_frames: 50, // 20ms frames
            pipe_chunks: 16,

            acquisition_max_attempts: 5,
            acquisition_retry_base: 5,
            acquisition_retry_max: 600,

            timings: Timings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_duration(), Duration::from_secs(65 * 60));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config = Config {
            acquisition_retry_base: 700,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_tool() {
        let config = Config {
            encoder_bin: "  ".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shared_media_dir() {
        let config = Config {
            media_dir: "/app/data".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_owner_ids() {
        assert_eq!(parse_id_list("1, 22 ,,333").unwrap(), vec![1, 22, 333]);
        assert_eq!(parse_id_list("").unwrap(), Vec::<u64>::new());
        assert!(parse_id_list("12,abc").is_err());
    }

    #[test]
    fn test_owner_check_and_summary_hide_token() {
        let config = Config {
            discord_token: "super-secret".to_string(),
            owner_ids: vec![42],
            ..Config::default()
        };
        assert!(config.is_owner(42));
        assert!(!config.is_owner(7));
        assert!(!config.summary().contains("super-secret"));
    }
}

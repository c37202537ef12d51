use async_trait::async_trait;
use std::process::Stdio;
use tracing::{debug, warn};

use super::{MediaResolver, ProbeInfo};
use crate::{
    acquisition::ToolCommand,
    error::{MusicError, MusicResult},
};

/// Resolver basado en `yt-dlp -J --flat-playlist`.
pub struct YtDlpResolver {
    ytdlp: ToolCommand,
}

impl YtDlpResolver {
    pub fn new(ytdlp: ToolCommand) -> Self {
        Self { ytdlp }
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn probe(&self, url: &str) -> MusicResult<ProbeInfo> {
        debug!("🔍 Consultando metadatos de {}", url);

        let output = self
            .ytdlp
            .command()
            .args(["-J", "--flat-playlist", "--no-warnings", "--no-color", "--"])
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("no se pudo ejecutar {}: {}", self.ytdlp.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "yt-dlp rechazó {}: {}",
                url,
                stderr.lines().last().unwrap_or("").trim()
            );
            return Err(MusicError::InvalidLink);
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            warn!("Metadatos ilegibles para {}: {}", url, e);
            MusicError::InvalidLink
        })
    }
}

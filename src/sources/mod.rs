//! Resolución de links: normalización, metadatos y validación.
//!
//! Antes de crear un asset nuevo el link pasa por tres filtros:
//! [`normalize_link`] descarta lo que ni siquiera es una URL de un video,
//! el [`MediaResolver`] consulta los metadatos sin descargar nada, y
//! [`ProbeInfo::into_asset`] aplica las reglas de negocio (vivo, playlist,
//! duración máxima).

pub mod ytdlp;

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::{
    catalog::MediaAsset,
    error::{MusicError, MusicResult},
};

pub use ytdlp::YtDlpResolver;

/// Metadatos de un link, tal como los reporta `yt-dlp -J`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProbeInfo {
    #[serde(default)]
    pub title: Option<String>,
    /// Segundos
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(rename = "_type", default)]
    pub kind: Option<String>,
}

impl ProbeInfo {
    /// Valida los metadatos y construye el asset sin procesar.
    ///
    /// `privileged` permite saltarse el límite de duración.
    pub fn into_asset(
        self,
        added_by: u64,
        url: String,
        cap: Duration,
        privileged: bool,
    ) -> MusicResult<MediaAsset> {
        if self.is_live.unwrap_or(false) {
            return Err(MusicError::LiveStream);
        }
        if self.kind.as_deref() == Some("playlist") {
            return Err(MusicError::PlaylistLink);
        }

        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .ok_or(MusicError::InvalidLink)?;
        let duration = self
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| Duration::from_secs(d.round() as u64))
            .ok_or(MusicError::InvalidLink)?;

        if duration > cap && !privileged {
            return Err(MusicError::TooLong {
                title,
                duration,
                cap,
            });
        }

        Ok(MediaAsset::new(added_by, title, url, duration))
    }
}

/// Consulta de metadatos de un link.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Los errores de usuario (link inválido) se reportan como tales; un
    /// fallo al ejecutar la herramienta es `Internal`.
    async fn probe(&self, url: &str) -> MusicResult<ProbeInfo>;
}

/// Limpia el link recibido en un comando.
///
/// Quita espacios y los `<...>` que Discord usa para ocultar la vista
/// previa, y rechaza lo que no es una URL http(s) o apunta a una playlist.
pub fn normalize_link(raw: &str) -> MusicResult<String> {
    let mut link = raw.trim();
    if let Some(inner) = link.strip_prefix('<').and_then(|l| l.strip_suffix('>')) {
        link = inner.trim();
    }
    if link.is_empty() {
        return Err(MusicError::MissingLink);
    }

    let parsed = Url::parse(link).map_err(|_| MusicError::InvalidLink)?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(MusicError::InvalidLink);
    }
    if looks_like_playlist(&parsed) {
        return Err(MusicError::PlaylistLink);
    }

    Ok(link.to_string())
}

fn looks_like_playlist(url: &Url) -> bool {
    let list_param = url.query_pairs().any(|(key, _)| key == "list");
    let list_path = url
        .path_segments()
        .is_some_and(|mut segments| segments.any(|s| matches!(s, "sets" | "mix" | "playlist")));
    list_param || list_path
}

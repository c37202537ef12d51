//! # Catalog Module
//!
//! Persisted registry of every media asset the bot has ever seen.
//!
//! An asset is created the first time a URL is requested, starts out
//! unprocessed, and is flipped to processed exactly once by the acquisition
//! worker when its frame file is ready. Processed assets are shared between
//! every guild: adding a known URL is a cache hit and goes straight to the
//! playlist.
//!
//! The store itself lives behind [`CatalogStore`]; [`crate::storage::JsonCatalog`]
//! is the implementation used by the bot.

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::PathBuf, time::Duration};
use uuid::Uuid;

use crate::error::{MusicError, MusicResult};

/// Longitud mínima de una búsqueda
pub const MIN_SEARCH_LEN: usize = 4;

/// Extensión de los archivos de frames
pub const FRAME_EXTENSION: &str = "ro";

/// Un audio conocido por el catálogo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: Uuid,
    pub added_by: u64,
    pub title: String,
    /// Clave única para búsquedas de caché
    pub url: String,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub processed: bool,
    /// Archivo de frames, presente solo cuando `processed`
    pub path: Option<PathBuf>,

    // Estado de reintentos de la adquisición
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl MediaAsset {
    pub fn new(added_by: u64, title: String, url: String, duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            added_by,
            title,
            url,
            duration,
            processed: false,
            path: None,
            attempts: 0,
            failed: false,
            next_attempt_at: None,
            last_error: None,
        }
    }

    /// Nombre base (sin extensión) de todos los archivos de este asset.
    pub fn file_stem(&self) -> String {
        file_stem_for_url(&self.url)
    }

    /// El worker puede intentarlo ahora.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.processed && !self.failed && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Deriva de forma determinista el nombre de archivo de una URL.
///
/// Base64 URL-safe sin padding: nunca contiene `/` ni `.`, así que el
/// janitor puede recuperar el nombre base cortando en el primer punto.
pub fn file_stem_for_url(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(url.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFilter {
    All,
    Processed,
    Unprocessed,
}

impl AssetFilter {
    pub fn matches(&self, asset: &MediaAsset) -> bool {
        match self {
            AssetFilter::All => true,
            AssetFilter::Processed => asset.processed,
            AssetFilter::Unprocessed => !asset.processed,
        }
    }
}

/// Almacenamiento del catálogo.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_by_url(&self, url: &str) -> Result<Option<MediaAsset>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<MediaAsset>>;

    /// Inserta el asset salvo que ya exista uno con la misma URL.
    ///
    /// Devuelve el asset almacenado y `true` si fue insertado ahora.
    async fn insert_if_absent(&self, asset: MediaAsset) -> Result<(MediaAsset, bool)>;

    /// Reemplaza el asset con el mismo id.
    async fn update(&self, asset: &MediaAsset) -> Result<()>;

    async fn list(&self, filter: AssetFilter) -> Result<Vec<MediaAsset>>;
}

/// Elige al azar un asset procesado que no esté en `exclude`.
pub fn pick_random(candidates: &[MediaAsset], exclude: &HashSet<Uuid>) -> MusicResult<MediaAsset> {
    let eligible: Vec<&MediaAsset> = candidates
        .iter()
        .filter(|asset| asset.processed && !exclude.contains(&asset.id))
        .collect();

    eligible
        .choose(&mut rand::thread_rng())
        .map(|asset| (*asset).clone())
        .ok_or(MusicError::NothingEligible)
}

/// Búsqueda por título: todos los términos, sin distinguir mayúsculas.
///
/// Una consulta demasiado corta es un error; ninguna coincidencia es un
/// resultado vacío.
pub fn search(candidates: &[MediaAsset], query: &str) -> MusicResult<Vec<MediaAsset>> {
    let query = query.trim();
    if query.chars().count() < MIN_SEARCH_LEN {
        return Err(MusicError::QueryTooShort {
            min: MIN_SEARCH_LEN,
        });
    }

    let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();

    let mut results: Vec<MediaAsset> = candidates
        .iter()
        .filter(|asset| asset.processed)
        .filter(|asset| {
            let title = asset.title.to_lowercase();
            terms.iter().all(|term| title.contains(term.as_str()))
        })
        .cloned()
        .collect();

    results.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
    Ok(results)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn processed(title: &str) -> MediaAsset {
        let mut asset = MediaAsset::new(
            1,
            title.to_string(),
            format!("https://example.com/{}", title.replace(' ', "_")),
            Duration::from_secs(180),
        );
        asset.processed = true;
        asset.path = Some(PathBuf::from(format!("/tmp/{}.ro", asset.file_stem())));
        asset
    }

    #[test]
    fn test_search_too_short_is_distinct_from_no_results() {
        let catalog = vec![processed("Daft Punk - One More Time")];

        assert!(matches!(
            search(&catalog, "dp "),
            Err(MusicError::QueryTooShort { min: MIN_SEARCH_LEN })
        ));
        assert_eq!(search(&catalog, "metallica").unwrap(), Vec::new());
    }

    #[test]
    fn test_search_ands_terms_case_insensitive() {
        let catalog = vec![
            processed("Daft Punk - One More Time"),
            processed("Daft Punk - Around the World"),
            processed("One Republic - Apologize"),
        ];

        let hits = search(&catalog, "daft ONE").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Daft Punk - One More Time");

        let hits = search(&catalog, "punk").unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_search_ignores_unprocessed() {
        let mut pending = processed("Pending Song");
        pending.processed = false;
        let catalog = vec![pending];
        assert!(search(&catalog, "pending").unwrap().is_empty());
    }

    #[test]
    fn test_random_skips_assets_already_in_playlist() {
        let catalog = vec![processed("uno"), processed("dos"), processed("tres")];
        let exclude: HashSet<Uuid> = catalog[..2].iter().map(|a| a.id).collect();

        for _ in 0..32 {
            let pick = pick_random(&catalog, &exclude).unwrap();
            assert_eq!(pick.title, "tres");
        }
    }

    #[test]
    fn test_random_reports_nothing_eligible() {
        let catalog = vec![processed("uno")];
        let exclude: HashSet<Uuid> = catalog.iter().map(|a| a.id).collect();
        assert!(matches!(
            pick_random(&catalog, &exclude),
            Err(MusicError::NothingEligible)
        ));
        assert!(matches!(
            pick_random(&[], &HashSet::new()),
            Err(MusicError::NothingEligible)
        ));
    }

    #[test]
    fn test_file_stem_is_deterministic_and_path_safe() {
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=1/2";
        let stem = file_stem_for_url(url);
        assert_eq!(stem, file_stem_for_url(url));
        assert!(!stem.contains('/'));
        assert!(!stem.contains('.'));
        assert_ne!(stem, file_stem_for_url("https://www.youtube.com/watch?v=other"));
    }

    #[test]
    fn test_due_respects_backoff_and_failure() {
        let now = Utc::now();
        let mut asset = MediaAsset::new(1, "x".into(), "https://x".into(), Duration::ZERO);
        assert!(asset.is_due(now));

        asset.next_attempt_at = Some(now + chrono::Duration::seconds(30));
        assert!(!asset.is_due(now));

        asset.next_attempt_at = None;
        asset.failed = true;
        assert!(!asset.is_due(now));
    }

    #[test]
    fn test_asset_serializes_duration_as_seconds() {
        let asset = processed("uno");
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["duration"], 180);

        // Entradas antiguas sin campos de reintento
        let legacy = serde_json::json!({
            "id": asset.id,
            "added_by": 1,
            "title": "uno",
            "url": "https://example.com/uno",
            "duration": 10,
            "processed": false,
            "path": null
        });
        let parsed: MediaAsset = serde_json::from_value(legacy).unwrap();
        assert_eq!(parsed.attempts, 0);
        assert!(!parsed.failed);
    }
}

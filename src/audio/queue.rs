use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::MediaAsset;

/// Resultado de pedir un asset no procesado para la cola de descargas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingInsert {
    Queued,
    AlreadyPending,
    AlreadyInPlaylist,
}

/// Playlist y cola de descargas de una conexión.
///
/// Un mismo id nunca está a la vez en `pending` y en `playlist`.
#[derive(Debug, Default)]
pub struct MusicQueue {
    playlist: VecDeque<MediaAsset>,
    pending: VecDeque<MediaAsset>,
    playing: bool,
}

impl MusicQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un asset listo al final de la playlist
    pub fn push_ready(&mut self, asset: MediaAsset) {
        self.pending.retain(|p| p.id != asset.id);
        info!("➕ Agregado a la playlist: {}", asset.title);
        self.playlist.push_back(asset);
    }

    /// Agrega un asset a la cola de descargas si no está ya en la conexión
    pub fn push_pending(&mut self, asset: MediaAsset) -> PendingInsert {
        if self.pending.iter().any(|p| p.id == asset.id || p.url == asset.url) {
            return PendingInsert::AlreadyPending;
        }
        if self.playlist.iter().any(|p| p.id == asset.id) {
            return PendingInsert::AlreadyInPlaylist;
        }

        info!("⏳ En cola de descarga: {}", asset.title);
        self.pending.push_back(asset);
        PendingInsert::Queued
    }

    /// Mueve un asset de `pending` a `playlist` con su versión procesada.
    ///
    /// Devuelve `false` si ya no estaba pendiente (por ejemplo tras un stop).
    pub fn promote(&mut self, asset: MediaAsset) -> bool {
        let Some(index) = self.pending.iter().position(|p| p.id == asset.id) else {
            return false;
        };

        self.pending.remove(index);
        self.playlist.push_back(asset);
        true
    }

    pub fn drop_pending(&mut self, id: Uuid) -> Option<MediaAsset> {
        let index = self.pending.iter().position(|p| p.id == id)?;
        self.pending.remove(index)
    }

    pub fn head(&self) -> Option<&MediaAsset> {
        self.playlist.front()
    }

    /// Quita la cabeza solo si sigue siendo el asset indicado
    pub fn pop_head_if(&mut self, id: Uuid) -> Option<MediaAsset> {
        if self.playlist.front().map(|a| a.id) == Some(id) {
            let popped = self.playlist.pop_front();
            debug!("➡️ Siguiente en playlist ({} restantes)", self.playlist.len());
            popped
        } else {
            None
        }
    }

    /// Limpia la playlist
    pub fn clear_playlist(&mut self) {
        self.playlist.clear();
        self.playing = false;
        info!("🗑️ Playlist limpiada");
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn playlist(&self) -> Vec<MediaAsset> {
        self.playlist.iter().cloned().collect()
    }

    pub fn pending(&self) -> Vec<MediaAsset> {
        self.pending.iter().cloned().collect()
    }

    pub fn playlist_len(&self) -> usize {
        self.playlist.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn playlist_ids(&self) -> HashSet<Uuid> {
        self.playlist.iter().map(|a| a.id).collect()
    }
}

/// Página de la playlist para mostrar
#[derive(Debug, Clone)]
pub struct PlaylistPage {
    pub current: Option<MediaAsset>,
    pub upcoming: Vec<MediaAsset>,
    pub omitted: usize,
    pub total_duration: Duration,
}

impl PlaylistPage {
    /// Actual más hasta `limit - 1` siguientes
    pub fn from_playlist(playlist: &[MediaAsset], limit: usize) -> Self {
        let current = playlist.first().cloned();
        let upcoming: Vec<MediaAsset> = playlist
            .iter()
            .skip(1)
            .take(limit.saturating_sub(1))
            .cloned()
            .collect();
        let shown = current.iter().count() + upcoming.len();

        Self {
            current,
            upcoming,
            omitted: playlist.len().saturating_sub(shown),
            total_duration: playlist.iter().map(|a| a.duration).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn asset(n: u32) -> MediaAsset {
        MediaAsset::new(1, format!("song {}", n), format!("https://x/{}", n), Duration::from_secs(60))
    }

    #[test]
    fn test_pending_is_deduplicated() {
        let mut queue = MusicQueue::new();
        let a = asset(1);

        assert_eq!(queue.push_pending(a.clone()), PendingInsert::Queued);
        assert_eq!(queue.push_pending(a.clone()), PendingInsert::AlreadyPending);
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_promote_moves_between_lists() {
        let mut queue = MusicQueue::new();
        let a = asset(1);
        queue.push_pending(a.clone());

        let mut done = a.clone();
        done.processed = true;
        assert!(queue.promote(done.clone()));
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.playlist(), vec![done]);

        // Segunda promoción no duplica
        assert!(!queue.promote(a));
        assert_eq!(queue.playlist_len(), 1);
    }

    #[test]
    fn test_pending_rejects_asset_already_in_playlist() {
        let mut queue = MusicQueue::new();
        let a = asset(1);
        queue.push_ready(a.clone());
        assert_eq!(queue.push_pending(a), PendingInsert::AlreadyInPlaylist);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_pop_head_only_matching_id() {
        let mut queue = MusicQueue::new();
        let (a, b) = (asset(1), asset(2));
        queue.push_ready(a.clone());
        queue.push_ready(b.clone());

        assert!(queue.pop_head_if(b.id).is_none());
        assert_eq!(queue.pop_head_if(a.id).map(|x| x.id), Some(a.id));
        assert_eq!(queue.head().map(|x| x.id), Some(b.id));
    }

    #[test]
    fn test_clear_playlist_resets_playing() {
        let mut queue = MusicQueue::new();
        queue.push_ready(asset(1));
        queue.set_playing(true);
        queue.clear_playlist();
        assert!(!queue.is_playing());
        assert_eq!(queue.playlist_len(), 0);
    }

    #[test]
    fn test_page_counts_omitted_entries() {
        let playlist: Vec<MediaAsset> = (0..15).map(asset).collect();
        let page = PlaylistPage::from_playlist(&playlist, 12);

        assert_eq!(page.current.as_ref().map(|a| a.title.as_str()), Some("song 0"));
        assert_eq!(page.upcoming.len(), 11);
        assert_eq!(page.omitted, 3);
        assert_eq!(page.total_duration, Duration::from_secs(15 * 60));

        let empty = PlaylistPage::from_playlist(&[], 12);
        assert!(empty.current.is_none());
        assert_eq!(empty.omitted, 0);
    }
}

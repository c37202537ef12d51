use dashmap::{mapref::entry::Entry, DashMap};
use serenity::all::GuildId;
use std::sync::Arc;
use tracing::debug;

use crate::error::{MusicError, MusicResult};

/// Motivo con el que la música ocupa el canal de voz
pub const MUSIC: &str = "music";

/// Registro de qué funcionalidad usa la voz en cada guild.
#[derive(Debug, Default)]
pub struct VoiceOccupancy {
    slots: DashMap<GuildId, &'static str>,
}

impl VoiceOccupancy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn occupied_by(&self, guild_id: GuildId) -> Option<&'static str> {
        self.slots.get(&guild_id).map(|slot| *slot)
    }

    pub fn is_free_or_occupied_by(&self, guild_id: GuildId, reason: &str) -> bool {
        self.occupied_by(guild_id).map_or(true, |current| current == reason)
    }

    /// Ocupa la voz de la guild.
    ///
    /// Si ya la ocupaba el mismo motivo la reserva no libera nada al soltarse.
    pub fn reserve(self: &Arc<Self>, guild_id: GuildId, reason: &'static str) -> MusicResult<Reservation> {
        let armed = match self.slots.entry(guild_id) {
            Entry::Vacant(slot) => {
                slot.insert(reason);
                true
            }
            Entry::Occupied(slot) if *slot.get() == reason => false,
            Entry::Occupied(slot) => return Err(MusicError::VoiceOccupied(*slot.get())),
        };

        debug!("🔒 Voz de guild {} reservada para {}", guild_id, reason);
        Ok(Reservation {
            occupancy: Arc::clone(self),
            guild_id,
            armed,
        })
    }

    pub fn free(&self, guild_id: GuildId) {
        if self.slots.remove(&guild_id).is_some() {
            debug!("🔓 Voz de guild {} liberada", guild_id);
        }
    }
}

/// Reserva en curso; se libera al soltarse salvo que se confirme.
#[must_use]
pub struct Reservation {
    occupancy: Arc<VoiceOccupancy>,
    guild_id: GuildId,
    armed: bool,
}

impl Reservation {
    pub fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.occupancy.free(self.guild_id);
        }
    }
}

//! # Bot Module
//!
//! Discord front-end for Jukebox.
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`]:
//! - registers the slash commands when the gateway is ready
//! - dispatches every command to [`handlers`], which checks voice
//!   channels and calls into the [`MusicPlayer`]
//! - tears the guild's connection down if the bot is disconnected from
//!   voice by someone else
//!
//! All playback state lives in the player; this layer only translates
//! Discord events into player calls and player results into replies.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{audio::player::MusicPlayer, config::Config};

pub struct JukeboxBot {
    /// Bot configuration loaded from environment variables
    config: Arc<Config>,
    /// Connection registry and command entry point
    pub player: Arc<MusicPlayer>,
}

impl JukeboxBot {
    pub fn new(config: Arc<Config>, player: Arc<MusicPlayer>) -> Self {
        Self { config, player }
    }

    /// Registers slash commands with Discord.
    ///
    /// With `GUILD_ID` set the commands are registered only in that guild
    /// (~1s propagation, useful for development); otherwise globally.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Limpia la conexión si el bot fue sacado del canal de voz.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };

        if self.player.is_connected(guild_id) {
            info!("🔌 Bot desconectado externamente en guild {}", guild_id);
            if let Err(e) = self.player.leave(guild_id).await {
                error!("Error al limpiar la conexión: {:?}", e);
            }
        }
    }
}

use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    audio::{
        connection::VoiceLink,
        occupancy::MUSIC,
        player::PlayOutcome,
        queue::PlaylistPage,
        transport::{HttpNotifier, SerenityPresence, SongbirdTransport},
    },
    bot::JukeboxBot,
    error::{MusicError, MusicResult},
    ui::embeds,
};

/// Respuesta de un comando
enum Reply {
    Text(String),
    Embed(CreateEmbed),
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &JukeboxBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Este comando solo funciona en un servidor")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // add puede tardar varios segundos consultando metadatos
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let reply = dispatch(ctx, &command, bot, guild_id).await;

    let response = match reply {
        Ok(Reply::Text(text)) => EditInteractionResponse::new().content(text),
        Ok(Reply::Embed(embed)) => EditInteractionResponse::new().embed(embed),
        Err(e) => {
            if e.is_user_error() {
                info!("Comando /{} rechazado: {}", command.data.name, e);
                EditInteractionResponse::new().embed(embeds::create_error_embed(&e.to_string()))
            } else {
                error!("Error en /{}: {:?}", command.data.name, e);
                EditInteractionResponse::new()
                    .embed(embeds::create_error_embed("❌ Algo salió mal, intenta de nuevo"))
            }
        }
    };

    command.edit_response(&ctx.http, response).await?;
    Ok(())
}

async fn dispatch(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> MusicResult<Reply> {
    let name = command.data.name.as_str();
    let user = command.user.id;

    if requires_shared_channel(name) {
        ensure_same_channel(ctx, bot, guild_id, user).await?;
    }

    match name {
        "join" => handle_join(ctx, bot, guild_id, command.channel_id, user).await,
        "leave" => handle_leave(bot, guild_id).await,
        "add" => handle_add(bot, guild_id, user, string_option(command, "link")).await,
        "play" => handle_play(bot, guild_id),
        "pause" => handle_pause(bot, guild_id),
        "stop" => handle_stop(bot, guild_id),
        "skip" | "next" => handle_skip(bot, guild_id),
        "np" => handle_now_playing(bot, guild_id),
        "list" => handle_list(bot, guild_id),
        "random" => handle_random(bot, guild_id).await,
        "search" => handle_search(bot, string_option(command, "query")).await,
        "mdev" => handle_debug(bot, guild_id, user),
        _ => Ok(Reply::from("❌ Comando no reconocido")),
    }
}

/// Todo comando salvo `join` exige estar en el canal de voz del bot.
fn requires_shared_channel(name: &str) -> bool {
    name != "join"
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> &'a str {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
        .unwrap_or("")
}

// Verificaciones de canal de voz

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild.voice_states.get(&user_id)?.channel_id
}

async fn bot_voice_channel(ctx: &Context, guild_id: GuildId) -> Option<ChannelId> {
    let manager = songbird::get(ctx).await?;
    let call = manager.get(guild_id)?;
    let channel = call.lock().await.current_channel()?;
    Some(ChannelId::from(channel.0))
}

/// El bot debe estar conectado y el usuario en su mismo canal.
async fn ensure_same_channel(ctx: &Context, bot: &JukeboxBot, guild_id: GuildId, user_id: UserId) -> MusicResult<()> {
    if let Some(owner) = bot.player.occupancy().occupied_by(guild_id) {
        if !bot.player.occupancy().is_free_or_occupied_by(guild_id, MUSIC) {
            return Err(MusicError::VoiceOccupied(owner));
        }
    }
    if !bot.player.is_connected(guild_id) {
        return Err(MusicError::NotConnected);
    }
    let user_channel = user_voice_channel(ctx, guild_id, user_id).ok_or(MusicError::UserNotInVoice)?;

    match bot_voice_channel(ctx, guild_id).await {
        Some(channel) if channel == user_channel => Ok(()),
        Some(_) => Err(MusicError::WrongChannel),
        None => Err(MusicError::NotConnected),
    }
}

// Handlers específicos para cada comando

async fn handle_join(
    ctx: &Context,
    bot: &JukeboxBot,
    guild_id: GuildId,
    text_channel: ChannelId,
    user_id: UserId,
) -> MusicResult<Reply> {
    let voice_channel = user_voice_channel(ctx, guild_id, user_id).ok_or(MusicError::UserNotInVoice)?;

    if bot.player.is_connected(guild_id) {
        return Ok(Reply::from("Ya estoy en un canal de voz 😉"));
    }

    // Se libera sola si algo falla antes de confirmar
    let reservation = bot.player.occupancy().reserve(guild_id, MUSIC)?;

    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;
    let call = manager
        .join(guild_id, voice_channel)
        .await
        .map_err(|e| anyhow::anyhow!("Error al conectar al canal de voz: {:?}", e))?;

    let link = VoiceLink {
        transport: Arc::new(SongbirdTransport::new(
            guild_id,
            manager.clone(),
            call.clone(),
            bot.config.voice_buffer_frames,
        )),
        presence: Arc::new(SerenityPresence::new(
            guild_id,
            ctx.cache.current_user().id,
            ctx.cache.clone(),
            call,
        )),
        notifier: Arc::new(HttpNotifier::new(ctx.http.clone())),
    };

    bot.player.join(guild_id, text_channel, link);
    reservation.commit();

    Ok(Reply::Text(format!("🔊 Conectado a <#{}>", voice_channel)))
}

async fn handle_leave(bot: &JukeboxBot, guild_id: GuildId) -> MusicResult<Reply> {
    bot.player.leave(guild_id).await?;
    Ok(Reply::from("👋 Nos vemos"))
}

async fn handle_add(bot: &JukeboxBot, guild_id: GuildId, user_id: UserId, link: &str) -> MusicResult<Reply> {
    let privileged = bot.config.is_owner(user_id.get());
    let outcome = bot.player.add(guild_id, user_id.get(), link, privileged).await?;
    Ok(Reply::Embed(embeds::create_added_embed(&outcome)))
}

fn handle_play(bot: &JukeboxBot, guild_id: GuildId) -> MusicResult<Reply> {
    let reply = match bot.player.play(guild_id)? {
        PlayOutcome::Started => "▶️ Reproduciendo",
        PlayOutcome::Resumed => "⏯️ Reanudando",
    };
    Ok(Reply::from(reply))
}

fn handle_pause(bot: &JukeboxBot, guild_id: GuildId) -> MusicResult<Reply> {
    bot.player.pause(guild_id)?;
    Ok(Reply::from("⏸️ Pausando"))
}

fn handle_stop(bot: &JukeboxBot, guild_id: GuildId) -> MusicResult<Reply> {
    bot.player.stop(guild_id)?;
    Ok(Reply::from("⏹️ Detenido, playlist limpiada"))
}

fn handle_skip(bot: &JukeboxBot, guild_id: GuildId) -> MusicResult<Reply> {
    bot.player.skip(guild_id)?;
    Ok(Reply::from("⏭️ Siguiente"))
}

fn handle_now_playing(bot: &JukeboxBot, guild_id: GuildId) -> MusicResult<Reply> {
    let asset = bot.player.now_playing(guild_id)?;
    Ok(Reply::Embed(embeds::create_now_playing_embed(&asset)))
}

fn handle_list(bot: &JukeboxBot, guild_id: GuildId) -> MusicResult<Reply> {
    let playlist = bot.player.playlist(guild_id)?;
    let pending = bot.player.pending(guild_id)?;
    let page = PlaylistPage::from_playlist(&playlist, embeds::PLAYLIST_PAGE_SIZE);
    Ok(Reply::Embed(embeds::create_playlist_embed(&page, &pending)))
}

async fn handle_random(bot: &JukeboxBot, guild_id: GuildId) -> MusicResult<Reply> {
    let asset = bot.player.random(guild_id).await?;
    Ok(Reply::Embed(embeds::create_random_embed(&asset)))
}

async fn handle_search(bot: &JukeboxBot, query: &str) -> MusicResult<Reply> {
    let results = bot.player.search(query).await?;
    Ok(Reply::Embed(embeds::create_search_embed(query.trim(), &results)))
}

fn handle_debug(bot: &JukeboxBot, guild_id: GuildId, user_id: UserId) -> MusicResult<Reply> {
    if !bot.config.is_owner(user_id.get()) {
        warn!("/mdev denegado para {}", user_id);
        return Ok(Reply::from("🔒 Solo para dueños del bot"));
    }

    let snapshot = bot.player.snapshot(guild_id)?;
    Ok(Reply::Embed(embeds::create_debug_embed(&snapshot)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::commands::all_commands;

    #[test]
    fn test_every_command_but_join_needs_the_bots_channel() {
        let names: Vec<String> = all_commands()
            .iter()
            .map(|command| {
                let json = serde_json::to_value(command).unwrap();
                json["name"].as_str().unwrap().to_string()
            })
            .collect();

        assert!(names.iter().any(|n| n == "join"));
        for name in &names {
            assert_eq!(requires_shared_channel(name), name != "join", "/{}", name);
        }
        for read_only in ["np", "list", "search", "mdev"] {
            assert!(names.iter().any(|n| n == read_only));
            assert!(requires_shared_channel(read_only));
        }
    }
}

use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

pub(crate) fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        leave_command(),
        add_command(),
        play_command(),
        pause_command(),
        stop_command(),
        skip_command("skip"),
        skip_command("next"),
        np_command(),
        list_command(),
        random_command(),
        search_command(),
        debug_command(),
    ]
}

// Comandos de conexión

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Conecta el bot a tu canal de voz")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Desconecta el bot del canal de voz")
}

// Comandos de playlist

fn add_command() -> CreateCommand {
    CreateCommand::new("add")
        .description("Agrega un link a la playlist")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "link", "Link del video o canción")
                .required(true),
        )
}

fn random_command() -> CreateCommand {
    CreateCommand::new("random").description("Agrega una canción al azar del catálogo")
}

fn list_command() -> CreateCommand {
    CreateCommand::new("list").description("Muestra la playlist")
}

fn np_command() -> CreateCommand {
    CreateCommand::new("np").description("Muestra la canción actual")
}

fn search_command() -> CreateCommand {
    CreateCommand::new("search")
        .description("Busca en las canciones ya descargadas")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "Término de búsqueda")
                .required(true),
        )
}

// Comandos de control

fn play_command() -> CreateCommand {
    CreateCommand::new("play").description("Inicia o reanuda la reproducción")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción y limpia la playlist")
}

fn skip_command(name: &str) -> CreateCommand {
    CreateCommand::new(name).description("Salta a la siguiente canción")
}

// Depuración

fn debug_command() -> CreateCommand {
    CreateCommand::new("mdev").description("Estado interno de la conexión (solo dueños)")
}

use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::{fmt::Write, time::Duration};

use crate::{
    audio::{connection::ConnectionSnapshot, player::AddOutcome, queue::PlaylistPage},
    catalog::MediaAsset,
};

/// Entradas visibles en la lista (actual incluida)
pub const PLAYLIST_PAGE_SIZE: usize = 12;

/// Resultados visibles de una búsqueda
pub const SEARCH_PAGE_SIZE: usize = 10;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Jukebox";

/// Canción actual
pub fn create_now_playing_embed(asset: &MediaAsset) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", asset.title))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duración", format_duration(asset.duration), true)
        .field("👤 Agregado por", format!("<@{}>", asset.added_by), true)
        .url(&asset.url)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Resultado de `/add`
pub fn create_added_embed(outcome: &AddOutcome) -> CreateEmbed {
    let (title, note, color, asset) = match outcome {
        AddOutcome::Ready(asset) => (
            "✅ Agregado a la playlist",
            "Listo para reproducir",
            colors::SUCCESS_GREEN,
            asset,
        ),
        AddOutcome::Queued(asset) => (
            "⏳ Descargando",
            "Te aviso cuando termine de descargarse",
            colors::INFO_BLUE,
            asset,
        ),
        AddOutcome::AlreadyQueued(asset) => (
            "⏳ Ya se está descargando",
            "Esta canción ya estaba en tu cola de descargas",
            colors::WARNING_ORANGE,
            asset,
        ),
    };

    CreateEmbed::default()
        .title(title)
        .description(format!("**{}**", asset.title))
        .color(color)
        .field("⏱️ Duración", format_duration(asset.duration), true)
        .url(&asset.url)
        .footer(CreateEmbedFooter::new(note))
}

/// Canción agregada con `/random`
pub fn create_random_embed(asset: &MediaAsset) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎲 Agregado al azar")
        .description(format!("**{}**", asset.title))
        .color(colors::MUSIC_PURPLE)
        .field("⏱️ Duración", format_duration(asset.duration), true)
        .url(&asset.url)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Playlist de la conexión con las descargas pendientes
pub fn create_playlist_embed(page: &PlaylistPage, pending: &[MediaAsset]) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Playlist")
        .color(colors::MUSIC_PURPLE)
        .description(playlist_text(page))
        .footer(CreateEmbedFooter::new(format!(
            "Duración total: {}",
            format_duration(page.total_duration)
        )));

    if !pending.is_empty() {
        let names: Vec<String> = pending.iter().map(|a| format!("• {}", a.title)).collect();
        embed = embed.field(
            format!("⏳ Descargando ({})", pending.len()),
            names.join("\n"),
            false,
        );
    }

    embed
}

fn playlist_text(page: &PlaylistPage) -> String {
    let Some(current) = &page.current else {
        return "La playlist está vacía".to_string();
    };

    let mut text = format!(
        "▶️ **{}** `{}`\n",
        current.title,
        format_duration(current.duration)
    );
    for (i, asset) in page.upcoming.iter().enumerate() {
        let _ = writeln!(
            text,
            "`{}.` {} `{}`",
            i + 1,
            asset.title,
            format_duration(asset.duration)
        );
    }
    if page.omitted > 0 {
        let _ = writeln!(text, "*{} entradas omitidas*", page.omitted);
    }
    text
}

/// Resultados de `/search`
pub fn create_search_embed(query: &str, results: &[MediaAsset]) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title(format!("🔍 Resultados para \"{}\"", query))
        .footer(CreateEmbedFooter::new("Usa /add con el link para agregarla"));

    if results.is_empty() {
        return embed
            .description("No encontré nada en el catálogo 🤷")
            .color(colors::NEUTRAL_GRAY);
    }

    let mut text = String::new();
    for asset in results.iter().take(SEARCH_PAGE_SIZE) {
        let _ = writeln!(
            text,
            "• [{}]({}) `{}`",
            asset.title,
            asset.url,
            format_duration(asset.duration)
        );
    }
    if results.len() > SEARCH_PAGE_SIZE {
        let _ = writeln!(text, "*y {} más*", results.len() - SEARCH_PAGE_SIZE);
    }

    embed.description(text).color(colors::INFO_BLUE)
}

/// Estado interno para `/mdev`
pub fn create_debug_embed(snapshot: &ConnectionSnapshot) -> CreateEmbed {
    let mut dump = format!("{}", snapshot);
    // Límite de descripción de Discord
    if dump.len() > 4000 {
        let mut cut = 4000;
        while !dump.is_char_boundary(cut) {
            cut -= 1;
        }
        dump.truncate(cut);
    }

    CreateEmbed::default()
        .title("🛠️ Estado de la conexión")
        .description(format!("```\n{}\n```", dump))
        .color(colors::NEUTRAL_GRAY)
}

pub fn create_error_embed(message: &str) -> CreateEmbed {
    CreateEmbed::default()
        .description(message)
        .color(colors::ERROR_RED)
}

/// Formatea una duración como `m:ss` o `h:mm:ss`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

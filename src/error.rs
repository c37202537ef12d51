use std::time::Duration;
use thiserror::Error;

/// Errores visibles para el usuario.
///
/// Cada variante se muestra tal cual como respuesta al comando, por eso el
/// texto de `#[error]` es el mensaje final. Los fallos internos (I/O,
/// procesos, Discord) viajan en `Internal` y solo se registran en el log.
#[derive(Debug, Error)]
pub enum MusicError {
    #[error("Tienes que enviarme un link 😐")]
    MissingLink,

    #[error("Ese link parece inválido o no soportado 😦")]
    InvalidLink,

    #[error("Las transmisiones en vivo no están soportadas 😐")]
    LiveStream,

    #[error("Lo siento, las playlists no están soportadas 😐")]
    PlaylistLink,

    #[error("`{title}` es demasiado largo ({}), el máximo es {}", fmt_secs(.duration), fmt_secs(.cap))]
    TooLong {
        title: String,
        duration: Duration,
        cap: Duration,
    },

    #[error("No estoy conectado a ningún canal de voz en este servidor 🤔")]
    NotConnected,

    #[error("El canal de voz está ocupado por `{0}`")]
    VoiceOccupied(&'static str),

    #[error("No estás en un canal de voz o no puedo verte 😐")]
    UserNotInVoice,

    #[error("Únete a mi canal de voz antes de darme órdenes 🤔")]
    WrongChannel,

    #[error("{}", empty_playlist_hint(.pending))]
    EmptyPlaylist { pending: usize },

    #[error("La reproducción no está iniciada")]
    NotPlaying,

    #[error("No quedan canciones que no estén ya en tu playlist 🤷")]
    NothingEligible,

    #[error("Término de búsqueda muy corto, usa al menos {min} caracteres 🤔")]
    QueryTooShort { min: usize },

    #[error("Error interno: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MusicError {
    /// Errores que corresponden a entrada inválida del usuario y no se reintentan.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, MusicError::Internal(_))
    }
}

pub type MusicResult<T> = std::result::Result<T, MusicError>;

fn fmt_secs(d: &Duration) -> String {
    humantime::format_duration(Duration::from_secs(d.as_secs())).to_string()
}

fn empty_playlist_hint(pending: &usize) -> &'static str {
    if *pending > 0 {
        "Espera a que terminen tus descargas 😉"
    } else {
        "Primero agrega algo de música 🤔"
    }
}

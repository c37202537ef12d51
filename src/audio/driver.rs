use anyhow::Result;
use std::time::Duration;
use tokio::{
    fs::File,
    io::BufReader,
    sync::mpsc::{self, error::TryRecvError},
};
use tracing::{debug, info, warn};

use super::{
    connection::{Connection, Control, DriverGuard, EpochHandle},
    frames::FrameReader,
};
use crate::catalog::MediaAsset;

/// Cómo terminó la reproducción de un asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    Skipped,
    Cancelled,
    Unreadable,
}

/// Reproduce la playlist de la conexión hasta que se cancele la época.
///
/// Un error del transporte se propaga para que el supervisor reinicie el
/// driver; el asset actual queda en la cabeza y se vuelve a reproducir.
pub async fn run(guard: &DriverGuard, idle_poll: Duration) -> Result<()> {
    let conn = guard.connection();
    let epoch = guard.epoch();

    // Un driver de una época anterior puede seguir drenando su último frame
    let _lane = tokio::select! {
        _ = epoch.token.cancelled() => return Ok(()),
        lane = conn.voice_lane().lock() => lane,
    };
    let mut control = epoch.control.lock().await;

    info!(
        "▶️ Driver iniciado en guild {} (época {})",
        conn.guild_id(),
        epoch.generation
    );

    loop {
        if epoch.token.is_cancelled() {
            break;
        }

        let head = conn.queue().read().head().cloned();
        let ready = conn.link().transport.is_ready().await;

        let asset = match head {
            Some(asset) if ready => asset,
            _ => {
                tokio::select! {
                    _ = epoch.token.cancelled() => break,
                    _ = tokio::time::sleep(idle_poll) => {}
                }
                continue;
            }
        };

        conn.queue().write().set_playing(true);

        match play_asset(conn, epoch, &mut control, &asset).await? {
            Outcome::Cancelled => break,
            outcome => {
                debug!("⏭️ {} terminó: {:?}", asset.title, outcome);
                conn.queue().write().pop_head_if(asset.id);
            }
        }
    }

    info!(
        "⏹️ Driver detenido en guild {} (época {})",
        conn.guild_id(),
        epoch.generation
    );
    Ok(())
}

async fn play_asset(
    conn: &Connection,
    epoch: &EpochHandle,
    control: &mut mpsc::Receiver<Control>,
    asset: &MediaAsset,
) -> Result<Outcome> {
    let Some(path) = asset.path.as_ref() else {
        warn!("⚠️ {} no tiene archivo de frames, se omite", asset.title);
        return Ok(Outcome::Unreadable);
    };

    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("⚠️ No se pudo abrir {}: {}, se omite", path.display(), e);
            return Ok(Outcome::Unreadable);
        }
    };

    info!("🎵 Reproduciendo: {}", asset.title);
    let mut frames = FrameReader::new(BufReader::new(file));

    let transport = &conn.link().transport;
    transport.set_speaking(true).await?;

    // Lo que llegó mientras no había pista era para un asset que ya terminó
    discard_stale_controls(control);
    conn.set_streaming(epoch.generation, Some(asset.id));
    let result = stream_frames(conn, epoch, control, &mut frames).await;
    conn.set_streaming(epoch.generation, None);

    if let Err(e) = transport.set_speaking(false).await {
        warn!("No se pudo apagar el indicador de voz: {:?}", e);
    }

    if matches!(result, Ok(Outcome::Finished)) {
        debug!("{} frames enviados de {}", frames.frames_read(), asset.title);
    }
    result
}

async fn stream_frames(
    conn: &Connection,
    epoch: &EpochHandle,
    control: &mut mpsc::Receiver<Control>,
    frames: &mut FrameReader<BufReader<File>>,
) -> Result<Outcome> {
    let transport = &conn.link().transport;

    loop {
        if epoch.token.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        match control.try_recv() {
            Ok(Control::Skip) => return Ok(Outcome::Skipped),
            Ok(Control::Pause) => {
                if let Some(outcome) = wait_for_resume(conn, epoch, control).await {
                    return Ok(outcome);
                }
            }
            Ok(Control::Resume) | Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return Ok(Outcome::Cancelled),
        }

        let frame = match frames.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Outcome::Finished),
            Err(e) => {
                warn!("⚠️ Error leyendo frames: {}", e);
                return Ok(Outcome::Unreadable);
            }
        };

        tokio::select! {
            biased;
            _ = epoch.token.cancelled() => return Ok(Outcome::Cancelled),
            sent = transport.send_frame(frame) => sent?,
        }
    }
}

fn discard_stale_controls(control: &mut mpsc::Receiver<Control>) {
    while let Ok(stale) = control.try_recv() {
        debug!("Control descartado entre pistas: {:?}", stale);
    }
}

/// Bloquea hasta Resume; `Some` si la pausa terminó de otra forma.
async fn wait_for_resume(
    conn: &Connection,
    epoch: &EpochHandle,
    control: &mut mpsc::Receiver<Control>,
) -> Option<Outcome> {
    let notifier = &conn.link().notifier;
    notifier.notify(conn.text_channel(), "⏸️ Pista en pausa").await;

    loop {
        tokio::select! {
            _ = epoch.token.cancelled() => return Some(Outcome::Cancelled),
            msg = control.recv() => match msg {
                Some(Control::Resume) => {
                    notifier.notify(conn.text_channel(), "⏯️ Pista reanudada").await;
                    return None;
                }
                Some(Control::Skip) => return Some(Outcome::Skipped),
                Some(Control::Pause) => continue,
                None => return Some(Outcome::Cancelled),
            },
        }
    }
}

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter},
};
use tracing::debug;

use super::ToolCommand;
use crate::audio::frames::{FrameReader, FrameWriter};

/// Tamaño de cada bloque de PCM entre decoder y encoder
const PIPE_CHUNK_SIZE: usize = 32 * 1024;

/// Descarga el audio con yt-dlp y lo deja en `<media_dir>/<stem>.wav`.
pub async fn download(
    ytdlp: &ToolCommand,
    url: &str,
    media_dir: &Path,
    stem: &str,
    max_size: &str,
) -> Result<PathBuf> {
    let template = media_dir.join(format!("{}.%(ext)s", stem));

    let output = ytdlp
        .command()
        .args([
            "--abort-on-error",
            "--no-color",
            "--no-playlist",
            "--no-progress",
            "--max-filesize",
            max_size,
            "-f",
            "bestaudio/best[height<=720]/best",
            "-x",
            "--audio-format",
            "wav",
            "--audio-quality",
            "0",
            "-o",
        ])
        .arg(&template)
        .arg(url)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("no se pudo ejecutar {}", ytdlp.program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "yt-dlp terminó con {}: {}",
            output.status,
            stderr.lines().last().unwrap_or("").trim()
        );
    }

    let wav = media_dir.join(format!("{}.wav", stem));
    if !fs::try_exists(&wav).await? {
        anyhow::bail!("yt-dlp no produjo {}", wav.display());
    }

    Ok(wav)
}

/// Decodifica `wav` a PCM s16le estéreo 48kHz, lo pasa por el encoder y
/// escribe los frames validados en `out`.
///
/// El archivo se escribe como `<out>.part` y se renombra al terminar, así
/// nunca queda un archivo de frames a medias con el nombre final.
pub async fn transcode(
    ffmpeg: &ToolCommand,
    encoder: &ToolCommand,
    wav: &Path,
    out: &Path,
    gain_db: f32,
    pipe_chunks: usize,
) -> Result<u64> {
    let mut decoder = ffmpeg
        .command()
        .args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(wav)
        .args(["-f", "s16le", "-ar", "48000", "-ac", "2", "-af"])
        .arg(format!("volume={}dB", gain_db))
        .arg("pipe:1")
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("no se pudo ejecutar {}", ffmpeg.program))?;

    let mut encoder_proc = encoder
        .command()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("no se pudo ejecutar {}", encoder.program))?;

    let pcm = decoder.stdout.take().context("decoder sin stdout")?;
    let encoder_in = encoder_proc.stdin.take().context("encoder sin stdin")?;
    let encoder_out = encoder_proc.stdout.take().context("encoder sin stdout")?;

    let part = part_path(out);
    let (tx, rx) = flume::bounded(pipe_chunks.max(1));

    let result = futures::try_join!(
        pump(pcm, tx),
        drain(rx, encoder_in),
        write_frames(encoder_out, &part),
    );

    let (pcm_bytes, _, frames) = match result {
        Ok(done) => done,
        Err(e) => {
            let _ = fs::remove_file(&part).await;
            return Err(e);
        }
    };

    let decoder_status = decoder.wait().await?;
    let encoder_status = encoder_proc.wait().await?;
    if !decoder_status.success() || !encoder_status.success() {
        let _ = fs::remove_file(&part).await;
        anyhow::bail!(
            "conversión fallida (decoder: {}, encoder: {})",
            decoder_status,
            encoder_status
        );
    }

    fs::rename(&part, out).await?;
    debug!("🎚️ {} bytes PCM => {} frames", pcm_bytes, frames);
    Ok(frames)
}

fn part_path(out: &Path) -> PathBuf {
    let mut name = out.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    out.with_file_name(name)
}

/// Lee bloques del decoder y los pasa al canal acotado; cerrar el canal
/// indica fin de datos.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: flume::Sender<Bytes>) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let mut chunk = BytesMut::with_capacity(PIPE_CHUNK_SIZE);
        let n = reader.read_buf(&mut chunk).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
        tx.send_async(chunk.freeze())
            .await
            .map_err(|_| anyhow::anyhow!("el encoder dejó de recibir datos"))?;
    }
    Ok(total)
}

/// Escribe los bloques en la entrada del encoder y la cierra al terminar.
async fn drain<W: AsyncWrite + Unpin>(rx: flume::Receiver<Bytes>, mut writer: W) -> Result<u64> {
    let mut total = 0u64;
    while let Ok(chunk) = rx.recv_async().await {
        writer
            .write_all(&chunk)
            .await
            .context("el encoder cerró su entrada")?;
        total += chunk.len() as u64;
    }
    writer.shutdown().await?;
    drop(writer);
    Ok(total)
}

/// Valida la salida del encoder registro por registro mientras la escribe.
async fn write_frames<R: AsyncRead + Unpin>(encoded: R, part: &Path) -> Result<u64> {
    let file = File::create(part)
        .await
        .with_context(|| format!("no se pudo crear {}", part.display()))?;

    let mut reader = FrameReader::new(BufReader::new(encoded));
    let mut writer = FrameWriter::new(BufWriter::new(file));

    while let Some(frame) = reader.next_frame_strict().await? {
        writer.write_frame(&frame).await?;
    }

    let frames = writer.frames_written();
    let file = writer.finish().await?.into_inner();
    file.sync_all().await?;

    if frames == 0 {
        anyhow::bail!("el encoder no produjo frames");
    }
    Ok(frames)
}

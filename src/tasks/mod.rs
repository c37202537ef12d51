//! # Background Tasks
//!
//! Long-running loops that keep the bot consistent without user input:
//!
//! - [`waiter`]: promotes a pending asset into its connection's playlist
//!   once the acquisition worker finishes it
//! - [`janitor`]: removes media files no catalog entry refers to
//! - [`auto_leave`]: leaves voice channels nobody is listening in
//!
//! Tasks that must survive crashes run under [`supervise`].

pub mod auto_leave;
pub mod janitor;
pub mod waiter;

use anyhow::Result;
use std::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Ejecuta una tarea y la reinicia tras `restart_delay` si falla o entra en pánico.
///
/// Una salida con `Ok(())` termina la supervisión, igual que cancelar
/// `shutdown`.
pub async fn supervise<F, Fut>(
    name: String,
    restart_delay: Duration,
    shutdown: CancellationToken,
    mut task: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        let handle = tokio::spawn(task());

        match handle.await {
            Ok(Ok(())) => {
                debug!("✅ {} terminó", name);
                return;
            }
            Ok(Err(e)) => error!("💥 {} falló: {:?}", name, e),
            Err(e) if e.is_panic() => error!("💥 {} entró en pánico", name),
            Err(e) => {
                warn!("{} fue cancelada: {}", name, e);
                return;
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(restart_delay) => {}
        }
        info!("🔄 Reiniciando {}", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn test_panicking_task_is_restarted() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        supervise(
            "prueba".into(),
            Duration::from_millis(1),
            CancellationToken::new(),
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("primer intento");
                    }
                    Ok(())
                }
            },
        )
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_task_is_restarted_until_success() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        supervise(
            "prueba".into(),
            Duration::from_millis(1),
            CancellationToken::new(),
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                        anyhow::bail!("todavía no");
                    }
                    Ok(())
                }
            },
        )
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_shutdown_stops_restarts() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        supervise(
            "prueba".into(),
            Duration::from_secs(60),
            shutdown,
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("siempre falla")
                }
            },
        )
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}

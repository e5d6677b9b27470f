use async_trait::async_trait;
use std::{process::Stdio, time::Duration};
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::{FetchedTrack, Fetcher};
use crate::error::{JukeboxError, Result};

/// Fetcher que delega la descarga en un proceso worker externo.
///
/// The worker is invoked once per miss as `<command...> <source_ref>`. It
/// must download the audio into the cache directory and print one JSON
/// record describing it on stdout. A non-zero exit status is reported as
/// [`JukeboxError::Fetch`] carrying the worker's stderr.
#[derive(Debug, Clone)]
pub struct WorkerFetcher {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl WorkerFetcher {
    pub fn new(command: &[String], timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| JukeboxError::Fetch("comando del worker vacío".to_string()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    /// Verifica que el programa del worker esté disponible
    ///
    /// When the first argument is a script (not a flag), the script must
    /// exist too: `python worker.py --version` only proves Python is there.
    pub async fn health_check(&self) -> anyhow::Result<()> {
        if let Some(script) = self.args.first().filter(|arg| !arg.starts_with('-')) {
            if !tokio::fs::try_exists(script).await.unwrap_or(false) {
                anyhow::bail!("No se encontró el script del worker: {}", script);
            }
        }

        let output = async_process::Command::new(&self.program)
            .arg("--version")
            .output()
            .await?;

        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            info!("✅ Worker disponible: {} {}", self.program, version.trim());
            Ok(())
        } else {
            anyhow::bail!("El worker {} no respondió a --version", self.program)
        }
    }

    fn parse_output(stdout: &str) -> Result<FetchedTrack> {
        let trimmed = stdout.trim();
        if let Ok(track) = serde_json::from_str(trimmed) {
            return Ok(track);
        }

        // El worker puede imprimir logs antes del registro final
        let last_line = trimmed.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or("");
        serde_json::from_str(last_line)
            .map_err(|e| JukeboxError::Fetch(format!("respuesta inválida del worker: {}", e)))
    }
}

#[async_trait]
impl Fetcher for WorkerFetcher {
    async fn fetch(&self, source_ref: &str) -> Result<FetchedTrack> {
        info!("📥 Descargando con worker: {}", source_ref);

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .arg(source_ref)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("❌ No se pudo iniciar el worker {}: {}", self.program, e);
                return Err(JukeboxError::Fetch(format!(
                    "no se pudo iniciar {}: {}",
                    self.program, e
                )));
            }
            Err(_) => {
                error!("⏰ Timeout del worker para: {}", source_ref);
                return Err(JukeboxError::Fetch(format!(
                    "el worker excedió {}",
                    humantime::format_duration(self.timeout)
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = match stderr.trim() {
                "" => format!("el worker terminó con {}", output.status),
                msg => msg.to_string(),
            };
            error!("❌ Worker falló para {}: {}", source_ref, message);
            return Err(JukeboxError::Fetch(message));
        }

        let track = Self::parse_output(&String::from_utf8_lossy(&output.stdout))?;
        debug!("Worker devolvió: {} -> {}", track.title, track.file_path.display());
        Ok(track)
    }
}

use std::path::PathBuf;
use thiserror::Error;

use crate::audio::ConnectionId;

/// Errores del núcleo de reproducción y caché.
///
/// Every variant is a local, recoverable condition: callers map the
/// `Display` text straight into the message shown to the user.
#[derive(Debug, Error)]
pub enum JukeboxError {
    #[error("No se pudo extraer un ID de video de: {0}")]
    InvalidReference(String),

    #[error("El worker de descarga falló: {0}")]
    Fetch(String),

    #[error("El ID {0} ya está en la caché")]
    DuplicateId(String),

    #[error("Canción no encontrada en la caché: {0}")]
    NotFound(String),

    #[error("Formato de tamaño inválido '{0}'. Usa un formato como 5GB, 500MB, etc.")]
    InvalidBudget(String),

    #[error("Error de almacenamiento al {action} {}: {source}", path.display())]
    Storage {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Índice de caché corrupto en {}: {source}", path.display())]
    CorruptIndex {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Error del transporte de audio: {0}")]
    Transport(String),

    #[error("No hay una sesión de voz activa para la conexión {0}")]
    NoSession(ConnectionId),

    #[error("Ya existe una sesión de voz para la conexión {0}")]
    AlreadyConnected(ConnectionId),
}

impl JukeboxError {
    pub fn storage(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            action,
            path: path.into(),
            source,
        }
    }

    /// Whether the error comes from the filesystem layer rather than from user input.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::CorruptIndex { .. })
    }
}

pub type Result<T> = std::result::Result<T, JukeboxError>;

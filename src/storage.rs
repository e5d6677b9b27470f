use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheIndex};
use crate::error::{JukeboxError, Result};

/// Archivos persistentes de la caché: índice de metadata y límite de bytes.
///
/// Both documents are rewritten wholesale on every mutation. Writes go to a
/// sibling `.tmp` file first and are renamed into place, so a crash never
/// leaves a half-written index behind. Callers serialize writers through the
/// cache store lock.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    asset_dir: PathBuf,
    index_path: PathBuf,
    budget_path: PathBuf,
}

impl JsonStorage {
    pub async fn new(asset_dir: PathBuf, index_file: &str, budget_file: &str) -> Result<Self> {
        fs::create_dir_all(&asset_dir)
            .await
            .map_err(|e| JukeboxError::storage("crear", &asset_dir, e))?;
        // Ruta absoluta: los archivos fijados y los listados deben compararse igual
        let asset_dir = fs::canonicalize(&asset_dir)
            .await
            .map_err(|e| JukeboxError::storage("resolver", &asset_dir, e))?;

        let storage = Self {
            index_path: asset_dir.join(index_file),
            budget_path: asset_dir.join(budget_file),
            asset_dir,
        };

        info!("📁 Storage inicializado en: {}", storage.asset_dir.display());
        Ok(storage)
    }

    pub fn asset_dir(&self) -> &Path {
        &self.asset_dir
    }

    /// Normaliza la ruta de un archivo de audio y exige que viva en el directorio de la caché.
    ///
    /// Only files directly inside the asset directory are counted by
    /// [`used_bytes`](Self::used_bytes), so anything else could never be
    /// held to the budget.
    pub async fn asset_path(&self, path: &Path) -> Result<PathBuf> {
        let canonical = fs::canonicalize(path)
            .await
            .map_err(|e| JukeboxError::storage("leer", path, e))?;

        if canonical.parent() != Some(self.asset_dir.as_path()) || self.is_bookkeeping(&canonical) {
            return Err(JukeboxError::storage(
                "aceptar",
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "fuera del directorio de la caché"),
            ));
        }
        Ok(canonical)
    }

    /// Carga el índice, descartando entradas cuyo archivo ya no existe.
    ///
    /// A missing index file is an empty cache. When stale entries are dropped
    /// the pruned index is written back immediately.
    pub async fn load_index(&self) -> Result<CacheIndex> {
        let content = match fs::read_to_string(&self.index_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Índice inexistente, iniciando caché vacía");
                return Ok(CacheIndex::new());
            }
            Err(e) => return Err(JukeboxError::storage("leer", &self.index_path, e)),
        };

        let entries: HashMap<String, CacheEntry> =
            serde_json::from_str(&content).map_err(|source| JukeboxError::CorruptIndex {
                path: self.index_path.clone(),
                source,
            })?;

        let mut index = CacheIndex::new();
        let mut dropped = 0;
        for (id, mut entry) in entries {
            if let Ok(file_path) = fs::canonicalize(&entry.file_path).await {
                entry.file_path = file_path;
                index.insert(id, entry);
            } else {
                warn!("🗑️ Entrada {} sin archivo en disco, descartada", id);
                dropped += 1;
            }
        }

        if dropped > 0 {
            self.save_index(&index).await?;
        }

        info!("📂 Cargadas {} entradas del índice de caché", index.len());
        Ok(index)
    }

    pub async fn save_index(&self, index: &CacheIndex) -> Result<()> {
        let content = serde_json::to_string_pretty(index.as_map()).map_err(|source| {
            JukeboxError::CorruptIndex {
                path: self.index_path.clone(),
                source,
            }
        })?;
        self.write_atomic(&self.index_path, content).await
    }

    /// Lee el límite de caché; si no existe o es ilegible se escribe el valor por defecto.
    pub async fn load_budget(&self, default_budget: u64) -> Result<u64> {
        match fs::read_to_string(&self.budget_path).await {
            Ok(content) => match content.trim().parse::<u64>() {
                Ok(budget) => return Ok(budget),
                Err(_) => warn!(
                    "⚠️ Límite de caché ilegible en {}, usando valor por defecto",
                    self.budget_path.display()
                ),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(JukeboxError::storage("leer", &self.budget_path, e)),
        }

        self.save_budget(default_budget).await?;
        Ok(default_budget)
    }

    pub async fn save_budget(&self, budget: u64) -> Result<()> {
        self.write_atomic(&self.budget_path, budget.to_string()).await
    }

    /// Suma el tamaño de los archivos de audio del directorio (no recursivo).
    ///
    /// The store's own index and budget documents, and their temp files, are
    /// not counted against the budget.
    pub async fn used_bytes(&self) -> Result<u64> {
        let mut files = fs::read_dir(&self.asset_dir)
            .await
            .map_err(|e| JukeboxError::storage("listar", &self.asset_dir, e))?;
        let mut total = 0;

        while let Some(entry) = files
            .next_entry()
            .await
            .map_err(|e| JukeboxError::storage("listar", &self.asset_dir, e))?
        {
            let path = entry.path();
            if self.is_bookkeeping(&path) {
                continue;
            }
            // Un archivo puede desaparecer entre read_dir y metadata
            if let Ok(metadata) = entry.metadata().await {
                if metadata.is_file() {
                    total += metadata.len();
                }
            }
        }

        Ok(total)
    }

    /// Borra un archivo de audio. Un archivo ya inexistente cuenta como borrado.
    pub async fn remove_asset(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Archivo {} ya no existía", path.display());
                Ok(())
            }
            Err(e) => Err(JukeboxError::storage("borrar", path, e)),
        }
    }

    /// Lista los archivos de audio del directorio, sin los documentos internos.
    pub async fn asset_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = fs::read_dir(&self.asset_dir)
            .await
            .map_err(|e| JukeboxError::storage("listar", &self.asset_dir, e))?;
        let mut paths = Vec::new();

        while let Some(entry) = files
            .next_entry()
            .await
            .map_err(|e| JukeboxError::storage("listar", &self.asset_dir, e))?
        {
            let path = entry.path();
            if !self.is_bookkeeping(&path) && entry.file_type().await.map_or(false, |t| t.is_file()) {
                paths.push(path);
            }
        }

        Ok(paths)
    }

    fn is_bookkeeping(&self, path: &Path) -> bool {
        path == self.index_path
            || path == self.budget_path
            || path == tmp_path(&self.index_path)
            || path == tmp_path(&self.budget_path)
    }

    async fn write_atomic(&self, path: &Path, content: String) -> Result<()> {
        let tmp = tmp_path(path);
        fs::write(&tmp, content)
            .await
            .map_err(|e| JukeboxError::storage("escribir", &tmp, e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| JukeboxError::storage("reemplazar", path, e))?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

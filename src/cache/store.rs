use dashmap::DashMap;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, sync::Mutex};
use tracing::{debug, error, info, warn};

use super::{ActiveFiles, BudgetReport, CacheEntry, CacheIndex, CacheStatus};
use crate::{
    error::{JukeboxError, Result},
    sources::{derive_id, FetchedTrack, Fetcher},
    storage::JsonStorage,
};

/// Estado protegido por el lock de la caché.
#[derive(Debug)]
struct StoreState {
    index: CacheIndex,
    budget: u64,
}

/// Outcome of [`CacheStore::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub entry: CacheEntry,
    pub cache_hit: bool,
    /// Present when the entry was inserted and the budget was enforced
    pub report: Option<BudgetReport>,
}

/// Cuántos archivos borró `clear` y cuántos conservó por estar en reproducción.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearReport {
    pub removed_files: usize,
    pub kept_entries: usize,
}

/// Disk-backed cache of fetched tracks, bounded by a byte budget.
///
/// `put`, eviction, `set_budget` and `clear` all run under a single async
/// mutex, which is also the only writer of the index and budget files.
/// Eviction removes the oldest entry by `created_at`, skipping any file in
/// [`ActiveFiles`], and never waits for a playing file to become free.
pub struct CacheStore {
    storage: JsonStorage,
    state: Mutex<StoreState>,
    active: ActiveFiles,
    fetcher: Arc<dyn Fetcher>,
    default_budget: u64,
    /// Un lock por ID en resolución, para que el worker corra una sola vez
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl CacheStore {
    /// Abre la caché cargando índice y límite desde disco.
    pub async fn open(
        storage: JsonStorage,
        default_budget: u64,
        active: ActiveFiles,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let index = storage.load_index().await?;
        let budget = storage.load_budget(default_budget).await?;

        let indexed: HashSet<&Path> = index.values().map(|entry| entry.file_path.as_path()).collect();
        let orphans = storage
            .asset_files()
            .await?
            .iter()
            .filter(|path| !indexed.contains(path.as_path()))
            .count();
        if orphans > 0 {
            warn!("⚠️ {} archivos en la caché no figuran en el índice", orphans);
        }

        info!(
            "🗄️ Caché abierta: {} entradas, límite de {}",
            index.len(),
            super::budget::format_bytes(budget)
        );

        Ok(Self {
            storage,
            state: Mutex::new(StoreState { index, budget }),
            active,
            fetcher,
            default_budget,
            inflight: DashMap::new(),
        })
    }

    pub async fn lookup(&self, id: &str) -> Option<CacheEntry> {
        self.state.lock().await.index.get(id).cloned()
    }

    /// Todas las entradas, de la más antigua a la más reciente.
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let state = self.state.lock().await;
        state.index.oldest_first().into_iter().cloned().collect()
    }

    pub async fn budget(&self) -> u64 {
        self.state.lock().await.budget
    }

    pub async fn status(&self) -> Result<CacheStatus> {
        let state = self.state.lock().await;
        Ok(CacheStatus {
            entries: state.index.len(),
            used_bytes: self.storage.used_bytes().await?,
            budget_bytes: state.budget,
        })
    }

    /// Agrega una entrada cuyo archivo ya existe y aplica el límite.
    ///
    /// The file must sit directly in the asset directory; its path is stored
    /// in canonical form. The new entry is never evicted by the enforcement
    /// pass it triggers.
    pub async fn put(&self, mut entry: CacheEntry) -> Result<BudgetReport> {
        let mut state = self.state.lock().await;

        if state.index.contains(&entry.id) {
            return Err(JukeboxError::DuplicateId(entry.id));
        }

        entry.file_path = self.storage.asset_path(&entry.file_path).await?;

        let id = entry.id.clone();
        state.index.insert(id.clone(), entry);
        if let Err(e) = self.storage.save_index(&state.index).await {
            state.index.remove(&id);
            return Err(e);
        }
        debug!("💾 Entrada {} agregada al índice", id);

        self.enforce_locked(&mut state, Some(&id)).await
    }

    pub async fn enforce_budget(&self) -> Result<BudgetReport> {
        let mut state = self.state.lock().await;
        self.enforce_locked(&mut state, None).await
    }

    /// Elimina la entrada más antigua que no esté en reproducción.
    pub async fn evict_oldest(&self) -> Result<Option<CacheEntry>> {
        let mut state = self.state.lock().await;
        self.evict_oldest_locked(&mut state, None).await
    }

    pub async fn set_budget(&self, bytes: u64) -> Result<BudgetReport> {
        let mut state = self.state.lock().await;
        self.storage.save_budget(bytes).await?;
        state.budget = bytes;
        info!("📏 Límite de caché fijado en {}", super::budget::format_bytes(bytes));

        self.enforce_locked(&mut state, None).await
    }

    /// Borra todos los archivos y el índice, y restaura el límite por defecto.
    ///
    /// Files currently being played are kept, together with their entries, so
    /// the index never points at a deleted file.
    pub async fn clear(&self) -> Result<ClearReport> {
        let mut state = self.state.lock().await;

        let mut removed_files = 0;
        let mut failure = None;
        for path in self.storage.asset_files().await? {
            if self.active.is_active(&path) {
                debug!("⏭️ {} está en reproducción, se conserva", path.display());
                continue;
            }
            match self.storage.remove_asset(&path).await {
                Ok(()) => removed_files += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // El índice sigue exactamente a lo que quedó en disco
        let mut kept = CacheIndex::new();
        for entry in state.index.values() {
            if fs::try_exists(&entry.file_path).await.unwrap_or(false) {
                kept.insert(entry.id.clone(), entry.clone());
            }
        }
        self.storage.save_index(&kept).await?;
        state.index = kept;

        if let Some(e) = failure {
            error!("❌ Limpieza de caché interrumpida: {}", e);
            return Err(e);
        }

        self.storage.save_budget(self.default_budget).await?;
        state.budget = self.default_budget;

        info!(
            "🗑️ Caché limpiada: {} archivos borrados, {} en uso conservados",
            removed_files,
            state.index.len()
        );
        Ok(ClearReport {
            removed_files,
            kept_entries: state.index.len(),
        })
    }

    /// Resuelve una referencia a una entrada en caché, descargándola si falta.
    ///
    /// Concurrent calls for the same id share one fetch. Fetch failures are
    /// returned unchanged and leave the cache untouched.
    pub async fn resolve(&self, source_ref: &str) -> Result<Resolved> {
        let id = derive_id(source_ref)
            .ok_or_else(|| JukeboxError::InvalidReference(source_ref.to_string()))?;

        if let Some(entry) = self.lookup(&id).await {
            debug!("✅ Cache hit para {}", id);
            return Ok(Resolved {
                entry,
                cache_hit: true,
                report: None,
            });
        }

        let gate = self.inflight.entry(id.clone()).or_default().clone();
        let result = {
            let _guard = gate.lock().await;
            self.resolve_miss(&id, source_ref).await
        };
        // Lo quita del mapa solo el último que lo suelta
        self.inflight
            .remove_if(&id, |_, current| Arc::ptr_eq(current, &gate) && Arc::strong_count(current) == 2);
        result
    }

    async fn resolve_miss(&self, id: &str, source_ref: &str) -> Result<Resolved> {
        // Otra resolución del mismo ID pudo terminar mientras esperábamos
        if let Some(entry) = self.lookup(id).await {
            return Ok(Resolved {
                entry,
                cache_hit: true,
                report: None,
            });
        }

        debug!("❌ Cache miss para {}, invocando worker", id);
        let fetched = self.fetcher.fetch(source_ref).await?;
        let entry = self.entry_from_fetch(id, fetched).await?;

        match self.put(entry.clone()).await {
            Ok(report) => {
                info!("📥 Descargada y cacheada: {} ({})", entry.title, entry.id);
                Ok(Resolved {
                    entry,
                    cache_hit: false,
                    report: Some(report),
                })
            }
            Err(JukeboxError::DuplicateId(_)) => {
                let entry = self
                    .lookup(id)
                    .await
                    .ok_or_else(|| JukeboxError::NotFound(id.to_string()))?;
                Ok(Resolved {
                    entry,
                    cache_hit: true,
                    report: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn entry_from_fetch(&self, id: &str, fetched: FetchedTrack) -> Result<CacheEntry> {
        if fetched.id.as_deref().map_or(false, |fetched_id| fetched_id != id) {
            warn!(
                "⚠️ El worker devolvió el ID {:?} para {}, se usa el ID derivado",
                fetched.id, id
            );
        }

        let located = self.locate_asset(&fetched.file_path).await;
        let file_path = self.storage.asset_path(&located).await.map_err(|e| {
            JukeboxError::Fetch(format!("archivo del worker inválido ({}): {}", located.display(), e))
        })?;
        Ok(fetched.into_entry(id.to_string(), file_path))
    }

    /// Rutas relativas se buscan primero dentro del directorio de la caché.
    async fn locate_asset(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let inside = self.storage.asset_dir().join(path);
        if fs::try_exists(&inside).await.unwrap_or(false) {
            inside
        } else {
            path.to_path_buf()
        }
    }

    async fn enforce_locked(
        &self,
        state: &mut StoreState,
        protect: Option<&str>,
    ) -> Result<BudgetReport> {
        let mut used = self.storage.used_bytes().await?;
        let mut evicted = Vec::new();

        while used > state.budget {
            match self.evict_oldest_locked(state, protect).await? {
                Some(entry) => {
                    evicted.push(entry.id);
                    used = self.storage.used_bytes().await?;
                }
                None => break,
            }
        }

        let report = BudgetReport {
            used_bytes: used,
            budget_bytes: state.budget,
            evicted,
            unenforceable: used > state.budget,
        };

        if report.unenforceable {
            warn!(
                "⚠️ Caché sobre el límite sin entradas desalojables: {}",
                report
            );
        }

        Ok(report)
    }

    async fn evict_oldest_locked(
        &self,
        state: &mut StoreState,
        protect: Option<&str>,
    ) -> Result<Option<CacheEntry>> {
        let candidate = state
            .index
            .oldest_first()
            .into_iter()
            .find(|entry| {
                if Some(entry.id.as_str()) == protect {
                    return false;
                }
                if self.active.is_active(&entry.file_path) {
                    debug!("⏭️ {} está en reproducción, no se desaloja", entry.id);
                    return false;
                }
                true
            })
            .cloned();

        let Some(entry) = candidate else {
            return Ok(None);
        };

        self.storage.remove_asset(&entry.file_path).await?;
        state.index.remove(&entry.id);
        self.storage.save_index(&state.index).await?;

        info!("🧹 Desalojada de la caché: {} ({})", entry.title, entry.id);
        Ok(Some(entry))
    }
}

use chrono::{DateTime, Utc};
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use crate::cache::CacheEntry;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub entry: CacheEntry,
    pub requested_by: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl From<CacheEntry> for QueueItem {
    fn from(entry: CacheEntry) -> Self {
        Self {
            entry,
            requested_by: None,
            added_at: Utc::now(),
        }
    }
}

impl QueueItem {
    pub fn requested_by(mut self, user: impl Into<String>) -> Self {
        self.requested_by = Some(user.into());
        self
    }
}

/// Cola FIFO de canciones ya resueltas, sin límite de tamaño.
///
/// Not synchronized on its own: the owning session mutates it only while
/// holding its state lock.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    items: VecDeque<QueueItem>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track al final de la cola y devuelve su posición (1 = siguiente).
    pub fn enqueue(&mut self, item: QueueItem) -> usize {
        info!("➕ Agregado a la cola: {}", item.entry.title);
        self.items.push_back(item);
        self.items.len()
    }

    /// Obtiene el siguiente track (FIFO - First In, First Out)
    pub fn dequeue(&mut self) -> Option<QueueItem> {
        let next = self.items.pop_front();
        match &next {
            Some(item) => info!("➡️ Siguiente en cola (FIFO): {}", item.entry.title),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    /// Copia del contenido en orden, sin modificar la cola.
    pub fn peek_all(&self) -> Vec<QueueItem> {
        self.items.iter().cloned().collect()
    }

    /// Vacía la cola y devuelve cuántos tracks se descartaron
    pub fn drain(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        if cleared > 0 {
            info!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        }
        cleared
    }

    pub fn total_duration(&self) -> Duration {
        self.items.iter().map(|item| item.entry.duration()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(id: &str, secs: u64) -> QueueItem {
        QueueItem::from(CacheEntry {
            id: id.to_string(),
            title: format!("Song {id}"),
            source_url: String::new(),
            thumbnail_url: String::new(),
            duration_seconds: secs,
            file_path: format!("cache/{id}.mp3").into(),
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = PlaybackQueue::new();
        assert_eq!(queue.enqueue(item("A", 10)), 1);
        assert_eq!(queue.enqueue(item("B", 20)), 2);

        assert_eq!(queue.dequeue().unwrap().entry.id, "A");
        assert_eq!(queue.dequeue().unwrap().entry.id, "B");
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_peek_all_does_not_mutate() {
        let mut queue = PlaybackQueue::new();
        queue.enqueue(item("A", 10));
        queue.enqueue(item("B", 20).requested_by("rick"));

        let snapshot: Vec<_> = queue.peek_all().into_iter().map(|i| i.entry.id).collect();

        assert_eq!(snapshot, vec!["A", "B"]);
        assert_eq!(queue.peek_all().len(), 2);
        assert_eq!(queue.total_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut queue = PlaybackQueue::new();
        queue.enqueue(item("A", 10));
        queue.enqueue(item("B", 20));

        assert_eq!(queue.drain(), 2);
        assert!(queue.dequeue().is_none());
    }
}

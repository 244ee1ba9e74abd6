use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::sources::{same_track, TrackRef};

pub const DEFAULT_HISTORY_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("la cola está vacía")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    /// Repetir el track actual
    Track,
    /// Repetir la cola completa desde el historial
    Queue,
}

/// Historial acotado; el último elemento es el más reciente
#[derive(Debug)]
pub struct History {
    items: VecDeque<TrackRef>,
    cap: usize,
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self {
            items: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, track: TrackRef) {
        if self.items.len() >= self.cap {
            self.items.pop_front();
        }
        self.items.push_back(track);
    }

    pub fn pop(&mut self) -> Option<TrackRef> {
        self.items.pop_back()
    }

    pub fn last(&self) -> Option<&TrackRef> {
        self.items.back()
    }

    /// Los `n` más recientes, del más nuevo al más viejo
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &TrackRef> {
        self.items.iter().rev().take(n)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TrackRef> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn drain(&mut self) -> impl Iterator<Item = TrackRef> + '_ {
        self.items.drain(..)
    }
}

/// Cola FIFO con inserción al frente, historial y modo de repetición
#[derive(Debug)]
pub struct MusicQueue {
    items: VecDeque<TrackRef>,
    history: History,
    loop_mode: LoopMode,
    /// Entrada sintética que agrega el modo `LoopMode::Track`
    loop_entry: Option<TrackRef>,
}

impl MusicQueue {
    pub fn new(history_cap: usize) -> Self {
        Self {
            items: VecDeque::new(),
            history: History::new(history_cap),
            loop_mode: LoopMode::Off,
            loop_entry: None,
        }
    }

    pub fn push_back(&mut self, track: TrackRef) {
        debug!("➕ Agregado a la cola: {}", track.title());
        self.items.push_back(track);
    }

    pub fn push_front(&mut self, track: TrackRef) {
        debug!("⏫ Agregado al frente: {}", track.title());
        self.items.push_front(track);
    }

    pub fn extend(&mut self, tracks: impl IntoIterator<Item = TrackRef>) -> usize {
        let before = self.items.len();
        self.items.extend(tracks);
        let added = self.items.len() - before;
        if added > 0 {
            info!("➕ Agregadas {} canciones a la cola", added);
        }
        added
    }

    /// Inserta al frente conservando el orden recibido
    pub fn extend_front(&mut self, tracks: Vec<TrackRef>) -> usize {
        let added = tracks.len();
        for track in tracks.into_iter().rev() {
            self.items.push_front(track);
        }
        added
    }

    pub fn pop(&mut self) -> Result<TrackRef, QueueError> {
        if self.items.is_empty() && self.loop_mode == LoopMode::Queue && !self.history.is_empty() {
            let replay: Vec<TrackRef> = self.history.drain().collect();
            info!("🔁 Repitiendo la cola: {} canciones desde el historial", replay.len());
            self.items.extend(replay);
        }

        let track = self.items.pop_front().ok_or(QueueError::Empty)?;
        if self.loop_entry.as_ref().is_some_and(|entry| same_track(entry, &track)) {
            self.loop_entry = None;
        }
        Ok(track)
    }

    pub fn peek_at(&self, index: usize) -> Option<&TrackRef> {
        self.items.get(index)
    }

    pub fn remove_at(&mut self, index: usize) -> Option<TrackRef> {
        let removed = self.items.remove(index)?;
        if self.loop_entry.as_ref().is_some_and(|entry| same_track(entry, &removed)) {
            self.loop_entry = None;
        }
        debug!("❌ Track eliminado en posición {}", index);
        Some(removed)
    }

    pub fn contains(&self, track: &TrackRef) -> bool {
        self.items.iter().any(|t| same_track(t, track))
    }

    /// Vacía los pendientes; el historial se conserva
    pub fn clear(&mut self) {
        self.items.clear();
        self.loop_entry = None;
        info!("🗑️ Cola limpiada");
    }

    /// Pendientes, historial y modo vuelven al estado inicial
    pub fn reset(&mut self) {
        self.items.clear();
        self.history.clear();
        self.loop_mode = LoopMode::Off;
        self.loop_entry = None;
    }

    /// Mezcla solo los pendientes
    pub fn shuffle(&mut self) {
        self.items.make_contiguous().shuffle(&mut rand::thread_rng());
        info!("🔀 Cola mezclada");
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackRef> {
        self.items.iter()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// Cambia el modo. `playing` es el track que suena, si lo hay.
    pub fn set_loop_mode(&mut self, mode: LoopMode, playing: Option<&TrackRef>) {
        let previous = self.loop_mode;
        if previous == mode {
            return;
        }

        if previous == LoopMode::Track {
            if let Some(entry) = self.loop_entry.take() {
                if let Some(pos) = self.items.iter().position(|t| same_track(t, &entry)) {
                    self.items.remove(pos);
                }
            }
        }

        if mode == LoopMode::Track {
            if let Some(track) = playing {
                self.items.push_front(TrackRef::clone(track));
                self.loop_entry = Some(TrackRef::clone(track));
            }
        }

        self.loop_mode = mode;
        match mode {
            LoopMode::Off => info!("➡️ Repetición desactivada"),
            LoopMode::Track => info!("🔂 Repetir canción activado"),
            LoopMode::Queue => info!("🔁 Repetir cola activado"),
        }
    }

    /// Quita la entrada sintética de la repetición si sigue pendiente
    pub fn drop_loop_entry(&mut self) -> Option<TrackRef> {
        let entry = self.loop_entry.take()?;
        let pos = self.items.iter().position(|t| same_track(t, &entry))?;
        self.items.remove(pos)
    }

    /// Deja `track` al frente para que se repita, sin duplicarlo
    pub fn requeue_looped(&mut self, track: &TrackRef) {
        if self.items.front().is_some_and(|front| same_track(front, track)) {
            self.loop_entry = Some(TrackRef::clone(track));
            return;
        }
        if let Some(pos) = self.items.iter().position(|t| same_track(t, track)) {
            self.items.remove(pos);
        }
        self.items.push_front(TrackRef::clone(track));
        self.loop_entry = Some(TrackRef::clone(track));
        debug!("🔂 Repitiendo track: {}", track.title());
    }

    pub fn total_duration(&self) -> Duration {
        self.items
            .iter()
            .filter(|t| !t.is_stream())
            .map(|t| t.duration())
            .sum()
    }

    /// Obtiene una página (base 1) de los pendientes
    pub fn page(&self, page: usize, per_page: usize) -> QueuePage {
        paginate(self.items.iter().cloned().collect(), page, per_page)
    }
}

/// Página `page` (base 1) de `items`; fuera de rango se ajusta al límite
pub fn paginate(items: Vec<TrackRef>, page: usize, per_page: usize) -> QueuePage {
    let per_page = per_page.max(1);
    let total_items = items.len();
    let total_pages = if total_items == 0 { 1 } else { total_items.div_ceil(per_page) };
    let current_page = page.clamp(1, total_pages);
    let start = (current_page - 1) * per_page;

    QueuePage {
        items: items.into_iter().skip(start).take(per_page).collect(),
        first_index: start,
        current_page,
        total_pages,
        total_items,
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<TrackRef>,
    /// Posición absoluta del primer elemento
    pub first_index: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::video_ref;
    use pretty_assertions::assert_eq;

    fn ids<'a>(tracks: impl Iterator<Item = &'a TrackRef>) -> Vec<String> {
        tracks.map(|t| t.identifier().to_string()).collect()
    }

    #[test]
    fn test_fifo_with_front_priority() {
        let mut queue = MusicQueue::new(DEFAULT_HISTORY_CAP);
        queue.push_back(video_ref("a"));
        queue.push_back(video_ref("b"));
        queue.push_front(video_ref("front"));
        queue.extend_front(vec![video_ref("x"), video_ref("y")]);

        let order: Vec<String> = std::iter::from_fn(|| queue.pop().ok())
            .map(|t| t.identifier().to_string())
            .collect();

        assert_eq!(order, vec!["x", "y", "front", "a", "b"]);
        assert_eq!(queue.pop().unwrap_err(), QueueError::Empty);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut queue = MusicQueue::new(3);
        for id in ["1", "2", "3", "4", "5"] {
            queue.history_mut().push(video_ref(id));
        }

        assert_eq!(queue.history().len(), 3);
        assert_eq!(ids(queue.history().iter()), vec!["3", "4", "5"]);
        assert_eq!(ids(queue.history().recent(2)), vec!["5", "4"]);
    }

    #[test]
    fn test_loop_queue_replays_history() {
        let mut queue = MusicQueue::new(DEFAULT_HISTORY_CAP);
        queue.history_mut().push(video_ref("1"));
        queue.history_mut().push(video_ref("2"));
        queue.set_loop_mode(LoopMode::Queue, None);

        assert_eq!(queue.pop().unwrap().identifier(), "1");
        assert!(queue.history().is_empty());
        assert_eq!(queue.count(), 1);
    }

    #[test]
    fn test_loop_track_adds_and_removes_synthetic_entry() {
        let mut queue = MusicQueue::new(DEFAULT_HISTORY_CAP);
        let playing = video_ref("now");
        queue.push_back(video_ref("next"));

        queue.set_loop_mode(LoopMode::Track, Some(&playing));
        assert!(same_track(queue.peek_at(0).unwrap(), &playing));

        queue.set_loop_mode(LoopMode::Off, None);
        assert_eq!(ids(queue.iter()), vec!["next"]);
    }

    #[test]
    fn test_drop_loop_entry_keeps_mode() {
        let mut queue = MusicQueue::new(DEFAULT_HISTORY_CAP);
        let playing = video_ref("now");
        queue.push_back(video_ref("next"));
        queue.set_loop_mode(LoopMode::Track, Some(&playing));

        let dropped = queue.drop_loop_entry().unwrap();

        assert!(same_track(&dropped, &playing));
        assert!(queue.drop_loop_entry().is_none());
        assert_eq!(queue.loop_mode(), LoopMode::Track);
        assert_eq!(queue.pop().unwrap().identifier(), "next");
    }

    #[test]
    fn test_requeue_looped_does_not_duplicate() {
        let mut queue = MusicQueue::new(DEFAULT_HISTORY_CAP);
        let looped = video_ref("loop");
        queue.set_loop_mode(LoopMode::Track, Some(&looped));
        queue.push_front(video_ref("user"));

        queue.requeue_looped(&looped);
        queue.requeue_looped(&looped);

        assert_eq!(ids(queue.iter()), vec!["loop", "user"]);
    }

    #[test]
    fn test_shuffle_keeps_history_and_items() {
        let mut queue = MusicQueue::new(DEFAULT_HISTORY_CAP);
        queue.history_mut().push(video_ref("h"));
        queue.extend((0..10).map(|i| video_ref(&i.to_string())));

        queue.shuffle();

        let mut shuffled = ids(queue.iter());
        shuffled.sort();
        let mut expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        expected.sort();
        assert_eq!(shuffled, expected);
        assert_eq!(ids(queue.history().iter()), vec!["h"]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut queue = MusicQueue::new(DEFAULT_HISTORY_CAP);
        queue.push_back(video_ref("a"));
        queue.history_mut().push(video_ref("b"));
        queue.set_loop_mode(LoopMode::Queue, None);

        queue.reset();

        assert!(queue.is_empty());
        assert!(queue.history().is_empty());
        assert_eq!(queue.loop_mode(), LoopMode::Off);
    }

    #[test]
    fn test_page() {
        let mut queue = MusicQueue::new(DEFAULT_HISTORY_CAP);
        queue.extend((0..12).map(|i| video_ref(&i.to_string())));

        let page = queue.page(2, 5);

        assert_eq!(page.total_pages, 3);
        assert_eq!(page.first_index, 5);
        assert_eq!(ids(page.items.iter()), vec!["5", "6", "7", "8", "9"]);
        assert_eq!(queue.page(99, 5).current_page, 3);
    }
}

//! Multi-resolution store: one bar sequence per resolution, populated on first read.
//!
//! - *historical* slots load from persistence, else parse the raw feed (finest) or
//!   consolidate the nearest finer slot whose bars tile them, then persist
//! - *realtime* slots fetch 1d/15m/5m/1m directly, round-trip 30m through persistence and
//!   consolidate everything between 1d and 30m from the 30m slot
//! - *custom* slots are only ever assigned (split halves, simulation output)
//!
//! Population runs under one store-wide mutex with a re-check after locking, so a slot is
//! populated at most once no matter how many threads race for it.

pub mod checks;

use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::data::{BarFeed, Persistence};
use crate::domain::{Bar, Resolution, Timestamp};
use crate::error::CoreError;
use crate::series::{consolidate, floor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Custom,
    Historical,
    Realtime,
}

impl StoreKind {
    pub fn label(self) -> &'static str {
        match self {
            StoreKind::Custom => "Custom",
            StoreKind::Historical => "Historical",
            StoreKind::Realtime => "Realtime",
        }
    }
}

type Slot = RwLock<Option<Arc<Vec<Bar>>>>;

pub struct MultiResolutionStore {
    kind: StoreKind,
    slots: [Slot; Resolution::COUNT],
    populate: Mutex<()>,
    feed: Option<Arc<dyn BarFeed>>,
    persistence: Option<Arc<dyn Persistence>>,
}

fn poisoned() -> CoreError {
    CoreError::invalid_state("store slot lock poisoned")
}

impl MultiResolutionStore {
    fn with_sources(
        kind: StoreKind,
        feed: Option<Arc<dyn BarFeed>>,
        persistence: Option<Arc<dyn Persistence>>,
    ) -> Self {
        Self {
            kind,
            slots: std::array::from_fn(|_| RwLock::new(None)),
            populate: Mutex::new(()),
            feed,
            persistence,
        }
    }

    pub fn custom() -> Self {
        Self::with_sources(StoreKind::Custom, None, None)
    }

    pub fn historical(feed: Arc<dyn BarFeed>, persistence: Arc<dyn Persistence>) -> Self {
        Self::with_sources(StoreKind::Historical, Some(feed), Some(persistence))
    }

    pub fn realtime(feed: Arc<dyn BarFeed>, persistence: Arc<dyn Persistence>) -> Self {
        Self::with_sources(StoreKind::Realtime, Some(feed), Some(persistence))
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn feed(&self) -> Option<&Arc<dyn BarFeed>> {
        self.feed.as_ref()
    }

    /// Bars of `resolution`, populating the slot on first access.
    pub fn bars(&self, resolution: Resolution) -> Result<Arc<Vec<Bar>>, CoreError> {
        if let Some(bars) = self.cached(resolution)? {
            return Ok(bars);
        }
        if self.kind == StoreKind::Custom {
            return Ok(Arc::new(Vec::new()));
        }
        let _guard = self.populate.lock().map_err(|_| poisoned())?;
        self.populate_locked(resolution)
    }

    pub fn count(&self, resolution: Resolution) -> Result<usize, CoreError> {
        Ok(self.bars(resolution)?.len())
    }

    /// Replace a slot wholesale.
    pub fn set_bars(&self, resolution: Resolution, bars: Vec<Bar>) -> Result<(), CoreError> {
        *self.slots[resolution.index()].write().map_err(|_| poisoned())? = Some(Arc::new(bars));
        Ok(())
    }

    pub fn is_populated(&self, resolution: Resolution) -> bool {
        self.slots[resolution.index()]
            .read()
            .is_ok_and(|slot| slot.is_some())
    }

    fn cached(&self, resolution: Resolution) -> Result<Option<Arc<Vec<Bar>>>, CoreError> {
        Ok(self.slots[resolution.index()]
            .read()
            .map_err(|_| poisoned())?
            .clone())
    }

    /// Caller holds `self.populate`. Finer slots this one depends on are filled recursively.
    fn populate_locked(&self, resolution: Resolution) -> Result<Arc<Vec<Bar>>, CoreError> {
        if let Some(bars) = self.cached(resolution)? {
            return Ok(bars);
        }
        let bars = match self.kind {
            StoreKind::Custom => Vec::new(),
            StoreKind::Historical => self.load_historical(resolution)?,
            StoreKind::Realtime => self.load_realtime(resolution)?,
        };
        let bars = Arc::new(bars);
        *self.slots[resolution.index()].write().map_err(|_| poisoned())? = Some(Arc::clone(&bars));
        Ok(bars)
    }

    fn sources(&self) -> Result<(&Arc<dyn BarFeed>, &Arc<dyn Persistence>), CoreError> {
        match (&self.feed, &self.persistence) {
            (Some(feed), Some(persistence)) => Ok((feed, persistence)),
            _ => Err(CoreError::invalid_state(format!(
                "{} store has no feed or persistence attached",
                self.kind.label()
            ))),
        }
    }

    fn load_historical(&self, resolution: Resolution) -> Result<Vec<Bar>, CoreError> {
        let (feed, persistence) = self.sources()?;
        let name = format!("historical_{}", resolution.name());
        if let Some(bars) = persistence.load_bars(&name)? {
            return Ok(bars);
        }
        let bars = match resolution.consolidation_source() {
            None => feed.fetch(resolution)?,
            Some(source) => self.consolidate_from(source, resolution)?,
        };
        persistence.save_bars(&name, &bars)?;
        Ok(bars)
    }

    fn load_realtime(&self, resolution: Resolution) -> Result<Vec<Bar>, CoreError> {
        let (feed, persistence) = self.sources()?;
        match resolution {
            Resolution::D1 | Resolution::M15 | Resolution::M5 | Resolution::M1 => {
                Ok(feed.fetch(resolution)?)
            }
            Resolution::M30 => {
                let name = format!("realtime_{}", resolution.name());
                persistence.save_bars(&name, &feed.fetch(resolution)?)?;
                persistence
                    .load_bars(&name)?
                    .ok_or_else(|| CoreError::not_found(format!("persisted bars '{name}'")))
            }
            _ => self.consolidate_from(Resolution::M30, resolution),
        }
    }

    fn consolidate_from(&self, source: Resolution, target: Resolution) -> Result<Vec<Bar>, CoreError> {
        let finer = self.populate_locked(source)?;
        if finer.is_empty() {
            return Ok(Vec::new());
        }
        consolidate(&finer, target.periods_per_day())
    }

    /// Append `bar` to `resolution` and refresh every coarser slot from the trailing window.
    ///
    /// The trailing `periods_per_day(resolution)` bars are re-consolidated per coarser
    /// resolution; the newest consolidated bar is appended only when it ends after that
    /// slot's current last bar, so an unfinished window never duplicates a bar. Coarser
    /// slots that `resolution` does not tile (3h above 2h) are left alone.
    pub fn insert(&mut self, bar: Bar, resolution: Resolution) -> Result<(), CoreError> {
        let trailing = {
            self.bars(resolution)?;
            let slot = self.slot_mut(resolution)?;
            if let Some(last) = slot.last() {
                if bar.start <= last.end {
                    return Err(CoreError::invalid_argument(format!(
                        "bar starting at {} overlaps the {} slot ending at {}",
                        bar.start, resolution, last.end
                    )));
                }
            }
            slot.push(bar);
            let from = slot
                .len()
                .saturating_sub(resolution.periods_per_day() as usize);
            slot[from..].to_vec()
        };

        for coarser in resolution.and_coarser().skip(1) {
            if !resolution.tiles(coarser) {
                continue;
            }
            let consolidated = consolidate(&trailing, coarser.periods_per_day())?;
            let Some(newest) = consolidated.last().copied() else {
                continue;
            };
            self.bars(coarser)?;
            let slot = self.slot_mut(coarser)?;
            if slot.last().map_or(true, |last| newest.end > last.end) {
                slot.push(newest);
            }
        }
        Ok(())
    }

    fn slot_mut(&mut self, resolution: Resolution) -> Result<&mut Vec<Bar>, CoreError> {
        let slot = self.slots[resolution.index()]
            .get_mut()
            .map_err(|_| poisoned())?;
        Ok(Arc::make_mut(slot.get_or_insert_with(Default::default)))
    }

    /// Cut every slot from 1d down to `highest` at the bar containing `at`.
    ///
    /// The first store gets the bars before that bar, the second store the rest. Empty
    /// slots stay empty in both halves.
    pub fn split(
        &self,
        at: Timestamp,
        highest: Resolution,
    ) -> Result<(MultiResolutionStore, MultiResolutionStore), CoreError> {
        let before = Self::custom();
        let after = Self::custom();
        for resolution in highest.and_coarser() {
            let bars = self.bars(resolution)?;
            if bars.is_empty() {
                continue;
            }
            let cut = floor(&bars, at)?;
            before.set_bars(resolution, bars[..cut].to_vec())?;
            after.set_bars(resolution, bars[cut..].to_vec())?;
        }
        Ok((before, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataError, MemoryPersistence, SyntheticFeed};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOUR: i64 = 3_600_000;

    /// Counts fetches so tests can assert population happens once.
    struct CountingFeed {
        inner: SyntheticFeed,
        fetches: AtomicUsize,
    }

    impl BarFeed for CountingFeed {
        fn name(&self) -> &str {
            "counting"
        }

        fn fetch(&self, resolution: Resolution) -> Result<Vec<Bar>, DataError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(resolution)
        }

        fn fetch_current_price(&self) -> Result<f64, DataError> {
            self.inner.fetch_current_price()
        }
    }

    fn counting_feed(days: u32) -> Arc<CountingFeed> {
        Arc::new(CountingFeed {
            inner: SyntheticFeed::new(11, 0, days),
            fetches: AtomicUsize::new(0),
        })
    }

    fn hour_bar(index: i64, price: f32) -> Bar {
        Bar::from_ohlc(index * HOUR, (index + 1) * HOUR - 1, price, price, price, price).unwrap()
    }

    #[test]
    fn historical_consolidates_from_finest_and_persists() {
        let feed = counting_feed(2);
        let persistence = Arc::new(MemoryPersistence::new());
        let store = MultiResolutionStore::historical(feed.clone(), persistence.clone());

        assert_eq!(store.count(Resolution::D1).unwrap(), 2);
        assert_eq!(store.count(Resolution::H1).unwrap(), 48);
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 1);
        assert!(persistence.load_bars("historical_1h").unwrap().is_some());
        assert!(persistence.load_bars("historical_1m").unwrap().is_some());

        // a second store over the same persistence never touches the feed
        let again = MultiResolutionStore::historical(feed.clone(), persistence);
        assert_eq!(again.count(Resolution::H6).unwrap(), 8);
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn historical_slots_sit_on_their_own_grid() {
        let store = MultiResolutionStore::historical(
            counting_feed(1),
            Arc::new(MemoryPersistence::new()),
        );
        let three_hours = store.bars(Resolution::H3).unwrap();
        let starts: Vec<i64> = three_hours.iter().map(|b| b.start / HOUR).collect();
        assert_eq!(starts, vec![0, 3, 6, 9, 12, 15, 18, 21]);

        for resolution in Resolution::ALL {
            let width = resolution.duration_ms();
            let bars = store.bars(resolution).unwrap();
            assert_eq!(bars.len() as u32, resolution.periods_per_day(), "{resolution}");
            for bar in bars.iter() {
                assert_eq!(bar.start % width, 0, "{resolution} bar at {}", bar.start);
                assert_eq!(bar.end - bar.start + 1, width, "{resolution} bar at {}", bar.start);
            }
        }
    }

    #[test]
    fn concurrent_first_reads_populate_once() {
        let feed = counting_feed(1);
        let store = Arc::new(MultiResolutionStore::historical(
            feed.clone(),
            Arc::new(MemoryPersistence::new()),
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.count(Resolution::H1).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 24);
        }
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn realtime_fetches_direct_slots_and_consolidates_the_rest() {
        let feed = counting_feed(1);
        let persistence = Arc::new(MemoryPersistence::new());
        let store = MultiResolutionStore::realtime(feed.clone(), persistence.clone());
        assert_eq!(store.count(Resolution::H2).unwrap(), 12);
        assert!(persistence.load_bars("realtime_30m").unwrap().is_some());
        assert_eq!(store.count(Resolution::D1).unwrap(), 1);
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn custom_slots_start_empty() {
        let store = MultiResolutionStore::custom();
        assert_eq!(store.count(Resolution::H1).unwrap(), 0);
        assert!(!store.is_populated(Resolution::H1));
    }

    #[test]
    fn insert_cascades_once_the_window_closes() {
        let mut store = MultiResolutionStore::custom();
        let hours: Vec<Bar> = (0..23).map(|i| hour_bar(i, 1.0 + i as f32)).collect();
        store.set_bars(Resolution::H1, hours).unwrap();
        store.set_bars(Resolution::H12, vec![]).unwrap();

        store.insert(hour_bar(23, 2.0), Resolution::H1).unwrap();
        let daily = store.bars(Resolution::D1).unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].end, 24 * HOUR - 1);
        assert_eq!(daily[0].close, 2.0);
        assert_eq!(store.count(Resolution::H12).unwrap(), 1);

        // an unfinished day adds nothing to the daily slot
        store.insert(hour_bar(24, 3.0), Resolution::H1).unwrap();
        assert_eq!(store.count(Resolution::D1).unwrap(), 1);
        assert_eq!(store.count(Resolution::H2).unwrap(), 1);
        store.insert(hour_bar(25, 3.0), Resolution::H1).unwrap();
        assert_eq!(store.count(Resolution::H2).unwrap(), 2);
        store.insert(hour_bar(26, 3.0), Resolution::H1).unwrap();
        let three_hours = store.bars(Resolution::H3).unwrap();
        let spans: Vec<(i64, i64)> = three_hours.iter().map(|b| (b.start, b.end)).collect();
        assert_eq!(spans, vec![(21 * HOUR, 24 * HOUR - 1), (24 * HOUR, 27 * HOUR - 1)]);
    }

    #[test]
    fn insert_leaves_slots_it_cannot_tile() {
        let mut store = MultiResolutionStore::custom();
        let two_hours = |i: i64| {
            Bar::from_ohlc(i * 2 * HOUR, (i + 1) * 2 * HOUR - 1, 1.0, 1.0, 1.0, 1.0).unwrap()
        };
        store.insert(two_hours(0), Resolution::H2).unwrap();
        store.insert(two_hours(1), Resolution::H2).unwrap();
        assert_eq!(store.count(Resolution::H3).unwrap(), 0);
        assert_eq!(store.count(Resolution::H6).unwrap(), 0);
        store.insert(two_hours(2), Resolution::H2).unwrap();
        assert_eq!(store.count(Resolution::H6).unwrap(), 1);
        assert_eq!(store.count(Resolution::H3).unwrap(), 0);
    }

    #[test]
    fn insert_rejects_overlap() {
        let mut store = MultiResolutionStore::custom();
        store.set_bars(Resolution::H1, vec![hour_bar(0, 1.0)]).unwrap();
        assert!(matches!(
            store.insert(hour_bar(0, 1.0), Resolution::H1),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn split_cuts_at_the_containing_bar() {
        let store = MultiResolutionStore::custom();
        store
            .set_bars(Resolution::H1, (0..48).map(|i| hour_bar(i, 1.0)).collect())
            .unwrap();
        store
            .set_bars(
                Resolution::D1,
                consolidate(&store.bars(Resolution::H1).unwrap(), 1).unwrap(),
            )
            .unwrap();

        let (before, after) = store.split(30 * HOUR + 5, Resolution::H1).unwrap();
        assert_eq!(before.count(Resolution::H1).unwrap(), 30);
        assert_eq!(after.count(Resolution::H1).unwrap(), 18);
        assert_eq!(before.count(Resolution::D1).unwrap(), 1);
        assert_eq!(after.count(Resolution::D1).unwrap(), 1);
        assert_eq!(before.kind(), StoreKind::Custom);
    }

    #[test]
    fn split_before_history_is_not_found() {
        let store = MultiResolutionStore::custom();
        store.set_bars(Resolution::D1, vec![hour_bar(5, 1.0)]).unwrap();
        assert!(matches!(
            store.split(0, Resolution::D1),
            Err(CoreError::NotFound(_))
        ));
    }
}

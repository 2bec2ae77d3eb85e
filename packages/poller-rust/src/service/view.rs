//! One independent polling context bound to a collection.
//!
//! A [`CollectionView`] owns its snapshot, field registry and compiled
//! criteria; nothing mutable is shared between views. Each call to
//! [`CollectionView::poll`] runs one Fetching -> Diffing -> Notifying cycle.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use docwatch_core::{
    compile_with_shift, diff, Criteria, Direction, FieldRegistry, FindOptions, Normalizer,
    Projection, Snapshot, SortKey, TimeShift, ViewKey, ID_FIELD,
};
use tracing::{debug, info_span, Instrument};

use crate::error::WatchError;
use crate::service::phase::{PhaseTracker, PollPhase};
use crate::service::sink::ViewUpdate;
use crate::storage::{DataStore, ViewStateStore};

const FILTER_HINT: &str = " - Filtering";
const CHUNKS_SUFFIX: &str = ".chunks";
const CHUNKS_PAYLOAD_FIELD: &str = "data";

/// Where a view is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewSlot {
    /// A main tab.
    Tab,
    /// The side panel.
    Side,
    /// A bottom panel, numbered in opening order.
    Bottom(u32),
}

impl ViewSlot {
    /// Whether column-visibility changes in this slot are persisted.
    #[must_use]
    pub fn writes_column_history(self) -> bool {
        matches!(self, ViewSlot::Tab)
    }
}

impl fmt::Display for ViewSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewSlot::Tab => f.write_str("tab"),
            ViewSlot::Side => f.write_str("side"),
            ViewSlot::Bottom(n) => write!(f, "bottom-{n}"),
        }
    }
}

/// Collaborators and limits for one poll.
pub struct PollContext<'a> {
    pub store: &'a dyn DataStore,
    pub state: &'a dyn ViewStateStore,
    pub normalizer: Normalizer,
    pub max_results: usize,
    pub fetch_timeout: Duration,
    pub phase: &'a PhaseTracker,
}

/// Runs a store call under the fetch timeout.
pub(crate) async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, WatchError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_elapsed) => Err(WatchError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Polling state of one collection view.
#[derive(Debug)]
pub struct CollectionView {
    key: ViewKey,
    slot: ViewSlot,
    snapshot: Snapshot,
    fields: FieldRegistry,
    filter_text: String,
    criteria: Criteria,
    limit_hint: String,
}

impl CollectionView {
    /// Creates a view with an empty snapshot and no filter.
    #[must_use]
    pub fn new(key: ViewKey, slot: ViewSlot) -> Self {
        Self {
            key,
            slot,
            snapshot: Snapshot::empty(),
            fields: FieldRegistry::new(),
            filter_text: String::new(),
            criteria: Criteria::match_all(),
            limit_hint: String::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &ViewKey {
        &self.key
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.key.collection
    }

    #[must_use]
    pub fn slot(&self) -> ViewSlot {
        self.slot
    }

    /// Records observed by the last usable poll.
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    #[must_use]
    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    #[must_use]
    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    #[must_use]
    pub fn filter_text(&self) -> &str {
        &self.filter_text
    }

    /// Status suffix: the filter hint followed by the size hint.
    #[must_use]
    pub fn hints(&self) -> String {
        let filter = if self.filter_text.is_empty() {
            ""
        } else {
            FILTER_HINT
        };
        format!("{filter}{}", self.limit_hint)
    }

    /// Replaces the filter. Text that does not compile still counts as an
    /// active filter for the hint but matches everything. Non-empty text is
    /// pushed onto the view's filter history.
    pub fn on_filter_changed(&mut self, text: &str, state: &dyn ViewStateStore, shift: TimeShift) {
        let text = text.trim();
        self.filter_text = text.to_string();
        self.criteria = compile_with_shift(text, shift);
        if !text.is_empty() {
            state.push_filter(&self.key, text);
        }
        debug!(
            collection = %self.key.collection,
            filter = text,
            match_all = self.criteria.is_match_all(),
            "filter changed"
        );
    }

    /// Shows or hides a registered field. Returns whether the field exists.
    pub fn on_field_visibility_changed(
        &mut self,
        field: &str,
        visible: bool,
        state: &dyn ViewStateStore,
    ) -> bool {
        if self.fields.get(field).is_none() {
            return false;
        }
        self.fields.set_visible(field, visible);
        if self.slot.writes_column_history() {
            state.set_column_visible(&self.key, field, visible);
        }
        true
    }

    /// Shows or hides every registered field. Returns the fields whose
    /// visibility changed.
    pub fn set_all_visible(&mut self, visible: bool, state: &dyn ViewStateStore) -> Vec<String> {
        let names: Vec<String> = self.fields.fields().iter().map(|f| f.name.clone()).collect();
        names
            .into_iter()
            .filter(|name| {
                let changed = self.fields.set_visible(name, visible);
                if changed && self.slot.writes_column_history() {
                    state.set_column_visible(&self.key, name, visible);
                }
                changed
            })
            .collect()
    }

    /// Records the user's sort choice; it steers the capped window on later polls.
    pub fn on_sort_changed(&self, field: &str, direction: Direction, state: &dyn ViewStateStore) {
        state.set_sort(&self.key, SortKey::new(field, direction));
    }

    /// Sort applied when the live count exceeds the cap: the persisted sort
    /// if its field is registered and visible, else `_id` descending.
    #[must_use]
    pub fn cap_sort(&self, state: &dyn ViewStateStore) -> SortKey {
        state
            .sort(&self.key)
            .filter(|sort| self.fields.is_visible(&sort.field))
            .unwrap_or_else(|| SortKey::new(ID_FIELD, Direction::Descending))
    }

    fn projection(&self) -> Option<Projection> {
        self.key
            .collection
            .ends_with(CHUNKS_SUFFIX)
            .then(|| Projection::Exclude(vec![CHUNKS_PAYLOAD_FIELD.to_string()]))
    }

    /// Runs one poll cycle.
    ///
    /// Returns `Ok(None)` when nothing needs presenting: the change-set was
    /// empty with no new fields, or the batch had a record without `_id`
    /// (the snapshot is then left as it was).
    ///
    /// # Errors
    ///
    /// Store failures and timeouts. The snapshot is untouched on error.
    pub async fn poll(&mut self, ctx: &PollContext<'_>) -> Result<Option<ViewUpdate>, WatchError> {
        let span = info_span!(
            "poll",
            slot = %self.slot,
            collection = %self.key.collection,
            duration_ms = tracing::field::Empty,
        );
        async move {
            let start = Instant::now();
            let result = self.poll_cycle(ctx).await;
            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("duration_ms", duration_ms);
            result
        }
        .instrument(span)
        .await
    }

    async fn poll_cycle(&mut self, ctx: &PollContext<'_>) -> Result<Option<ViewUpdate>, WatchError> {
        let phase = ctx.phase.enter(PollPhase::Fetching);
        let ns = self.key.namespace();

        let total = bounded(ctx.fetch_timeout, ctx.store.count(&ns, &self.criteria)).await?;
        let mut options = FindOptions::filtered(self.criteria.clone()).projection(self.projection());
        if total > ctx.max_results {
            let sort = self.cap_sort(ctx.state);
            options = options
                .sort(&sort.field, sort.direction)
                .limit(ctx.max_results);
            self.limit_hint = format!(" - limited({}/{total})", ctx.max_results);
        } else {
            self.limit_hint = format!(" - total({total})");
        }
        let raw = bounded(ctx.fetch_timeout, ctx.store.find(&ns, &options)).await?;

        phase.advance(PollPhase::Diffing);
        let records: Vec<_> = raw
            .into_iter()
            .map(|doc| ctx.normalizer.normalize(doc))
            .collect();
        let history = ctx.state.visible_columns(&self.key);
        let new_fields = self.fields.observe(&records, &history);
        if self.slot.writes_column_history() {
            for name in new_fields.iter().filter(|n| self.fields.is_visible(n)) {
                ctx.state.set_column_visible(&self.key, name, true);
            }
        }

        let Some((changes, snapshot)) = diff(records, &self.snapshot) else {
            debug!(collection = %self.key.collection, "batch has a record without _id, snapshot kept");
            return Ok(None);
        };
        self.snapshot = snapshot;

        phase.advance(PollPhase::Notifying);
        if changes.is_empty() && new_fields.is_empty() {
            return Ok(None);
        }
        debug!(
            created = changes.created.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            new_fields = new_fields.len(),
            "changes detected"
        );
        Ok(Some(ViewUpdate {
            slot: self.slot,
            collection: self.key.collection.clone(),
            changes,
            new_fields,
            hints: self.hints(),
        }))
    }
}

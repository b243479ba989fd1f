//! Property-based test generators using proptest.
//!
//! Provides strategies for generating queue contents, replay outcomes and
//! cache populations.

use fieldsync_core::{
    CacheEntry, DailyLogUpdate, EntityId, Mutation, NewAnnotation, NewDailyLog, NewUpload,
    Timestamp,
};
use proptest::prelude::*;

/// Strategy for server-assigned ids (`srv_<n>`).
pub fn server_id_strategy() -> impl Strategy<Value = EntityId> {
    (1u32..10_000).prop_map(|n| EntityId::server(format!("srv_{n}")))
}

/// Strategy for ids that are either server ids or fresh placeholders.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop_oneof![
        3 => server_id_strategy(),
        1 => Just(()).prop_map(|()| EntityId::new_local()),
    ]
}

/// Strategy for `YYYY-MM-DD` dates.
pub fn date_strategy() -> impl Strategy<Value = String> {
    (2020u32..2030, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| format!("{y:04}-{m:02}-{d:02}"))
}

fn notes_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::string::string_regex("[a-zA-Z0-9 .,]{0,40}").expect("Invalid regex"))
}

/// Strategy for queued mutations of every type.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (server_id_strategy(), date_strategy(), notes_strategy()).prop_map(
            |(project, date, notes)| {
                let mut draft = NewDailyLog::new(project, date);
                draft.notes = notes;
                Mutation::CreateDailyLog(draft)
            }
        ),
        (entity_id_strategy(), notes_strategy(), prop::option::of(0u32..200)).prop_map(
            |(id, notes, crew_count)| {
                let mut update = DailyLogUpdate::new(id);
                update.notes = notes;
                update.crew_count = crew_count;
                Mutation::UpdateDailyLog(update)
            }
        ),
        (server_id_strategy(), 1u32..500, "[a-z]{1,20}").prop_map(|(document_id, page, content)| {
            Mutation::CreateAnnotation(NewAnnotation {
                document_id,
                page,
                content,
            })
        }),
    ]
}

/// Strategy for photo and file uploads attached to server-side parents.
///
/// The local path is a bare file name; callers place it under a directory
/// of their own.
pub fn new_upload_strategy() -> impl Strategy<Value = NewUpload> {
    (
        any::<bool>(),
        server_id_strategy(),
        "[a-z]{1,12}",
        prop::option::of(prop_oneof![Just("progress"), Just("safety"), Just("defect")]),
    )
        .prop_map(|(photo, parent, name, category)| {
            let upload = if photo {
                NewUpload::photo(parent, format!("{name}.jpg"))
            } else {
                NewUpload::file(parent, format!("{name}.pdf"))
            };
            match category {
                Some(category) => upload.with_category(category),
                None => upload,
            }
        })
}

/// Outcome of one replay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The server accepted the call.
    Success,
    /// Timeout, connection error or 5xx.
    Retryable,
    /// A 4xx the server will keep rejecting.
    Permanent,
}

impl Attempt {
    /// Whether a failed attempt may be retried.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }
}

/// Strategy for a single replay outcome, weighted towards transient faults.
pub fn attempt_strategy() -> impl Strategy<Value = Attempt> {
    prop_oneof![
        2 => Just(Attempt::Success),
        3 => Just(Attempt::Retryable),
        1 => Just(Attempt::Permanent),
    ]
}

/// Strategy for a sequence of replay outcomes.
pub fn attempt_sequence_strategy(
    min_attempts: usize,
    max_attempts: usize,
) -> impl Strategy<Value = Vec<Attempt>> {
    prop::collection::vec(attempt_strategy(), min_attempts..max_attempts)
}

/// A cache record to seed, before a file path is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSeed {
    /// Remote file id.
    pub file_id: String,
    /// Content size.
    pub size_bytes: u64,
    /// Download time.
    pub downloaded_at: Timestamp,
}

impl CacheSeed {
    /// Builds the entry pointing at `dir/<file_id>`.
    pub fn entry_in(&self, dir: &std::path::Path) -> CacheEntry {
        CacheEntry::downloaded(
            self.file_id.clone(),
            dir.join(&self.file_id),
            self.size_bytes,
            self.downloaded_at,
        )
    }
}

/// Strategy for up to `max_entries` cache records with distinct ids.
///
/// Download times collide often so tie-breaking gets exercised.
pub fn cache_population_strategy(max_entries: usize) -> impl Strategy<Value = Vec<CacheSeed>> {
    prop::collection::vec((0u64..4096, 0u64..20), 0..max_entries).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (size_bytes, slot))| CacheSeed {
                file_id: format!("file_{i:03}"),
                size_bytes,
                downloaded_at: slot * 60_000,
            })
            .collect()
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

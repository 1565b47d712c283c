//! Aggregator: runs envelopes through decode and normalize and collects the
//! results into one time-ordered series plus a skip report.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, IngestConfig};
use crate::envelope::UplinkEnvelope;
use crate::error::{Error, Result};
use crate::normalize::normalize;
use crate::reading::{Reading, ReadingKind, ReadingValue};
use crate::registry::Registry;

// --- Skip report ---

/// Why an envelope produced no readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MalformedEncoding,
    MissingField,
    TruncatedFrame,
    UnresolvedDecoder,
    WorkerFailed,
    /// Same uplink delivered more than once
    Duplicate,
    /// No payload and no server-decoded object
    Empty,
    /// Decoded fine but nothing mapped to a canonical kind
    NoReadings,
}

impl SkipReason {
    /// Benign skips are tallied but do not count as errors
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            SkipReason::Duplicate | SkipReason::Empty | SkipReason::NoReadings
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkipEntry {
    /// Position of the envelope in the input sequence
    pub index: usize,
    pub reason: SkipReason,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SkipReport {
    counts: BTreeMap<SkipReason, usize>,
    entries: Vec<SkipEntry>,
}

impl SkipReport {
    pub fn record(&mut self, index: usize, reason: SkipReason, detail: impl Into<String>) {
        *self.counts.entry(reason).or_default() += 1;
        self.entries.push(SkipEntry {
            index,
            reason,
            detail: detail.into(),
        });
    }

    pub fn count(&self, reason: SkipReason) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<SkipReason, usize> {
        &self.counts
    }

    /// Entries in input order
    pub fn entries(&self) -> &[SkipEntry] {
        &self.entries
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn error_count(&self) -> usize {
        self.counts
            .iter()
            .filter(|(reason, _)| reason.is_error())
            .map(|(_, n)| n)
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }
}

// --- Reading series ---

/// Readings sorted ascending by timestamp. Readings with equal timestamps keep
/// the order they were ingested in, so multi-sample bursts stay in sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReadingSeries {
    readings: Vec<Reading>,
}

impl ReadingSeries {
    pub fn from_unsorted(mut readings: Vec<Reading>) -> Self {
        readings.sort_by_key(|r| r.timestamp);
        Self { readings }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Reading> {
        self.readings.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reading> {
        self.readings.iter()
    }

    pub fn as_slice(&self) -> &[Reading] {
        &self.readings
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.last()
    }

    /// Readings up to and including `playhead`, for replaying the series
    pub fn up_to(&self, playhead: usize) -> &[Reading] {
        let end = playhead.saturating_add(1).min(self.readings.len());
        &self.readings[..end]
    }

    /// Readings with `from <= timestamp < to`
    pub fn between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> &[Reading] {
        let start = self.readings.partition_point(|r| r.timestamp < from);
        let end = self.readings.partition_point(|r| r.timestamp < to).max(start);
        &self.readings[start..end]
    }

    /// Timestamped values of one kind, in series order
    pub fn of_kind(
        &self,
        kind: ReadingKind,
    ) -> impl Iterator<Item = (DateTime<Utc>, &ReadingValue)> {
        self.readings
            .iter()
            .filter_map(move |r| r.get(kind).map(|v| (r.timestamp, v)))
    }

    /// Append readings and restore ordering
    pub fn extend(&mut self, readings: impl IntoIterator<Item = Reading>) {
        self.readings.extend(readings);
        self.readings.sort_by_key(|r| r.timestamp);
    }

    pub fn into_vec(self) -> Vec<Reading> {
        self.readings
    }
}

impl<'a> IntoIterator for &'a ReadingSeries {
    type Item = &'a Reading;
    type IntoIter = std::slice::Iter<'a, Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.iter()
    }
}

// --- Per-envelope pipeline ---

/// Result of running one envelope through decode and normalize
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    Readings(Vec<Reading>),
    Skipped(SkipReason, String),
}

impl From<Error> for Processed {
    fn from(err: Error) -> Self {
        Processed::Skipped(err.skip_reason(), err.to_string())
    }
}

/// Resolve, decode and normalize one envelope. Never fails the batch.
pub fn process_envelope(registry: &Registry, envelope: &UplinkEnvelope) -> Processed {
    if envelope.is_empty() {
        return Processed::Skipped(SkipReason::Empty, "no payload".to_string());
    }

    let decoder = match registry.require(envelope.device_profile.as_deref(), envelope.port) {
        Ok(decoder) => decoder,
        Err(e) => return e.into(),
    };

    let records = match decoder.decode(envelope) {
        Ok(records) => records,
        Err(e) => {
            warn!(
                decoder = decoder.name(),
                port = ?envelope.port,
                payload = %hex::encode(envelope.payload()),
                error = %e,
                "Failed to decode uplink"
            );
            return e.into();
        }
    };

    let readings: Vec<Reading> = records
        .iter()
        .filter_map(|record| {
            let values = normalize(record);
            (!values.is_empty()).then(|| Reading {
                timestamp: envelope.timestamp,
                device: envelope.dev_eui.clone(),
                decoder: decoder.name(),
                frame_mode: record.frame_mode,
                values,
            })
        })
        .collect();

    if readings.is_empty() {
        return Processed::Skipped(
            SkipReason::NoReadings,
            format!("{} produced no canonical values", decoder.name()),
        );
    }
    Processed::Readings(readings)
}

// --- Aggregator ---

/// Readings and skip report of one ingest run
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub run_id: Uuid,
    /// Envelopes offered, including ones that failed to parse
    pub envelopes: usize,
    pub series: ReadingSeries,
    pub report: SkipReport,
}

/// Identity of one delivery; a repeat of the same key is a duplicate
#[derive(Debug, PartialEq, Eq, Hash)]
struct DedupKey {
    dev_eui: Option<String>,
    device_profile: Option<String>,
    f_cnt: Option<u32>,
    timestamp: DateTime<Utc>,
    port: Option<u8>,
    payload: Vec<u8>,
    object: Option<String>,
}

impl DedupKey {
    fn of(envelope: &UplinkEnvelope) -> Self {
        Self {
            dev_eui: envelope.dev_eui.clone(),
            device_profile: envelope.device_profile.clone(),
            f_cnt: envelope.f_cnt,
            timestamp: envelope.timestamp,
            port: envelope.port,
            payload: envelope.payload().to_vec(),
            object: envelope.object.as_ref().map(|o| o.to_string()),
        }
    }
}

/// Envelopes that passed the frame reader and deduplication
struct Admitted {
    envelopes: Vec<(usize, UplinkEnvelope)>,
    report: SkipReport,
    offered: usize,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    registry: Arc<Registry>,
    config: IngestConfig,
}

impl Aggregator {
    pub fn new(registry: Registry, config: IngestConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Registry::from_config(&config.registry), config.ingest.clone())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn admit<I>(&self, inputs: I) -> Admitted
    where
        I: IntoIterator<Item = Result<UplinkEnvelope>>,
    {
        let mut admitted = Admitted {
            envelopes: Vec::new(),
            report: SkipReport::default(),
            offered: 0,
        };
        let mut seen: HashSet<DedupKey> = HashSet::new();

        for (index, input) in inputs.into_iter().enumerate() {
            admitted.offered += 1;
            let envelope = match input {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(index, error = %e, "Rejected uplink envelope");
                    admitted.report.record(index, e.skip_reason(), e.to_string());
                    continue;
                }
            };

            if self.config.deduplicate {
                if !seen.insert(DedupKey::of(&envelope)) {
                    debug!(index, "Duplicate uplink");
                    admitted.report.record(index, SkipReason::Duplicate, "repeated delivery");
                    continue;
                }
            }

            admitted.envelopes.push((index, envelope));
        }

        admitted
    }

    fn finish(
        run_id: Uuid,
        offered: usize,
        mut report: SkipReport,
        processed: impl IntoIterator<Item = (usize, Processed)>,
    ) -> IngestOutcome {
        let mut readings = Vec::new();
        for (index, outcome) in processed {
            match outcome {
                Processed::Readings(rs) => readings.extend(rs),
                Processed::Skipped(reason, detail) => {
                    debug!(index, ?reason, %detail, "Skipped uplink");
                    report.record(index, reason, detail);
                }
            }
        }
        report.entries.sort_by_key(|e| e.index);

        let series = ReadingSeries::from_unsorted(readings);
        info!(
            %run_id,
            envelopes = offered,
            readings = series.len(),
            skipped = report.total(),
            errors = report.error_count(),
            "Ingest run complete"
        );

        IngestOutcome {
            run_id,
            envelopes: offered,
            series,
            report,
        }
    }

    /// Process envelopes one after another on the calling thread
    pub fn ingest<I>(&self, inputs: I) -> IngestOutcome
    where
        I: IntoIterator<Item = Result<UplinkEnvelope>>,
    {
        let run_id = Uuid::new_v4();
        let admitted = self.admit(inputs);

        let processed: Vec<_> = admitted
            .envelopes
            .iter()
            .map(|(index, envelope)| (*index, process_envelope(&self.registry, envelope)))
            .collect();

        Self::finish(run_id, admitted.offered, admitted.report, processed)
    }

    /// Parse JSON documents and ingest them
    pub fn ingest_json<'a, I>(&self, documents: I) -> IngestOutcome
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.ingest(documents.into_iter().map(UplinkEnvelope::from_json_str))
    }

    /// Decode on the blocking pool, `workers` chunks at a time.
    ///
    /// Chunks are merged back in input order, so the outcome matches
    /// [`Aggregator::ingest`] for the same input.
    pub async fn ingest_concurrent<I>(&self, inputs: I) -> IngestOutcome
    where
        I: IntoIterator<Item = Result<UplinkEnvelope>>,
    {
        let run_id = Uuid::new_v4();
        let Admitted {
            envelopes,
            report,
            offered,
        } = self.admit(inputs);

        let mut chunks: Vec<Vec<(usize, UplinkEnvelope)>> = Vec::new();
        let mut rest = envelopes.into_iter().peekable();
        while rest.peek().is_some() {
            chunks.push(rest.by_ref().take(self.config.chunk_size).collect());
        }
        debug!(
            %run_id,
            chunks = chunks.len(),
            workers = self.config.workers,
            "Dispatching decode chunks"
        );

        let processed: Vec<Vec<(usize, Processed)>> = stream::iter(chunks)
            .map(|chunk| {
                let registry = Arc::clone(&self.registry);
                let indices: Vec<usize> = chunk.iter().map(|(index, _)| *index).collect();
                async move {
                    let task = tokio::task::spawn_blocking(move || {
                        chunk
                            .iter()
                            .map(|(index, envelope)| {
                                (*index, process_envelope(&registry, envelope))
                            })
                            .collect::<Vec<_>>()
                    });
                    match task.await {
                        Ok(done) => done,
                        Err(e) => {
                            warn!(error = %e, envelopes = indices.len(), "Decode worker failed");
                            let reason = SkipReason::WorkerFailed;
                            let detail = e.to_string();
                            indices
                                .into_iter()
                                .map(|index| (index, Processed::Skipped(reason, detail.clone())))
                                .collect()
                        }
                    }
                }
            })
            .buffered(self.config.workers)
            .collect()
            .await;

        Self::finish(run_id, offered, report, processed.into_iter().flatten())
    }
}

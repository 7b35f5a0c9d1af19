//! Diagnostic capture of score vectors.
//!
//! A [DiagnosticSink] collects one [DiagnosticRecord] per sequence per step:
//! a snapshot of the raw scores before the pipeline ran, a snapshot of the
//! final scores and the token that was eventually chosen. Records can be
//! dumped as JSON lines and read back for offline statistics such as the
//! number of surviving candidates per step or the rank of the chosen token.

use std::{
    collections::BTreeMap,
    io::{BufRead, Write},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// How much of a score vector to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// The whole vector, indexed by token id.
    Full,
    /// The `k` highest entries with their token ids, best first.
    TopK(usize),
}

impl Default for CaptureMode {
    fn default() -> Self {
        Self::TopK(10)
    }
}

/// An immutable copy of (part of) a score vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Token ids for `values`. Absent for full captures, where the position is
    /// the token id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<Vec<TID>>,
    #[serde(with = "non_finite")]
    pub values: Vec<L>,
}

impl Snapshot {
    pub fn capture(logits: &Logits, mode: CaptureMode) -> Result<Self> {
        Ok(match mode {
            CaptureMode::Full => Self {
                indices: None,
                values: logits.to_vec(),
            },
            CaptureMode::TopK(k) => {
                let mut indices = logits.sorted_indices()?;
                indices.truncate(k);
                Self {
                    values: indices.iter().map(|&idx| logits[idx]).collect(),
                    indices: Some(
                        indices
                            .into_iter()
                            .map(TID::try_from)
                            .collect::<Result<_, _>>()?,
                    ),
                }
            }
        })
    }

    /// `(token id, value)` pairs in stored order.
    pub fn entries(&self) -> Vec<(TID, L)> {
        match &self.indices {
            Some(indices) => indices
                .iter()
                .copied()
                .zip(self.values.iter().copied())
                .collect(),
            None => (0..)
                .zip(self.values.iter().copied())
                .collect(),
        }
    }

    /// Number of captured entries that are not masked.
    pub fn finite_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }
}

/// Everything captured for one sequence at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub sequence: usize,
    pub step: usize,
    #[serde(default)]
    pub chosen: Option<TID>,
    #[serde(default)]
    pub pre: Option<Snapshot>,
    #[serde(default)]
    pub post: Option<Snapshot>,
}

impl DiagnosticRecord {
    fn new(sequence: usize, step: usize) -> Self {
        Self {
            sequence,
            step,
            chosen: None,
            pre: None,
            post: None,
        }
    }

    /// Candidates the pipeline left available (within the captured part).
    pub fn survivors(&self) -> Option<usize> {
        self.post.as_ref().map(Snapshot::finite_count)
    }

    /// Zero based rank of the chosen token among the raw scores, i.e. how far
    /// down the model's own ordering the sampled token was. `None` when
    /// nothing was chosen or the token fell outside the captured entries.
    pub fn chosen_rank(&self) -> Option<usize> {
        let chosen = self.chosen?;
        let mut entries = self.pre.as_ref()?.entries();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        entries.iter().position(|(tid, _)| *tid == chosen)
    }
}

/// Histogram of survivor counts: how many steps ended with `n` candidates.
pub fn survivor_histogram<'a>(
    records: impl IntoIterator<Item = &'a DiagnosticRecord>,
) -> BTreeMap<usize, usize> {
    let mut hist = BTreeMap::new();
    records
        .into_iter()
        .filter_map(DiagnosticRecord::survivors)
        .for_each(|n| *hist.entry(n).or_insert(0) += 1);
    hist
}

/// Shared, cloneable store for [DiagnosticRecord]s. Each pipeline writes to
/// its own sequence slot so one sink can serve a whole batch.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticSink {
    records: Arc<Mutex<Vec<Vec<DiagnosticRecord>>>>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Vec<DiagnosticRecord>>>, SamplerError> {
        self.records
            .lock()
            .map_err(|e| SamplerError::InternalError(format!("Couldn't acquire lock: {e}")))
    }

    fn with_sequence<T>(
        &self,
        sequence: usize,
        fun: impl FnOnce(&mut Vec<DiagnosticRecord>) -> T,
    ) -> Result<T, SamplerError> {
        let mut records = self.lock()?;
        if records.len() <= sequence {
            records.resize_with(sequence + 1, Vec::new);
        }
        Ok(fun(&mut records[sequence]))
    }

    /// Opens the record for the next step of `sequence` and returns its step
    /// number.
    pub fn begin_step(&self, sequence: usize, pre: Option<Snapshot>) -> Result<usize, SamplerError> {
        self.with_sequence(sequence, |records| {
            let step = records.len();
            let mut record = DiagnosticRecord::new(sequence, step);
            record.pre = pre;
            records.push(record);
            step
        })
    }

    /// Stores the final scores in the open record, or in a fresh one if the
    /// step was never opened.
    pub fn finish_step(&self, sequence: usize, post: Snapshot) -> Result<(), SamplerError> {
        self.with_sequence(sequence, |records| match records.last_mut() {
            Some(record) if record.post.is_none() => record.post = Some(post),
            _ => {
                let mut record = DiagnosticRecord::new(sequence, records.len());
                record.post = Some(post);
                records.push(record);
            }
        })
    }

    /// Remembers the token chosen at the latest step of `sequence`.
    pub fn record_choice(&self, sequence: usize, token_id: TID) -> Result<(), SamplerError> {
        self.with_sequence(sequence, |records| {
            records
                .last_mut()
                .map(|record| record.chosen = Some(token_id))
                .ok_or_else(|| {
                    SamplerError::InternalError(format!(
                        "no diagnostic step open for sequence {sequence}"
                    ))
                })
        })?
    }

    /// All records, ordered by sequence and then step.
    pub fn records(&self) -> Result<Vec<DiagnosticRecord>, SamplerError> {
        Ok(self.lock()?.iter().flatten().cloned().collect())
    }

    pub fn records_for(&self, sequence: usize) -> Result<Vec<DiagnosticRecord>, SamplerError> {
        Ok(self.lock()?.get(sequence).cloned().unwrap_or_default())
    }

    pub fn clear(&self) -> Result<(), SamplerError> {
        self.lock()?.clear();
        Ok(())
    }

    /// Writes one JSON object per record per line.
    pub fn write_jsonl(&self, mut writer: impl Write) -> Result<()> {
        for record in self.records()? {
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Reads records written by [DiagnosticSink::write_jsonl]. Blank lines are
/// skipped.
pub fn read_jsonl(reader: impl BufRead) -> Result<Vec<DiagnosticRecord>> {
    reader
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map(|line| Ok(serde_json::from_str(&line?)?))
        .collect()
}

/// JSON has no infinities: masked values are written as `null` and read
/// back as negative infinity.
mod non_finite {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::types::L;

    pub fn serialize<S: Serializer>(values: &[L], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.is_finite().then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<L>, D::Error> {
        Ok(Vec::<Option<L>>::deserialize(deserializer)?
            .into_iter()
            .map(|v| v.unwrap_or(L::NEG_INFINITY))
            .collect())
    }
}

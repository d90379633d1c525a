//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Zi.
//! The Zi project belongs to the Dunimd Team.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! You may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//!     http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

//! # Sort Processor
//!
//! Orders rows by one or more columns. `"name"` sorts ascending, `"-name"`
//! descending; ties keep their arrival order.
//!
//! Rows are held in memory until their estimated size passes the memory
//! budget. The buffer is then sorted and spilled to an anonymous temporary
//! file as one JSON row per line. Once upstream is exhausted the spilled runs
//! and the remaining buffer are merged through a binary heap, so memory stays
//! bounded by the budget plus one read batch per run.
//!
//! Spill files are written and read on the [`ZiBlockingPool`], in batches.
//! Floats are spilled as their bit patterns so NaN and the infinities read
//! back unchanged.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blocking::ZiBlockingPool;
use crate::errors::{Result, ZiError};
use crate::record::{ZiDataRow, ZiValue};
use crate::stage::{config_str_list, ZiProcessor, ZiProcessorFactory, ZiRowPull};
use crate::types::ZiTypesRef;

/// Rows read from a spill file per blocking call.
const SPILL_READ_BATCH: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZiSortKey {
    pub field: String,
    pub descending: bool,
}

impl ZiSortKey {
    /// Parses `"name"` or `"-name"`.
    pub fn parse(text: &str) -> Result<Self> {
        let (field, descending) = match text.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (text, false),
        };
        if field.is_empty() {
            return Err(ZiError::validation("sort field name is empty"));
        }
        Ok(Self {
            field: field.to_string(),
            descending,
        })
    }
}

fn compare_rows(keys: &[ZiSortKey], a: &ZiDataRow, b: &ZiDataRow) -> Ordering {
    for key in keys {
        let left = a.get(&key.field);
        let right = b.get(&key.field);
        let ord = match (left, right) {
            (Some(l), Some(r)) => l.compare(r),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[derive(Debug, Serialize, Deserialize)]
enum SpillValue {
    Null,
    Integer(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    String(String),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

impl From<ZiValue> for SpillValue {
    fn from(value: ZiValue) -> Self {
        match value {
            ZiValue::Null => SpillValue::Null,
            ZiValue::Integer(v) => SpillValue::Integer(v),
            ZiValue::Long(v) => SpillValue::Long(v),
            ZiValue::Float(v) => SpillValue::Float(v.to_bits()),
            ZiValue::Double(v) => SpillValue::Double(v.to_bits()),
            ZiValue::String(v) => SpillValue::String(v),
            ZiValue::Boolean(v) => SpillValue::Boolean(v),
            ZiValue::Date(v) => SpillValue::Date(v),
            ZiValue::DateTime(v) => SpillValue::DateTime(v),
            ZiValue::Time(v) => SpillValue::Time(v),
        }
    }
}

impl From<SpillValue> for ZiValue {
    fn from(value: SpillValue) -> Self {
        match value {
            SpillValue::Null => ZiValue::Null,
            SpillValue::Integer(v) => ZiValue::Integer(v),
            SpillValue::Long(v) => ZiValue::Long(v),
            SpillValue::Float(bits) => ZiValue::Float(f32::from_bits(bits)),
            SpillValue::Double(bits) => ZiValue::Double(f64::from_bits(bits)),
            SpillValue::String(v) => ZiValue::String(v),
            SpillValue::Boolean(v) => ZiValue::Boolean(v),
            SpillValue::Date(v) => ZiValue::Date(v),
            SpillValue::DateTime(v) => ZiValue::DateTime(v),
            SpillValue::Time(v) => ZiValue::Time(v),
        }
    }
}

/// One line of a spill file.
#[derive(Debug, Serialize, Deserialize)]
struct SpillEntry {
    seq: u64,
    columns: Vec<(String, SpillValue)>,
}

impl SpillEntry {
    fn encode(seq: u64, row: ZiDataRow) -> Self {
        Self {
            seq,
            columns: row.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }

    fn decode(self) -> (u64, ZiDataRow) {
        let mut row = ZiDataRow::with_capacity(self.columns.len());
        for (key, value) in self.columns {
            row.put(key, ZiValue::from(value));
        }
        (self.seq, row)
    }
}

/// A sorted run on disk. Every method blocks.
struct SpillRun {
    reader: BufReader<File>,
    line: String,
}

impl SpillRun {
    fn write(rows: Vec<(u64, ZiDataRow)>) -> Result<Self> {
        let mut writer = BufWriter::new(tempfile::tempfile()?);
        for (seq, row) in rows {
            serde_json::to_writer(&mut writer, &SpillEntry::encode(seq, row))?;
            writer.write_all(b"\n")?;
        }
        let mut file = writer
            .into_inner()
            .map_err(|e| ZiError::Io(e.error().to_string()))?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader: BufReader::new(file),
            line: String::new(),
        })
    }

    /// Reads up to `max` rows; fewer means the run is exhausted.
    fn read_batch(&mut self, max: usize) -> Result<VecDeque<(u64, ZiDataRow)>> {
        let mut batch = VecDeque::with_capacity(max);
        while batch.len() < max {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                break;
            }
            let entry: SpillEntry = serde_json::from_str(self.line.trim_end())?;
            batch.push_back(entry.decode());
        }
        Ok(batch)
    }
}

struct HeapItem {
    keys: Arc<Vec<ZiSortKey>>,
    seq: u64,
    run: usize,
    row: ZiDataRow,
}

impl HeapItem {
    fn order(&self, other: &Self) -> Ordering {
        compare_rows(&self.keys, &self.row, &other.row).then(self.seq.cmp(&other.seq))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.order(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // BinaryHeap is a max-heap; invert so the smallest row pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.order(self)
    }
}

struct MergeInput {
    run: Option<SpillRun>,
    buffered: VecDeque<(u64, ZiDataRow)>,
}

struct Merger {
    keys: Arc<Vec<ZiSortKey>>,
    pool: ZiBlockingPool,
    inputs: Vec<MergeInput>,
    heap: BinaryHeap<HeapItem>,
}

impl Merger {
    async fn new(keys: Arc<Vec<ZiSortKey>>, pool: ZiBlockingPool, runs: Vec<SpillRun>) -> Result<Self> {
        let mut merger = Self {
            keys,
            pool,
            inputs: runs
                .into_iter()
                .map(|run| MergeInput {
                    run: Some(run),
                    buffered: VecDeque::new(),
                })
                .collect(),
            heap: BinaryHeap::new(),
        };
        for index in 0..merger.inputs.len() {
            merger.advance(index).await?;
        }
        Ok(merger)
    }

    /// Moves the next row of run `index` onto the heap, reading a batch if needed.
    async fn advance(&mut self, index: usize) -> Result<()> {
        let input = &mut self.inputs[index];
        if input.buffered.is_empty() {
            if let Some(run) = input.run.take() {
                let (run, batch) = self
                    .pool
                    .run(move || {
                        let mut run = run;
                        let batch = run.read_batch(SPILL_READ_BATCH)?;
                        Ok((run, batch))
                    })
                    .await?;
                if batch.len() == SPILL_READ_BATCH {
                    input.run = Some(run);
                }
                input.buffered = batch;
            }
        }
        if let Some((seq, row)) = input.buffered.pop_front() {
            self.heap.push(HeapItem {
                keys: self.keys.clone(),
                seq,
                run: index,
                row,
            });
        }
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<ZiDataRow>> {
        let Some(item) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(item.run).await?;
        Ok(Some(item.row))
    }
}

enum SortState {
    Collecting,
    Memory(VecDeque<ZiDataRow>),
    Merging(Merger),
}

pub struct ZiSort {
    keys: Arc<Vec<ZiSortKey>>,
    memory_limit: usize,
    pool: ZiBlockingPool,
    state: SortState,
    spilled_runs: usize,
}

impl ZiSort {
    pub fn new(keys: Vec<ZiSortKey>, memory_limit: usize) -> Self {
        Self {
            keys: Arc::new(keys),
            memory_limit,
            pool: ZiBlockingPool::default(),
            state: SortState::Collecting,
            spilled_runs: 0,
        }
    }

    /// Runs spill file IO on `pool` instead of a private one.
    pub fn with_pool(mut self, pool: ZiBlockingPool) -> Self {
        self.pool = pool;
        self
    }

    /// Number of runs written to disk so far.
    pub fn spilled_runs(&self) -> usize {
        self.spilled_runs
    }

    fn sort_buffer(&self, buffer: &mut [(u64, ZiDataRow)]) {
        // sort_by is stable, and seq breaks ties anyway for merged runs.
        buffer.sort_by(|a, b| compare_rows(&self.keys, &a.1, &b.1));
    }

    async fn collect(&mut self, upstream: &mut (dyn ZiRowPull + '_)) -> Result<SortState> {
        let mut buffer: Vec<(u64, ZiDataRow)> = Vec::new();
        let mut buffered_bytes = 0usize;
        let mut runs = Vec::new();
        let mut seq = 0u64;

        while let Some(row) = upstream.pull().await? {
            buffered_bytes += row.bytes_size();
            buffer.push((seq, row));
            seq += 1;
            if buffered_bytes > self.memory_limit {
                self.sort_buffer(&mut buffer);
                let rows = std::mem::take(&mut buffer);
                let count = rows.len();
                runs.push(self.pool.run(move || SpillRun::write(rows)).await?);
                log::debug!(
                    "sort.spill: sorted run written to disk - run={}, rows={}, bytes={}",
                    runs.len(),
                    count,
                    buffered_bytes
                );
                buffered_bytes = 0;
            }
        }

        self.sort_buffer(&mut buffer);
        self.spilled_runs = runs.len();
        if runs.is_empty() {
            return Ok(SortState::Memory(
                buffer.into_iter().map(|(_, row)| row).collect(),
            ));
        }
        if !buffer.is_empty() {
            runs.push(self.pool.run(move || SpillRun::write(buffer)).await?);
        }
        let merger = Merger::new(self.keys.clone(), self.pool.clone(), runs).await?;
        Ok(SortState::Merging(merger))
    }
}

#[async_trait]
impl ZiProcessor for ZiSort {
    fn name(&self) -> &str {
        "sort"
    }

    fn initialize(&mut self, input: &ZiTypesRef) -> Result<ZiTypesRef> {
        for key in self.keys.iter() {
            input.require("sort", &key.field)?;
        }
        Ok(input.clone())
    }

    async fn next(&mut self, upstream: &mut (dyn ZiRowPull + '_)) -> Result<Option<ZiDataRow>> {
        if matches!(self.state, SortState::Collecting) {
            self.state = self.collect(upstream).await?;
        }
        match &mut self.state {
            SortState::Memory(rows) => Ok(rows.pop_front()),
            SortState::Merging(merger) => merger.next().await,
            SortState::Collecting => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.state = SortState::Memory(VecDeque::new());
    }
}

/// Builds sort processors that spill once `memory_limit` bytes are buffered.
///
/// Config: `{"fields": ["name", "-age"]}`.
pub fn sort_factory(memory_limit: usize, pool: ZiBlockingPool) -> ZiProcessorFactory {
    Arc::new(move |config: &Value| -> Result<Box<dyn ZiProcessor>> {
        let keys = config_str_list(config, "sort", "fields")?
            .iter()
            .map(|f| ZiSortKey::parse(f))
            .collect::<Result<Vec<_>>>()?;
        if keys.is_empty() {
            return Err(ZiError::validation("sort requires at least one field"));
        }
        Ok(Box::new(ZiSort::new(keys, memory_limit).with_pool(pool.clone())))
    })
}

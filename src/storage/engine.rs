//! Channelstore Storage Engine
//!
//! A single SQLite connection holds the catalog (sources, measures, channels,
//! chunks), the sample table and the partition catalog.
//!
//! - Catalog: CRUD with exact-match filters
//! - Write path: SampleBatch → chunk resolution → partitions → batched INSERT → counters,
//!   all inside one transaction
//! - Read path: distinct timestamp windows and per-channel series
//!
//! Thread-safe via a std Mutex around the connection (rusqlite connections are not Sync).

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::filter::{
    ChannelFilter, ChunkFilter, Filter, MeasureFilter, Predicate, SourceFilter, Window,
};
use crate::storage::interval::format_interval;
use crate::storage::schema;
use crate::storage::types::{
    from_micros, to_micros, Channel, Chunk, Measure, NewChannel, NewChunk, NewMeasure, NewSource,
    Partition, Source, DEFAULT_CHUNK_LABEL,
};

/// Position of a sample in the shared query cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SampleKey {
    pub timestamp: i64,
    pub chunk_id: i64,
}

/// SQLite caps a statement at 32766 bound parameters; each sample binds four.
const MAX_ROWS_PER_STATEMENT: usize = 8_000;

const SOURCE_SELECT: &str = "SELECT s.label, s.name, s.location, s.device, s.protocol, \
     s.version, s.description, s.created FROM source s";
const SOURCE_FROM: &str = "FROM source s";

const MEASURE_SELECT: &str =
    "SELECT m.id, m.label, m.name, m.description, m.source_label FROM measure m";
const MEASURE_FROM: &str = "FROM measure m";

const CHANNEL_SELECT: &str = "SELECT c.id, c.label, c.name, c.unit, c.sampling_rate, \
     c.description, c.count, c.measure_id, m.label, m.source_label \
     FROM channel c JOIN measure m ON m.id = c.measure_id";
const CHANNEL_FROM: &str = "FROM channel c JOIN measure m ON m.id = c.measure_id";

const CHUNK_SELECT: &str = "SELECT k.id, k.label, k.measure_id, m.label, m.source_label \
     FROM chunk k JOIN measure m ON m.id = k.measure_id";
const CHUNK_FROM: &str = "FROM chunk k JOIN measure m ON m.id = k.measure_id";

/// Configuration for the store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file. `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Rows per INSERT statement on the bulk write path (default: 1000)
    pub batch_size: usize,
    /// Partition width used until the configuration endpoint changes it
    pub chunk_interval: Duration,
    /// Retention policy installed on first open
    pub retention: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("channelstore_data/channelstore.db")),
            batch_size: 1000,
            chunk_interval: Duration::hours(1),
            retention: None,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            ..Default::default()
        }
    }
}

/// Where the samples of a batch go
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkTarget {
    /// Get or create the measure's `"default"` chunk
    Default,
    /// Always create a new chunk with this label
    Create(String),
}

/// Parallel arrays ready for the bulk write path
#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub measure_id: i64,
    pub chunk: ChunkTarget,
    pub timestamps: Vec<DateTime<Utc>>,
    /// (channel id, values) with `values.len() == timestamps.len()`
    pub series: Vec<(i64, Vec<f64>)>,
}

impl SampleBatch {
    pub fn row_count(&self) -> usize {
        self.series.iter().map(|(_, values)| values.len()).sum()
    }
}

/// Outcome of a committed bulk write
#[derive(Debug, Clone)]
pub struct InsertReceipt {
    pub chunk: Chunk,
    pub rows: usize,
}

/// Partition width and retention as currently configured
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub chunk_interval: Duration,
    pub retention: Option<Duration>,
}

/// Result of one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetentionReport {
    pub partitions_dropped: usize,
    pub samples_deleted: usize,
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub sources: i64,
    pub measures: i64,
    pub channels: i64,
    pub chunks: i64,
    pub samples: i64,
    pub partitions: i64,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sources={}, measures={}, channels={}, chunks={}, samples={}, partitions={}",
            self.sources, self.measures, self.channels, self.chunks, self.samples, self.partitions
        )
    }
}

/// The channelstore storage engine
pub struct Store {
    config: StoreConfig,
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database and apply the schema
    pub fn open(config: StoreConfig) -> StorageResult<Self> {
        let conn = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let conn = Connection::open(path)?;
                conn.execute_batch(schema::FILE_PRAGMAS)?;
                conn
            }
            None => Connection::open_in_memory()?,
        };

        conn.execute_batch(schema::PRAGMAS)?;
        conn.execute_batch(schema::SCHEMA)?;

        conn.execute(
            "INSERT OR IGNORE INTO engine_settings (id, chunk_interval, retention_interval)
             VALUES (1, ?1, ?2)",
            params![
                duration_micros(config.chunk_interval),
                config.retention.map(duration_micros)
            ],
        )?;

        tracing::info!(path = ?config.path, "Store opened");

        Ok(Self {
            config,
            conn: Mutex::new(conn),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }

    // ============================================
    // SOURCES
    // ============================================

    pub fn create_source(&self, new: NewSource) -> StorageResult<Source> {
        let created = new.created.unwrap_or_else(Utc::now);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO source (label, name, location, device, protocol, version, description, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.label,
                new.name,
                new.location,
                new.device,
                new.protocol,
                new.version,
                new.description,
                to_micros(&created)
            ],
        )?;
        fetch_source(&conn, &new.label)
    }

    pub fn get_source(&self, label: &str) -> StorageResult<Source> {
        let conn = self.conn()?;
        fetch_source(&conn, label)
    }

    pub fn list_sources(
        &self,
        filter: &SourceFilter,
        window: Window,
    ) -> StorageResult<(Vec<Source>, i64)> {
        let conn = self.conn()?;
        list_with(
            &conn,
            SOURCE_SELECT,
            SOURCE_FROM,
            "s.label",
            &filter.predicate(),
            window,
            row_to_source,
        )
    }

    /// Replace the descriptive fields of a source (the label is the key)
    pub fn update_source(&self, label: &str, new: NewSource) -> StorageResult<Source> {
        let conn = self.conn()?;
        let current = fetch_source(&conn, label)?;
        let created = new.created.unwrap_or(current.created);
        conn.execute(
            "UPDATE source SET name = ?2, location = ?3, device = ?4, protocol = ?5,
                    version = ?6, description = ?7, created = ?8
             WHERE label = ?1",
            params![
                label,
                new.name,
                new.location,
                new.device,
                new.protocol,
                new.version,
                new.description,
                to_micros(&created)
            ],
        )?;
        fetch_source(&conn, label)
    }

    pub fn delete_source(&self, label: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM source WHERE label = ?1", params![label])?)
    }

    pub fn delete_sources(&self, filter: &SourceFilter) -> StorageResult<usize> {
        let predicate = filter.predicate();
        let sql = format!(
            "DELETE FROM source WHERE label IN (SELECT s.label {}{})",
            SOURCE_FROM,
            predicate.where_sql()
        );
        let conn = self.conn()?;
        Ok(conn.execute(&sql, params_from_iter(predicate.params()))?)
    }

    // ============================================
    // MEASURES
    // ============================================

    pub fn create_measure(&self, new: NewMeasure) -> StorageResult<Measure> {
        let conn = self.conn()?;
        fetch_source(&conn, &new.source)?;
        conn.execute(
            "INSERT INTO measure (source_label, label, name, description) VALUES (?1, ?2, ?3, ?4)",
            params![new.source, new.label, new.name, new.description],
        )?;
        fetch_measure(&conn, conn.last_insert_rowid())
    }

    pub fn get_measure(&self, id: i64) -> StorageResult<Measure> {
        let conn = self.conn()?;
        fetch_measure(&conn, id)
    }

    /// Resolve a measure by its (source, label) identity
    pub fn find_measure(&self, source: &str, label: &str) -> StorageResult<Measure> {
        let conn = self.conn()?;
        find_measure(&conn, source, label)
    }

    pub fn list_measures(
        &self,
        filter: &MeasureFilter,
        window: Window,
    ) -> StorageResult<(Vec<Measure>, i64)> {
        let conn = self.conn()?;
        list_with(
            &conn,
            MEASURE_SELECT,
            MEASURE_FROM,
            "m.id",
            &filter.predicate(),
            window,
            row_to_measure,
        )
    }

    pub fn update_measure(&self, id: i64, new: NewMeasure) -> StorageResult<Measure> {
        let conn = self.conn()?;
        fetch_measure(&conn, id)?;
        conn.execute(
            "UPDATE measure SET label = ?2, name = ?3, description = ?4 WHERE id = ?1",
            params![id, new.label, new.name, new.description],
        )?;
        fetch_measure(&conn, id)
    }

    pub fn delete_measure(&self, id: i64) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM measure WHERE id = ?1", params![id])?)
    }

    pub fn delete_measures(&self, filter: &MeasureFilter) -> StorageResult<usize> {
        let predicate = filter.predicate();
        let sql = format!(
            "DELETE FROM measure WHERE id IN (SELECT m.id {}{})",
            MEASURE_FROM,
            predicate.where_sql()
        );
        let conn = self.conn()?;
        Ok(conn.execute(&sql, params_from_iter(predicate.params()))?)
    }

    // ============================================
    // CHANNELS
    // ============================================

    pub fn create_channel(&self, new: NewChannel) -> StorageResult<Channel> {
        let conn = self.conn()?;
        let measure = find_measure(&conn, &new.source, &new.measure)?;
        conn.execute(
            "INSERT INTO channel (measure_id, label, name, unit, sampling_rate, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                measure.id,
                new.label,
                new.name,
                new.unit,
                new.sampling_rate,
                new.description
            ],
        )?;
        fetch_channel(&conn, conn.last_insert_rowid())
    }

    pub fn get_channel(&self, id: i64) -> StorageResult<Channel> {
        let conn = self.conn()?;
        fetch_channel(&conn, id)
    }

    pub fn list_channels(
        &self,
        filter: &ChannelFilter,
        window: Window,
    ) -> StorageResult<(Vec<Channel>, i64)> {
        let conn = self.conn()?;
        list_with(
            &conn,
            CHANNEL_SELECT,
            CHANNEL_FROM,
            "c.id",
            &filter.predicate(),
            window,
            row_to_channel,
        )
    }

    /// Channels of a measure, optionally restricted to some labels, ordered by id
    pub fn channels_of(&self, measure_id: i64, labels: &[String]) -> StorageResult<Vec<Channel>> {
        let predicate = Predicate::new()
            .eq("c.measure_id", Some(measure_id))
            .any_of("c.label", labels);
        let conn = self.conn()?;
        let (channels, _) = list_with(
            &conn,
            CHANNEL_SELECT,
            CHANNEL_FROM,
            "c.id",
            &predicate,
            Window::all(),
            row_to_channel,
        )?;
        Ok(channels)
    }

    /// Replace descriptive fields. `count` is never touched here.
    pub fn update_channel(&self, id: i64, new: NewChannel) -> StorageResult<Channel> {
        let conn = self.conn()?;
        fetch_channel(&conn, id)?;
        conn.execute(
            "UPDATE channel SET label = ?2, name = ?3, unit = ?4, sampling_rate = ?5, description = ?6
             WHERE id = ?1",
            params![
                id,
                new.label,
                new.name,
                new.unit,
                new.sampling_rate,
                new.description
            ],
        )?;
        fetch_channel(&conn, id)
    }

    pub fn delete_channel(&self, id: i64) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM channel WHERE id = ?1", params![id])?)
    }

    pub fn delete_channels(&self, filter: &ChannelFilter) -> StorageResult<usize> {
        let predicate = filter.predicate();
        let sql = format!(
            "DELETE FROM channel WHERE id IN (SELECT c.id {}{})",
            CHANNEL_FROM,
            predicate.where_sql()
        );
        let conn = self.conn()?;
        Ok(conn.execute(&sql, params_from_iter(predicate.params()))?)
    }

    // ============================================
    // CHUNKS
    // ============================================

    /// Create a chunk. Labels are not unique: every call yields a new id.
    pub fn create_chunk(&self, new: NewChunk) -> StorageResult<Chunk> {
        let conn = self.conn()?;
        let measure = find_measure(&conn, &new.source, &new.measure)?;
        conn.execute(
            "INSERT INTO chunk (measure_id, label) VALUES (?1, ?2)",
            params![measure.id, new.label],
        )?;
        fetch_chunk(&conn, conn.last_insert_rowid())
    }

    pub fn get_chunk(&self, id: i64) -> StorageResult<Chunk> {
        let conn = self.conn()?;
        fetch_chunk(&conn, id)
    }

    pub fn list_chunks(
        &self,
        filter: &ChunkFilter,
        window: Window,
    ) -> StorageResult<(Vec<Chunk>, i64)> {
        let conn = self.conn()?;
        list_with(
            &conn,
            CHUNK_SELECT,
            CHUNK_FROM,
            "k.id",
            &filter.predicate(),
            window,
            row_to_chunk,
        )
    }

    /// Chunks of a measure with one of the given labels, paged by id
    pub fn chunks_of(
        &self,
        measure_id: i64,
        labels: &[String],
        window: Window,
    ) -> StorageResult<(Vec<Chunk>, i64)> {
        let predicate = Predicate::new()
            .eq("k.measure_id", Some(measure_id))
            .any_of("k.label", labels);
        let conn = self.conn()?;
        list_with(
            &conn,
            CHUNK_SELECT,
            CHUNK_FROM,
            "k.id",
            &predicate,
            window,
            row_to_chunk,
        )
    }

    pub fn update_chunk(&self, id: i64, new: NewChunk) -> StorageResult<Chunk> {
        let conn = self.conn()?;
        fetch_chunk(&conn, id)?;
        conn.execute(
            "UPDATE chunk SET label = ?2 WHERE id = ?1",
            params![id, new.label],
        )?;
        fetch_chunk(&conn, id)
    }

    pub fn delete_chunk(&self, id: i64) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM chunk WHERE id = ?1", params![id])?)
    }

    pub fn delete_chunks(&self, filter: &ChunkFilter) -> StorageResult<usize> {
        let predicate = filter.predicate();
        let sql = format!(
            "DELETE FROM chunk WHERE id IN (SELECT k.id {}{})",
            CHUNK_FROM,
            predicate.where_sql()
        );
        let conn = self.conn()?;
        Ok(conn.execute(&sql, params_from_iter(predicate.params()))?)
    }

    // ============================================
    // SAMPLES
    // ============================================

    /// Bulk write path.
    ///
    /// Resolves the chunk, creates missing partitions, inserts every row in
    /// statements of `batch_size` rows and bumps each channel's count, all in one
    /// transaction. A uniqueness conflict rolls everything back, including a
    /// freshly created chunk.
    pub fn insert_samples(&self, batch: &SampleBatch) -> StorageResult<InsertReceipt> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let chunk_id = match &batch.chunk {
            ChunkTarget::Default => {
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM chunk WHERE measure_id = ?1 AND label = ?2
                         ORDER BY id LIMIT 1",
                        params![batch.measure_id, DEFAULT_CHUNK_LABEL],
                        |row| row.get(0),
                    )
                    .optional()?;
                match existing {
                    Some(id) => id,
                    None => insert_chunk(&tx, batch.measure_id, DEFAULT_CHUNK_LABEL)?,
                }
            }
            ChunkTarget::Create(label) => insert_chunk(&tx, batch.measure_id, label)?,
        };

        let micros: Vec<i64> = batch.timestamps.iter().map(to_micros).collect();
        let interval = read_settings(&tx)?.chunk_interval;
        ensure_partitions(&tx, &micros, duration_micros(interval))?;

        let batch_size = self.config.batch_size.clamp(1, MAX_ROWS_PER_STATEMENT);
        let mut rows: Vec<Value> = Vec::with_capacity(batch_size * 4);
        let mut pending = 0;
        let mut written = 0;

        for (channel_id, values) in &batch.series {
            for (ts, value) in micros.iter().zip(values) {
                rows.push(Value::Integer(*ts));
                rows.push(Value::Real(*value));
                rows.push(Value::Integer(*channel_id));
                rows.push(Value::Integer(chunk_id));
                pending += 1;

                if pending == batch_size {
                    written += insert_rows(&tx, &rows, pending)?;
                    rows.clear();
                    pending = 0;
                }
            }
        }
        if pending > 0 {
            written += insert_rows(&tx, &rows, pending)?;
        }

        {
            let mut stmt = tx.prepare_cached("UPDATE channel SET count = count + ?2 WHERE id = ?1")?;
            for (channel_id, values) in &batch.series {
                stmt.execute(params![channel_id, values.len() as i64])?;
            }
        }

        let chunk = fetch_chunk(&tx, chunk_id)?;
        tx.commit()?;

        tracing::debug!(
            measure_id = batch.measure_id,
            chunk_id,
            rows = written,
            "Samples committed"
        );

        Ok(InsertReceipt {
            chunk,
            rows: written,
        })
    }

    /// Distinct sample keys across channels, ordered, with the total distinct count.
    ///
    /// Overlapping chunks share timestamps, so the window is cut over
    /// (timestamp, chunk) keys and no channel returns more than `window.limit` rows.
    pub fn timestamp_window(
        &self,
        channel_ids: &[i64],
        window: Window,
    ) -> StorageResult<(Vec<SampleKey>, i64)> {
        if channel_ids.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let predicate = Predicate::new().any_of("channel_id", channel_ids);
        let conn = self.conn()?;

        let total: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM (SELECT DISTINCT timestamp, chunk_id FROM timeserie{})",
                predicate.where_sql()
            ),
            params_from_iter(predicate.params()),
            |row| row.get(0),
        )?;

        let n = predicate.next_param();
        let sql = format!(
            "SELECT DISTINCT timestamp, chunk_id FROM timeserie{}
             ORDER BY timestamp, chunk_id LIMIT ?{} OFFSET ?{}",
            predicate.where_sql(),
            n,
            n + 1
        );
        let mut bound = predicate.params().to_vec();
        bound.push(Value::Integer(window.limit));
        bound.push(Value::Integer(window.offset));

        let mut stmt = conn.prepare(&sql)?;
        let keys = stmt
            .query_map(params_from_iter(bound.iter()), |row| {
                Ok(SampleKey {
                    timestamp: row.get(0)?,
                    chunk_id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((keys, total))
    }

    /// One channel's samples as (timestamp micros, value), ordered by time then chunk.
    ///
    /// `chunk_id` restricts to one chunk; `range` restricts to keys in [first, last].
    pub fn series(
        &self,
        channel_id: i64,
        chunk_id: Option<i64>,
        range: Option<(SampleKey, SampleKey)>,
    ) -> StorageResult<Vec<(i64, f64)>> {
        let predicate = Predicate::new()
            .eq("channel_id", Some(channel_id))
            .eq("chunk_id", chunk_id);
        let mut sql = format!(
            "SELECT timestamp, value FROM timeserie{}",
            predicate.where_sql()
        );
        let mut bound = predicate.params().to_vec();
        if let Some((first, last)) = range {
            let n = predicate.next_param();
            sql.push_str(&format!(
                " AND (timestamp, chunk_id) >= (?{}, ?{}) AND (timestamp, chunk_id) <= (?{}, ?{})",
                n,
                n + 1,
                n + 2,
                n + 3
            ));
            bound.push(Value::Integer(first.timestamp));
            bound.push(Value::Integer(first.chunk_id));
            bound.push(Value::Integer(last.timestamp));
            bound.push(Value::Integer(last.chunk_id));
        }
        sql.push_str(" ORDER BY timestamp, chunk_id");

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bound.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total samples stored for a channel (live aggregate, unlike `Channel::count`)
    pub fn sample_count(&self, channel_id: i64) -> StorageResult<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM timeserie WHERE channel_id = ?1",
            params![channel_id],
            |row| row.get(0),
        )?)
    }

    // ============================================
    // PARTITIONS AND RETENTION
    // ============================================

    pub fn settings(&self) -> StorageResult<EngineSettings> {
        let conn = self.conn()?;
        read_settings(&conn)
    }

    /// Width of partitions created from now on. Existing partitions keep theirs.
    pub fn set_chunk_interval(&self, interval: Duration) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE engine_settings SET chunk_interval = ?1 WHERE id = 1",
            params![duration_micros(interval)],
        )?;
        tracing::info!(interval_us = duration_micros(interval), "Chunk interval updated");
        Ok(())
    }

    pub fn remove_retention_policy(&self) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE engine_settings SET retention_interval = NULL WHERE id = 1",
            [],
        )?;
        Ok(())
    }

    pub fn add_retention_policy(&self, retention: Duration) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE engine_settings SET retention_interval = ?1 WHERE id = 1",
            params![duration_micros(retention)],
        )?;
        tracing::info!(retention_us = duration_micros(retention), "Retention policy installed");
        Ok(())
    }

    /// Most recent partitions first
    pub fn recent_partitions(&self, limit: usize) -> StorageResult<Vec<Partition>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, range_start, range_end FROM partitions
             ORDER BY range_start DESC LIMIT ?1",
        )?;
        let partitions = stmt
            .query_map(params![limit as i64], row_to_partition)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(partitions)
    }

    /// Drop every partition ending at or before `cutoff`, with its samples
    pub fn drop_partitions_before(&self, cutoff: DateTime<Utc>) -> StorageResult<RetentionReport> {
        let cutoff = to_micros(&cutoff);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let doomed = {
            let mut stmt = tx.prepare_cached(
                "SELECT id, range_start, range_end FROM partitions WHERE range_end <= ?1",
            )?;
            let rows = stmt
                .query_map(params![cutoff], row_to_partition)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut report = RetentionReport::default();
        for partition in &doomed {
            report.samples_deleted += tx.execute(
                "DELETE FROM timeserie WHERE timestamp >= ?1 AND timestamp < ?2",
                params![partition.range_start, partition.range_end],
            )?;
            tx.execute("DELETE FROM partitions WHERE id = ?1", params![partition.id])?;
            report.partitions_dropped += 1;
        }

        tx.commit()?;
        Ok(report)
    }

    /// Apply the configured retention policy relative to `now`
    pub fn apply_retention(&self, now: DateTime<Utc>) -> StorageResult<RetentionReport> {
        match self.settings()?.retention {
            Some(retention) => {
                let cutoff = now.checked_sub_signed(retention).ok_or_else(|| {
                    StorageError::InvalidInterval(format_interval(retention))
                })?;
                self.drop_partitions_before(cutoff)
            }
            None => Ok(RetentionReport::default()),
        }
    }

    pub fn stats(&self) -> StorageResult<StoreStats> {
        let conn = self.conn()?;
        let count = |table: &str| -> StorageResult<i64> {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?)
        };
        Ok(StoreStats {
            sources: count("source")?,
            measures: count("measure")?,
            channels: count("channel")?,
            chunks: count("chunk")?,
            samples: count("timeserie")?,
            partitions: count("partitions")?,
        })
    }
}

// ============================================
// Helpers
// ============================================

fn duration_micros(d: Duration) -> i64 {
    d.num_microseconds().unwrap_or(i64::MAX)
}

fn list_with<T>(
    conn: &Connection,
    select: &str,
    from: &str,
    order_by: &str,
    predicate: &Predicate,
    window: Window,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> StorageResult<(Vec<T>, i64)> {
    let where_sql = predicate.where_sql();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) {}{}", from, where_sql),
        params_from_iter(predicate.params()),
        |row| row.get(0),
    )?;

    let n = predicate.next_param();
    let sql = format!(
        "{}{} ORDER BY {} LIMIT ?{} OFFSET ?{}",
        select,
        where_sql,
        order_by,
        n,
        n + 1
    );
    let mut bound = predicate.params().to_vec();
    bound.push(Value::Integer(window.limit));
    bound.push(Value::Integer(window.offset));

    let mut stmt = conn.prepare_cached(&sql)?;
    let items = stmt
        .query_map(params_from_iter(bound.iter()), map)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((items, total))
}

fn fetch_source(conn: &Connection, label: &str) -> StorageResult<Source> {
    conn.query_row(
        &format!("{} WHERE s.label = ?1", SOURCE_SELECT),
        params![label],
        row_to_source,
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found("Source", label))
}

fn fetch_measure(conn: &Connection, id: i64) -> StorageResult<Measure> {
    conn.query_row(
        &format!("{} WHERE m.id = ?1", MEASURE_SELECT),
        params![id],
        row_to_measure,
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found("Measure", id))
}

fn find_measure(conn: &Connection, source: &str, label: &str) -> StorageResult<Measure> {
    conn.query_row(
        &format!("{} WHERE m.source_label = ?1 AND m.label = ?2", MEASURE_SELECT),
        params![source, label],
        row_to_measure,
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found("Measure", format!("{}/{}", source, label)))
}

fn fetch_channel(conn: &Connection, id: i64) -> StorageResult<Channel> {
    conn.query_row(
        &format!("{} WHERE c.id = ?1", CHANNEL_SELECT),
        params![id],
        row_to_channel,
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found("Channel", id))
}

fn fetch_chunk(conn: &Connection, id: i64) -> StorageResult<Chunk> {
    conn.query_row(
        &format!("{} WHERE k.id = ?1", CHUNK_SELECT),
        params![id],
        row_to_chunk,
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found("Chunk", id))
}

fn insert_chunk(tx: &Transaction<'_>, measure_id: i64, label: &str) -> StorageResult<i64> {
    tx.execute(
        "INSERT INTO chunk (measure_id, label) VALUES (?1, ?2)",
        params![measure_id, label],
    )?;
    Ok(tx.last_insert_rowid())
}

fn insert_rows(tx: &Transaction<'_>, rows: &[Value], count: usize) -> StorageResult<usize> {
    let placeholders = vec!["(?, ?, ?, ?)"; count].join(", ");
    let sql = format!(
        "INSERT INTO timeserie (timestamp, value, channel_id, chunk_id) VALUES {}",
        placeholders
    );
    let mut stmt = tx.prepare_cached(&sql)?;
    Ok(stmt.execute(params_from_iter(rows.iter()))?)
}

fn read_settings(conn: &Connection) -> StorageResult<EngineSettings> {
    let (interval, retention): (i64, Option<i64>) = conn.query_row(
        "SELECT chunk_interval, retention_interval FROM engine_settings WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(EngineSettings {
        chunk_interval: Duration::microseconds(interval),
        retention: retention.map(Duration::microseconds),
    })
}

/// Make sure every timestamp falls inside a partition.
///
/// New partitions are aligned to multiples of `interval` from the epoch and
/// clipped so they never overlap an existing partition.
fn ensure_partitions(tx: &Transaction<'_>, micros: &[i64], interval: i64) -> StorageResult<()> {
    let mut sorted = micros.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut current: Option<Partition> = None;
    for ts in sorted {
        if current.map(|p| p.contains(ts)).unwrap_or(false) {
            continue;
        }

        let covering = tx
            .query_row(
                "SELECT id, range_start, range_end FROM partitions
                 WHERE range_start <= ?1 AND range_end > ?1 LIMIT 1",
                params![ts],
                row_to_partition,
            )
            .optional()?;
        if let Some(partition) = covering {
            current = Some(partition);
            continue;
        }

        let aligned = ts.div_euclid(interval) * interval;
        let prev_end: Option<i64> = tx.query_row(
            "SELECT MAX(range_end) FROM partitions WHERE range_end <= ?1",
            params![ts],
            |row| row.get(0),
        )?;
        let next_start: Option<i64> = tx.query_row(
            "SELECT MIN(range_start) FROM partitions WHERE range_start > ?1",
            params![ts],
            |row| row.get(0),
        )?;

        let start = prev_end.map_or(aligned, |p| p.max(aligned));
        let bound = aligned.saturating_add(interval);
        let end = next_start.map_or(bound, |n| n.min(bound));

        tx.execute(
            "INSERT INTO partitions (range_start, range_end) VALUES (?1, ?2)",
            params![start, end],
        )?;
        current = Some(Partition {
            id: tx.last_insert_rowid(),
            range_start: start,
            range_end: end,
        });
        tracing::debug!(range_start = start, range_end = end, "Partition created");
    }

    Ok(())
}

fn row_to_source(row: &Row<'_>) -> rusqlite::Result<Source> {
    Ok(Source {
        label: row.get(0)?,
        name: row.get(1)?,
        location: row.get(2)?,
        device: row.get(3)?,
        protocol: row.get(4)?,
        version: row.get(5)?,
        description: row.get(6)?,
        created: from_micros(row.get(7)?),
    })
}

fn row_to_measure(row: &Row<'_>) -> rusqlite::Result<Measure> {
    Ok(Measure {
        id: row.get(0)?,
        label: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        source: row.get(4)?,
    })
}

fn row_to_channel(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        label: row.get(1)?,
        name: row.get(2)?,
        unit: row.get(3)?,
        sampling_rate: row.get(4)?,
        description: row.get(5)?,
        count: row.get(6)?,
        measure_id: row.get(7)?,
        measure: row.get(8)?,
        source: row.get(9)?,
    })
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        label: row.get(1)?,
        measure_id: row.get(2)?,
        measure: row.get(3)?,
        source: row.get(4)?,
    })
}

fn row_to_partition(row: &Row<'_>) -> rusqlite::Result<Partition> {
    Ok(Partition {
        id: row.get(0)?,
        range_start: row.get(1)?,
        range_end: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn create_test_store() -> Store {
        Store::open(StoreConfig::in_memory()).unwrap()
    }

    fn seed(store: &Store) -> (Measure, Vec<Channel>) {
        store
            .create_source(NewSource {
                label: "openbci".to_string(),
                name: "OpenBCI Cyton".to_string(),
                location: None,
                device: Some("cyton".to_string()),
                protocol: None,
                version: None,
                description: None,
                created: None,
            })
            .unwrap();
        let measure = store
            .create_measure(NewMeasure {
                source: "openbci".to_string(),
                label: "eeg".to_string(),
                name: "EEG".to_string(),
                description: None,
            })
            .unwrap();
        let channels = ["c3", "c4"]
            .iter()
            .map(|label| {
                store
                    .create_channel(NewChannel {
                        source: "openbci".to_string(),
                        measure: "eeg".to_string(),
                        label: label.to_string(),
                        name: label.to_uppercase(),
                        unit: "uV".to_string(),
                        sampling_rate: Some(250.0),
                        description: None,
                    })
                    .unwrap()
            })
            .collect();
        (measure, channels)
    }

    fn timestamps(n: i64) -> Vec<DateTime<Utc>> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n).map(|i| base + Duration::milliseconds(i * 4)).collect()
    }

    fn batch(measure: &Measure, channels: &[Channel], chunk: ChunkTarget, n: i64) -> SampleBatch {
        SampleBatch {
            measure_id: measure.id,
            chunk,
            timestamps: timestamps(n),
            series: channels
                .iter()
                .map(|c| (c.id, (0..n).map(|i| i as f64).collect()))
                .collect(),
        }
    }

    #[test]
    fn test_store_on_disk() {
        let dir = tempdir().unwrap();
        let store = Store::open(StoreConfig::new(dir.path().join("db").join("test.db"))).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.sources, 0);
        assert_eq!(stats.samples, 0);
    }

    #[test]
    fn test_catalog_uniqueness() {
        let store = create_test_store();
        let (_, _) = seed(&store);

        let dup = store.create_measure(NewMeasure {
            source: "openbci".to_string(),
            label: "eeg".to_string(),
            name: String::new(),
            description: None,
        });
        assert!(matches!(dup, Err(StorageError::Conflict(_))));

        let missing = store.create_measure(NewMeasure {
            source: "nope".to_string(),
            label: "eeg".to_string(),
            name: String::new(),
            description: None,
        });
        assert!(matches!(missing, Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn test_insert_counts_rows_and_channels() {
        let store = create_test_store();
        let (measure, channels) = seed(&store);

        let receipt = store
            .insert_samples(&batch(&measure, &channels, ChunkTarget::Create("trial".into()), 10))
            .unwrap();
        assert_eq!(receipt.rows, 20);
        assert_eq!(receipt.chunk.label, "trial");

        for channel in &channels {
            assert_eq!(store.get_channel(channel.id).unwrap().count, 10);
            assert_eq!(store.sample_count(channel.id).unwrap(), 10);
        }
    }

    #[test]
    fn test_small_batch_size_still_writes_everything() {
        let mut config = StoreConfig::in_memory();
        config.batch_size = 3;
        let store = Store::open(config).unwrap();
        let (measure, channels) = seed(&store);

        let receipt = store
            .insert_samples(&batch(&measure, &channels, ChunkTarget::Default, 7))
            .unwrap();
        assert_eq!(receipt.rows, 14);
        assert_eq!(store.stats().unwrap().samples, 14);
    }

    #[test]
    fn test_conflict_rolls_back_everything() {
        let store = create_test_store();
        let (measure, channels) = seed(&store);

        store
            .insert_samples(&batch(&measure, &channels, ChunkTarget::Default, 5))
            .unwrap();
        let chunks_before = store.stats().unwrap().chunks;

        let err = store
            .insert_samples(&batch(&measure, &channels, ChunkTarget::Default, 5))
            .unwrap_err();
        assert!(err.is_conflict());

        assert_eq!(store.stats().unwrap().chunks, chunks_before);
        for channel in &channels {
            assert_eq!(store.get_channel(channel.id).unwrap().count, 5);
        }
    }

    #[test]
    fn test_default_chunk_is_reused_explicit_is_not() {
        let store = create_test_store();
        let (measure, channels) = seed(&store);
        let first = &channels[..1];

        let a = store
            .insert_samples(&batch(&measure, first, ChunkTarget::Default, 1))
            .unwrap();
        let mut later = batch(&measure, first, ChunkTarget::Default, 1);
        later.timestamps = vec![Utc::now()];
        let b = store.insert_samples(&later).unwrap();
        assert_eq!(a.chunk.id, b.chunk.id);
        assert_eq!(a.chunk.label, DEFAULT_CHUNK_LABEL);

        let x = store
            .insert_samples(&batch(&measure, first, ChunkTarget::Create("rest".into()), 1))
            .unwrap();
        let y = store
            .insert_samples(&batch(&measure, first, ChunkTarget::Create("rest".into()), 1))
            .unwrap();
        assert_ne!(x.chunk.id, y.chunk.id);
        assert_eq!(x.chunk.label, y.chunk.label);
    }

    #[test]
    fn test_timestamp_window_and_series() {
        let store = create_test_store();
        let (measure, channels) = seed(&store);
        store
            .insert_samples(&batch(&measure, &channels, ChunkTarget::Default, 10))
            .unwrap();

        let ids: Vec<i64> = channels.iter().map(|c| c.id).collect();
        let (window, total) = store.timestamp_window(&ids, Window::new(4, 3)).unwrap();
        assert_eq!(total, 10);
        assert_eq!(window.len(), 3);
        assert!(window.windows(2).all(|w| w[0] < w[1]));

        let series = store
            .series(channels[0].id, None, Some((window[0], window[2])))
            .unwrap();
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![4.0, 5.0, 6.0]);

        let all = store.series(channels[1].id, None, None).unwrap();
        assert_eq!(all.len(), 10);
    }

    #[test]
    fn test_timestamp_window_counts_overlapping_chunks() {
        let store = create_test_store();
        let (measure, channels) = seed(&store);
        let first = &channels[..1];
        store
            .insert_samples(&batch(&measure, first, ChunkTarget::Default, 4))
            .unwrap();
        store
            .insert_samples(&batch(&measure, first, ChunkTarget::Create("b".into()), 4))
            .unwrap();

        let (window, total) = store.timestamp_window(&[first[0].id], Window::new(0, 3)).unwrap();
        assert_eq!(total, 8);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].timestamp, window[1].timestamp);
        assert_ne!(window[0].chunk_id, window[1].chunk_id);

        let series = store
            .series(first[0].id, None, Some((window[0], window[2])))
            .unwrap();
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_partitions_follow_interval() {
        let store = create_test_store();
        let (measure, channels) = seed(&store);
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();

        let mut b = batch(&measure, &channels[..1], ChunkTarget::Default, 3);
        b.timestamps = vec![base, base + Duration::hours(1), base + Duration::hours(2)];
        store.insert_samples(&b).unwrap();

        let partitions = store.recent_partitions(10).unwrap();
        assert_eq!(partitions.len(), 3);
        let latest = partitions[0];
        assert_eq!(latest.range_end - latest.range_start, 3_600_000_000);
        assert_eq!(
            latest.range_start,
            to_micros(&Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_retention_drops_old_partitions() {
        let store = create_test_store();
        let (measure, channels) = seed(&store);

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut b = batch(&measure, &channels[..1], ChunkTarget::Default, 2);
        b.timestamps = vec![now - Duration::days(40), now - Duration::hours(1)];
        store.insert_samples(&b).unwrap();

        assert_eq!(store.apply_retention(now).unwrap(), RetentionReport::default());

        store.add_retention_policy(Duration::days(30)).unwrap();
        let report = store.apply_retention(now).unwrap();
        assert_eq!(report.partitions_dropped, 1);
        assert_eq!(report.samples_deleted, 1);
        assert_eq!(store.sample_count(channels[0].id).unwrap(), 1);
        // counts are a cache of ingested rows and are never decremented
        assert_eq!(store.get_channel(channels[0].id).unwrap().count, 2);
    }

    #[test]
    fn test_retention_cutoff_out_of_range_is_an_error() {
        let store = create_test_store();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        store.add_retention_policy(Duration::days(102_200_000)).unwrap();
        assert!(matches!(
            store.apply_retention(now),
            Err(StorageError::InvalidInterval(_))
        ));

        store.add_retention_policy(Duration::days(30)).unwrap();
        assert!(matches!(
            store.apply_retention(DateTime::<Utc>::MIN_UTC),
            Err(StorageError::InvalidInterval(_))
        ));
        assert_eq!(store.apply_retention(now).unwrap(), RetentionReport::default());
    }

    #[test]
    fn test_delete_by_filter_cascades() {
        let store = create_test_store();
        let (measure, channels) = seed(&store);
        store
            .insert_samples(&batch(&measure, &channels, ChunkTarget::Default, 4))
            .unwrap();

        let removed = store
            .delete_channels(&ChannelFilter {
                label: Some("c3".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.stats().unwrap().samples, 4);

        let none = store
            .delete_channels(&ChannelFilter {
                label: Some("missing".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(none, 0);
    }

    #[test]
    fn test_list_with_filter_and_window() {
        let store = create_test_store();
        seed(&store);

        let (channels, total) = store
            .list_channels(
                &ChannelFilter {
                    measure: Some("eeg".to_string()),
                    ..Default::default()
                },
                Window::new(1, 10),
            )
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].label, "c4");
        assert_eq!(channels[0].source, "openbci");
    }
}

//! Database schema
//!
//! Timestamps are stored as INTEGER microseconds since the Unix epoch (UTC).
//! The sample table is keyed by (timestamp, channel_id, chunk_id) and has no
//! rowid; `partitions` records the time ranges the sample table is split into.

pub const PRAGMAS: &str = "
    PRAGMA foreign_keys = ON;
    PRAGMA synchronous = NORMAL;
    PRAGMA temp_store = MEMORY;
";

/// Only valid for file-backed databases
pub const FILE_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA cache_size = 10000;
";

pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS source (
        label TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        location TEXT,
        device TEXT,
        protocol TEXT,
        version TEXT,
        description TEXT,
        created INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS measure (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_label TEXT NOT NULL REFERENCES source(label) ON DELETE CASCADE ON UPDATE CASCADE,
        label TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        description TEXT,
        UNIQUE (source_label, label)
    );

    CREATE TABLE IF NOT EXISTS channel (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        measure_id INTEGER NOT NULL REFERENCES measure(id) ON DELETE CASCADE,
        label TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        unit TEXT NOT NULL DEFAULT '',
        sampling_rate REAL,
        description TEXT,
        count INTEGER NOT NULL DEFAULT 0,
        UNIQUE (measure_id, label)
    );

    CREATE TABLE IF NOT EXISTS chunk (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        measure_id INTEGER NOT NULL REFERENCES measure(id) ON DELETE CASCADE,
        label TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_chunk_measure_label ON chunk(measure_id, label);

    CREATE TABLE IF NOT EXISTS timeserie (
        timestamp INTEGER NOT NULL,
        value REAL NOT NULL,
        channel_id INTEGER NOT NULL REFERENCES channel(id) ON DELETE CASCADE,
        chunk_id INTEGER NOT NULL REFERENCES chunk(id) ON DELETE CASCADE,
        PRIMARY KEY (timestamp, channel_id, chunk_id)
    ) WITHOUT ROWID;
    CREATE INDEX IF NOT EXISTS idx_timeserie_channel ON timeserie(channel_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_timeserie_chunk ON timeserie(chunk_id, channel_id, timestamp);

    CREATE TABLE IF NOT EXISTS partitions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        range_start INTEGER NOT NULL,
        range_end INTEGER NOT NULL,
        CHECK (range_start < range_end)
    );
    CREATE INDEX IF NOT EXISTS idx_partition_range ON partitions(range_start, range_end);

    CREATE TABLE IF NOT EXISTS engine_settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        chunk_interval INTEGER NOT NULL,
        retention_interval INTEGER
    );
";

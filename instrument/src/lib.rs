//! Column tables built from `tracing` events.
//!
//! Every info-level event becomes one row in the table named by its target;
//! each field becomes a column. Columns appear the first time a field is seen
//! and are back-filled with defaults, so a table's schema is whatever its
//! events happened to carry.
//!
//! ```ignore
//! // Library side:
//! tracing::info!(target: "aceei_price", iteration, item, price, excess_demand);
//!
//! // Test side:
//! instrument::install_subscriber();
//! // ... run ...
//! let recorder = instrument::drain();
//! let prices = recorder.table("aceei_price").unwrap();
//! let series = prices.f64s("price").unwrap();
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Metadata, Subscriber};

// === COLUMNS ===

#[derive(Debug, Clone, PartialEq)]
pub enum TypedColumn {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl TypedColumn {
    pub fn len(&self) -> usize {
        match self {
            TypedColumn::U64(v) => v.len(),
            TypedColumn::I64(v) => v.len(),
            TypedColumn::F64(v) => v.len(),
            TypedColumn::Bool(v) => v.len(),
            TypedColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append defaults until the column holds `rows` values.
    fn pad_to(&mut self, rows: usize) {
        let missing = rows.saturating_sub(self.len());
        if missing == 0 {
            return;
        }
        match self {
            TypedColumn::U64(v) => v.extend(std::iter::repeat_n(0, missing)),
            TypedColumn::I64(v) => v.extend(std::iter::repeat_n(0, missing)),
            TypedColumn::F64(v) => v.extend(std::iter::repeat_n(0.0, missing)),
            TypedColumn::Bool(v) => v.extend(std::iter::repeat_n(false, missing)),
            TypedColumn::Str(v) => v.extend(std::iter::repeat_n(String::new(), missing)),
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            TypedColumn::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<&[u64]> {
        match self {
            TypedColumn::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match self {
            TypedColumn::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&[String]> {
        match self {
            TypedColumn::Str(v) => Some(v),
            _ => None,
        }
    }

    fn to_polars(&self, name: &str) -> Column {
        match self {
            TypedColumn::U64(v) => Column::new(name.into(), v),
            TypedColumn::I64(v) => Column::new(name.into(), v),
            TypedColumn::F64(v) => Column::new(name.into(), v),
            TypedColumn::Bool(v) => Column::new(name.into(), v),
            TypedColumn::Str(v) => Column::new(name.into(), v),
        }
    }
}

// === TABLES ===

/// One table per tracing target. Columns are kept aligned to `row_count`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceTable {
    pub columns: BTreeMap<String, TypedColumn>,
    pub row_count: usize,
}

impl TraceTable {
    fn align(&mut self) {
        let rows = self.row_count;
        for column in self.columns.values_mut() {
            column.pad_to(rows);
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column(&self, name: &str) -> Option<&TypedColumn> {
        self.columns.get(name)
    }

    pub fn f64s(&self, name: &str) -> Option<&[f64]> {
        self.column(name).and_then(TypedColumn::as_f64)
    }

    pub fn u64s(&self, name: &str) -> Option<&[u64]> {
        self.column(name).and_then(TypedColumn::as_u64)
    }

    pub fn bools(&self, name: &str) -> Option<&[bool]> {
        self.column(name).and_then(TypedColumn::as_bool)
    }

    pub fn strs(&self, name: &str) -> Option<&[String]> {
        self.column(name).and_then(TypedColumn::as_str)
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| column.to_polars(name))
            .collect();
        DataFrame::new(columns)
    }
}

/// Every table recorded on the current thread, keyed by target.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: BTreeMap<String, TraceTable>,
}

impl Recorder {
    pub fn table(&self, target: &str) -> Option<&TraceTable> {
        self.tables.get(target)
    }

    /// Tables that fail to convert are skipped.
    pub fn to_dataframes(&self) -> BTreeMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| table.to_dataframe().ok().map(|df| (name.clone(), df)))
            .collect()
    }
}

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::default();
}

// === SUBSCRIBER ===

/// Writes one row's fields. A column whose first value had a different type
/// keeps that type; mismatched values are left to padding.
struct RowVisitor<'a> {
    table: &'a mut TraceTable,
}

impl RowVisitor<'_> {
    fn column(&mut self, field: &Field, empty: fn(usize) -> TypedColumn) -> &mut TypedColumn {
        let rows = self.table.row_count;
        self.table
            .columns
            .entry(field.name().to_string())
            .or_insert_with(|| empty(rows))
    }
}

impl Visit for RowVisitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if let TypedColumn::U64(v) = self.column(field, |n| TypedColumn::U64(vec![0; n])) {
            v.push(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if let TypedColumn::I64(v) = self.column(field, |n| TypedColumn::I64(vec![0; n])) {
            v.push(value);
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let TypedColumn::F64(v) = self.column(field, |n| TypedColumn::F64(vec![0.0; n])) {
            v.push(value);
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if let TypedColumn::Bool(v) = self.column(field, |n| TypedColumn::Bool(vec![false; n])) {
            v.push(value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if let TypedColumn::Str(v) = self.column(field, |n| TypedColumn::Str(vec![String::new(); n])) {
            v.push(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }
}

/// Records info-level events into the thread-local [`Recorder`]. Spans are
/// ignored.
pub struct TableSubscriber;

impl Subscriber for TableSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= tracing::Level::INFO
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let target = event.metadata().target().to_string();
        RECORDER.with(|r| {
            let mut recorder = r.borrow_mut();
            let table = recorder.tables.entry(target).or_default();
            table.align();
            event.record(&mut RowVisitor { table: &mut *table });
            table.row_count += 1;
            table.align();
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Install [`TableSubscriber`] as the global default. Later calls are no-ops.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(TableSubscriber);
}

/// Take everything recorded on this thread.
pub fn drain() -> Recorder {
    RECORDER.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

pub fn clear() {
    RECORDER.with(|r| *r.borrow_mut() = Recorder::default());
}

pub fn drain_to_dataframes() -> BTreeMap<String, DataFrame> {
    drain().to_dataframes()
}

// === PARQUET ===

fn io_error(e: std::io::Error) -> PolarsError {
    PolarsError::IO {
        error: e.into(),
        msg: None,
    }
}

/// Write each frame to `{dir}/{name}.parquet`.
pub fn save_parquet(dfs: &mut BTreeMap<String, DataFrame>, dir: &Path) -> PolarsResult<()> {
    std::fs::create_dir_all(dir).map_err(io_error)?;
    for (name, df) in dfs.iter_mut() {
        let file = std::fs::File::create(dir.join(format!("{name}.parquet"))).map_err(io_error)?;
        ParquetWriter::new(file).finish(df)?;
    }
    Ok(())
}

/// Directory-safe run label, at most 60 characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(60)
        .collect()
}

/// Clears the thread's recorder on creation and writes the run's tables to
/// `{parent}/{unix_seconds}_{name}/` on drop, followed by a `_ready` marker.
///
/// ```ignore
/// let mut rec = instrument::ScopedRecorder::new("runs", "two_by_two");
/// // ... run ...
/// let prices = &rec.get()["aceei_price"];
/// ```
pub struct ScopedRecorder {
    run_dir: PathBuf,
    run_name: String,
    dfs: Option<BTreeMap<String, DataFrame>>,
}

impl ScopedRecorder {
    pub fn new(parent: impl Into<PathBuf>, name: &str) -> Self {
        let started = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let run_name = format!("{started}_{}", sanitize(name));
        let run_dir = parent.into().join(&run_name);
        clear();
        install_subscriber();
        Self {
            run_dir,
            run_name,
            dfs: None,
        }
    }

    /// Drains on first call; later calls return the same frames.
    pub fn get(&mut self) -> &BTreeMap<String, DataFrame> {
        self.dfs.get_or_insert_with(drain_to_dataframes)
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl Drop for ScopedRecorder {
    fn drop(&mut self) {
        let mut dfs = self.dfs.take().unwrap_or_else(drain_to_dataframes);
        if dfs.is_empty() {
            return;
        }
        if let Err(e) = save_parquet(&mut dfs, &self.run_dir) {
            eprintln!("ScopedRecorder({}): parquet write failed: {e}", self.run_name);
            return;
        }
        if let Err(e) = std::fs::File::create(self.run_dir.join("_ready")) {
            eprintln!("ScopedRecorder({}): _ready marker failed: {e}", self.run_name);
        }
    }
}

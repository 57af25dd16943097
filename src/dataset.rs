//! Reference snapshot of historical trips.
//!
//! The snapshot is read once at startup into a [`ReferenceDataset`] and
//! wrapped in a [`DatasetHandle`]. A snapshot that cannot be read does not
//! abort the process: the handle becomes [`DatasetHandle::Unavailable`] and
//! every prediction reports it.

use std::{fs::File, path::Path, sync::Arc};

use parquet::file::metadata::ParquetMetaData;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use thiserror::Error;

use crate::types::ReferenceRow;

/// Passenger count assumed for snapshots that carry no passenger column.
pub const DEFAULT_SNAPSHOT_PASSENGERS: i64 = 1;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to open snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read parquet snapshot: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("failed to read csv snapshot: {0}")]
    Csv(#[from] csv::Error),
    #[error("snapshot is missing required column `{0}`")]
    MissingColumn(&'static str),
    #[error("row {row}: column `{column}` {problem}")]
    BadValue {
        row: usize,
        column: &'static str,
        problem: &'static str,
    },
    #[error("parquet footer is inconsistent: {0}")]
    Footer(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Distance,
    Hour,
    Day,
    Passengers,
    Duration,
    Fare,
}

impl Column {
    const ALL: [Column; 6] = [
        Column::Distance,
        Column::Hour,
        Column::Day,
        Column::Passengers,
        Column::Duration,
        Column::Fare,
    ];

    fn canonical(self) -> &'static str {
        match self {
            Column::Distance => "distance_km",
            Column::Hour => "hour_of_day",
            Column::Day => "day_of_week",
            Column::Passengers => "passenger_count",
            Column::Duration => "predicted_duration_min",
            Column::Fare => "predicted_fare_usd",
        }
    }

    // Names written by the older precompute pipeline.
    fn legacy(self) -> &'static [&'static str] {
        match self {
            Column::Distance => &["distancia_km", "trip_distance"],
            Column::Hour => &["hora", "pickup_hour"],
            Column::Day => &["dia_semana", "pickup_day_of_week"],
            Column::Passengers => &[],
            Column::Duration => &["tempo_viagem_minutos"],
            Column::Fare => &["valor_corrida"],
        }
    }

    fn matches(self, name: &str) -> bool {
        name == self.canonical() || self.legacy().iter().any(|l| *l == name)
    }

    fn optional(self) -> bool {
        self == Column::Passengers
    }
}

/// Position of each logical column in the snapshot's physical layout.
#[derive(Debug)]
struct ColumnMap {
    index: [Option<usize>; 6],
}

impl ColumnMap {
    fn resolve<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self, DatasetError> {
        let names: Vec<&str> = names.into_iter().collect();
        let mut index = [None; 6];
        for (slot, col) in index.iter_mut().zip(Column::ALL) {
            // canonical name wins over a legacy alias when both are present
            *slot = names
                .iter()
                .position(|n| *n == col.canonical())
                .or_else(|| names.iter().position(|n| col.matches(n)));
            if slot.is_none() && !col.optional() {
                return Err(DatasetError::MissingColumn(col.canonical()));
            }
        }
        Ok(Self { index })
    }

    fn get(&self, col: Column) -> Option<usize> {
        self.index[col as usize]
    }
}

#[derive(Debug, Clone, Copy)]
enum Cell {
    Int(i64),
    Float(f64),
}

impl Cell {
    fn as_f64(self) -> f64 {
        match self {
            Cell::Int(v) => v as f64,
            Cell::Float(v) => v,
        }
    }

    fn as_i64(self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(v),
            Cell::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(v as i64),
            Cell::Float(_) => None,
        }
    }
}

fn assemble<F>(row: usize, map: &ColumnMap, mut cell: F) -> Result<ReferenceRow, DatasetError>
where
    F: FnMut(usize, Column) -> Result<Cell, DatasetError>,
{
    let mut float = |col: Column| -> Result<f64, DatasetError> {
        match map.get(col) {
            Some(i) => cell(i, col).map(Cell::as_f64),
            None => Err(DatasetError::MissingColumn(col.canonical())),
        }
    };
    let distance_km = float(Column::Distance)?;
    let predicted_duration_min = float(Column::Duration)?;
    let predicted_fare_usd = float(Column::Fare)?;

    let mut integer = |col: Column| -> Result<Option<i64>, DatasetError> {
        let Some(i) = map.get(col) else {
            return Ok(None);
        };
        cell(i, col)?.as_i64().map(Some).ok_or(DatasetError::BadValue {
            row,
            column: col.canonical(),
            problem: "is not an integer",
        })
    };
    let hour_of_day = integer(Column::Hour)?.ok_or(DatasetError::MissingColumn("hour_of_day"))?;
    let day_of_week = integer(Column::Day)?.ok_or(DatasetError::MissingColumn("day_of_week"))?;
    let passenger_count = integer(Column::Passengers)?.unwrap_or(DEFAULT_SNAPSHOT_PASSENGERS);

    Ok(ReferenceRow {
        distance_km,
        hour_of_day,
        day_of_week,
        passenger_count,
        predicted_duration_min,
        predicted_fare_usd,
    })
}

fn parquet_cell(field: &Field, row: usize, column: Column) -> Result<Cell, DatasetError> {
    let bad = |problem| DatasetError::BadValue {
        row,
        column: column.canonical(),
        problem,
    };
    Ok(match *field {
        Field::Byte(v) => Cell::Int(v.into()),
        Field::Short(v) => Cell::Int(v.into()),
        Field::Int(v) => Cell::Int(v.into()),
        Field::Long(v) => Cell::Int(v),
        Field::UByte(v) => Cell::Int(v.into()),
        Field::UShort(v) => Cell::Int(v.into()),
        Field::UInt(v) => Cell::Int(v.into()),
        Field::ULong(v) => Cell::Int(i64::try_from(v).map_err(|_| bad("overflows i64"))?),
        Field::Float(v) => Cell::Float(v.into()),
        Field::Double(v) => Cell::Float(v),
        Field::Null => return Err(bad("is null")),
        _ => return Err(bad("is not numeric")),
    })
}

fn csv_cell(raw: Option<&str>, row: usize, column: Column) -> Result<Cell, DatasetError> {
    let bad = |problem| DatasetError::BadValue {
        row,
        column: column.canonical(),
        problem,
    };
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or_else(|| bad("is empty"))?;
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(Cell::Int(v));
    }
    raw.parse::<f64>()
        .map(Cell::Float)
        .map_err(|_| bad("is not numeric"))
}

/// Immutable, ordered table of reference rows. Row order is load order and
/// is what tie-breaking in the predictor relies on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceDataset {
    rows: Vec<ReferenceRow>,
}

impl ReferenceDataset {
    pub fn from_rows(rows: Vec<ReferenceRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[ReferenceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reads a snapshot, choosing the decoder from the file extension
    /// (`.csv` for CSV, anything else is treated as Parquet).
    pub fn read_snapshot(path: &Path) -> Result<Self, DatasetError> {
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv {
            Self::read_csv(file)
        } else {
            Self::read_parquet(file)
        }
    }

    fn read_parquet(file: File) -> Result<Self, DatasetError> {
        let reader = SerializedFileReader::new(file)?;
        let map = ColumnMap::resolve(
            reader
                .metadata()
                .file_metadata()
                .schema()
                .get_fields()
                .iter()
                .map(|f| f.name()),
        )?;

        check_row_counts(reader.metadata())?;

        // footer counts are untrusted, so no capacity hint
        let mut rows = Vec::new();
        for (n, record) in reader.get_row_iter(None)?.enumerate() {
            let record = record?;
            let fields: Vec<&Field> = record.get_column_iter().map(|(_, f)| f).collect();
            let row = assemble(n, &map, |i, col| {
                let field = fields.get(i).ok_or(DatasetError::MissingColumn(col.canonical()))?;
                parquet_cell(field, n, col)
            })?;
            rows.push(row);
        }
        Ok(Self { rows })
    }

    fn read_csv(file: File) -> Result<Self, DatasetError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
        let map = ColumnMap::resolve(reader.headers()?.iter())?;

        let mut rows = Vec::new();
        for (n, record) in reader.records().enumerate() {
            let record = record?;
            let row = assemble(n, &map, |i, col| csv_cell(record.get(i), n, col))?;
            rows.push(row);
        }
        Ok(Self { rows })
    }
}

/// Rejects footers whose row counts disagree with the column chunks they
/// describe. The row reader trusts these counts and indexes past the end of
/// a short column.
fn check_row_counts(meta: &ParquetMetaData) -> Result<(), DatasetError> {
    let mut total: i64 = 0;
    for (g, rg) in meta.row_groups().iter().enumerate() {
        if rg.num_rows() < 0 {
            return Err(DatasetError::Footer(format!("row group {g} has a negative row count")));
        }
        for c in 0..rg.num_columns() {
            let values = rg.column(c).num_values();
            if values < rg.num_rows() {
                return Err(DatasetError::Footer(format!(
                    "row group {g} claims {} rows but column {c} holds {values} values",
                    rg.num_rows()
                )));
            }
        }
        total = total.saturating_add(rg.num_rows());
    }
    let declared = meta.file_metadata().num_rows();
    if declared != total {
        return Err(DatasetError::Footer(format!(
            "file declares {declared} rows but its row groups hold {total}"
        )));
    }
    Ok(())
}

/// What the service holds after startup: either the loaded snapshot or the
/// reason it could not be loaded.
#[derive(Debug, Clone)]
pub enum DatasetHandle {
    Loaded(Arc<ReferenceDataset>),
    Unavailable(Arc<str>),
}

impl DatasetHandle {
    /// Loads the snapshot at `path`. Never fails: read errors are logged and
    /// turned into the unavailable state.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match ReferenceDataset::read_snapshot(path) {
            Ok(ds) => {
                tracing::info!(path = %path.display(), rows = ds.len(), "reference snapshot loaded");
                if ds.is_empty() {
                    tracing::warn!("reference snapshot has no rows; every query will miss");
                }
                Self::Loaded(Arc::new(ds))
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "reference snapshot unavailable");
                Self::Unavailable(e.to_string().into())
            }
        }
    }

    pub fn from_rows(rows: Vec<ReferenceRow>) -> Self {
        Self::Loaded(Arc::new(ReferenceDataset::from_rows(rows)))
    }

    pub fn unavailable(reason: impl Into<Arc<str>>) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn dataset(&self) -> Option<&ReferenceDataset> {
        match self {
            Self::Loaded(ds) => Some(ds.as_ref()),
            Self::Unavailable(_) => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

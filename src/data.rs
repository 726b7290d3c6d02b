use crate::actions::ActionRow;
use crate::api_client::DataSource;
use crate::error::Error;
use crate::transform::{EntityKeys, Metrics, TransformedRow};
use datafusion::arrow::array::{
    Array, ArrayRef, AsArray, Float64Builder, Int64Builder, RecordBatch, StringBuilder,
};
use datafusion::arrow::compute::{cast_with_options, CastOptions};
use datafusion::arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use datafusion::prelude::{DataFrame, SessionContext};
use std::sync::Arc;

/// Column of a frame under construction.
enum ColumnValues {
    Int64(Vec<Option<i64>>),
    Float64(Vec<f64>),
    Utf8(Vec<Option<String>>),
}

/// Builds a single-batch [`DataFrame`] column by column.
#[derive(Default)]
pub struct FrameBuilder {
    columns: Vec<(String, ColumnValues)>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int_column(mut self, name: &str, values: impl IntoIterator<Item = Option<i64>>) -> Self {
        self.columns
            .push((name.to_string(), ColumnValues::Int64(values.into_iter().collect())));
        self
    }

    /// Entity IDs are stored signed; coercion already capped them at `i64::MAX`.
    pub fn id_column(self, name: &str, values: impl IntoIterator<Item = u64>) -> Self {
        self.int_column(name, values.into_iter().map(|id| i64::try_from(id).ok()))
    }

    pub fn float_column(mut self, name: &str, values: impl IntoIterator<Item = f64>) -> Self {
        self.columns
            .push((name.to_string(), ColumnValues::Float64(values.into_iter().collect())));
        self
    }

    pub fn text_column<S: Into<String>>(
        mut self,
        name: &str,
        values: impl IntoIterator<Item = Option<S>>,
    ) -> Self {
        self.columns.push((
            name.to_string(),
            ColumnValues::Utf8(values.into_iter().map(|v| v.map(Into::into)).collect()),
        ));
        self
    }

    pub fn to_record_batch(self) -> Result<RecordBatch, Error> {
        let mut fields = Vec::with_capacity(self.columns.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len());

        for (name, values) in self.columns {
            match values {
                ColumnValues::Int64(values) => {
                    let mut builder = Int64Builder::with_capacity(values.len());
                    builder.extend(values);
                    fields.push(Field::new(name, DataType::Int64, true));
                    arrays.push(Arc::new(builder.finish()));
                }
                ColumnValues::Float64(values) => {
                    let mut builder = Float64Builder::with_capacity(values.len());
                    builder.append_slice(&values);
                    fields.push(Field::new(name, DataType::Float64, false));
                    arrays.push(Arc::new(builder.finish()));
                }
                ColumnValues::Utf8(values) => {
                    let mut builder = StringBuilder::new();
                    for value in values {
                        builder.append_option(value);
                    }
                    fields.push(Field::new(name, DataType::Utf8, true));
                    arrays.push(Arc::new(builder.finish()));
                }
            }
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    pub fn to_dataframe(self, ctx: &SessionContext) -> Result<DataFrame, Error> {
        Ok(ctx.read_batch(self.to_record_batch()?)?)
    }
}

fn with_keys(builder: FrameBuilder, keys: &[EntityKeys]) -> FrameBuilder {
    EntityKeys::COLUMNS
        .iter()
        .enumerate()
        .fold(builder, |builder, (i, column)| {
            builder.id_column(column, keys.iter().map(|k| k.values()[i]))
        })
}

fn with_metrics(builder: FrameBuilder, metrics: &[Metrics]) -> FrameBuilder {
    Metrics::COLUMNS
        .iter()
        .enumerate()
        .fold(builder, |builder, (i, column)| {
            builder.float_column(column, metrics.iter().map(|m| m.values()[i]))
        })
}

/// Flat frame of transformed rows; nested actions and display attributes are left out.
pub fn transformed_frame(
    rows: &[TransformedRow],
    ctx: &SessionContext,
) -> Result<DataFrame, Error> {
    let keys: Vec<EntityKeys> = rows.iter().map(|r| r.keys).collect();
    let metrics: Vec<Metrics> = rows.iter().map(|r| r.metrics).collect();

    let builder = FrameBuilder::new()
        .text_column("data_source", rows.iter().map(|r| Some(r.source.as_str())));
    let builder = with_keys(builder, &keys)
        .text_column("country", rows.iter().map(|r| Some(r.country.as_str())))
        .text_column("age", rows.iter().map(|r| Some(r.age.as_str())))
        .text_column("gender", rows.iter().map(|r| Some(r.gender.as_str())))
        .text_column("placement", rows.iter().map(|r| Some(r.placement.as_str())));

    with_metrics(builder, &metrics).to_dataframe(ctx)
}

/// Converts exploded action rows to a DataFrame.
///
/// # Arguments
/// * `rows` - A slice of [`ActionRow`]
/// * `ctx` - A reference to the [`SessionContext`] for DataFrame operations
///
/// # Returns
/// A Result containing either a [`DataFrame`] or an [`Error`]
pub fn action_frame(rows: &[ActionRow], ctx: &SessionContext) -> Result<DataFrame, Error> {
    let keys: Vec<EntityKeys> = rows.iter().map(|r| r.keys).collect();
    let builder = FrameBuilder::new().text_column(
        "data_source",
        rows.iter().map(|_| Some(DataSource::Action.as_str())),
    );

    with_keys(builder, &keys)
        .text_column("action_type", rows.iter().map(|r| Some(r.action_type.as_str())))
        .text_column(
            "attribution_window",
            rows.iter().map(|r| Some(r.attribution_window.as_str())),
        )
        .float_column("action_count", rows.iter().map(|r| r.action_count))
        .float_column("action_value", rows.iter().map(|r| r.action_value))
        .to_dataframe(ctx)
}

/// A single value read back out of a frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Materialized frame: column names plus row-major cells.
#[derive(Clone, Debug, Default)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Rows {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sum of a numeric column, ignoring nulls.
    pub fn sum(&self, name: &str) -> f64 {
        match self.column_index(name) {
            Some(i) => self.rows.iter().filter_map(|row| row[i].as_f64()).sum(),
            None => 0.0,
        }
    }
}

fn column_cells(array: &ArrayRef) -> Result<Vec<Cell>, Error> {
    let options = CastOptions::default();
    let cells = match array.data_type() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Boolean => {
            let cast = cast_with_options(array.as_ref(), &DataType::Int64, &options)?;
            let values = cast.as_primitive::<Int64Type>();
            (0..values.len())
                .map(|i| if values.is_valid(i) { Cell::Int(values.value(i)) } else { Cell::Null })
                .collect()
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 | DataType::Decimal128(_, _) => {
            let cast = cast_with_options(array.as_ref(), &DataType::Float64, &options)?;
            let values = cast.as_primitive::<Float64Type>();
            (0..values.len())
                .map(|i| if values.is_valid(i) { Cell::Float(values.value(i)) } else { Cell::Null })
                .collect()
        }
        DataType::Null => vec![Cell::Null; array.len()],
        _ => {
            let cast = cast_with_options(array.as_ref(), &DataType::Utf8, &options)?;
            let values = cast.as_string::<i32>();
            (0..values.len())
                .map(|i| {
                    if values.is_valid(i) {
                        Cell::Text(values.value(i).to_string())
                    } else {
                        Cell::Null
                    }
                })
                .collect()
        }
    };
    Ok(cells)
}

/// Collects a frame into row-major cells.
pub async fn collect_rows(df: DataFrame) -> Result<Rows, Error> {
    let columns: Vec<String> = df
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect();

    let mut rows = Vec::new();
    for batch in df.collect().await? {
        let cells = batch
            .columns()
            .iter()
            .map(column_cells)
            .collect::<Result<Vec<_>, _>>()?;
        for i in 0..batch.num_rows() {
            rows.push(cells.iter().map(|column| column[i].clone()).collect());
        }
    }

    Ok(Rows { columns, rows })
}

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, UInt32Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::sweep::SweepPoint;

pub struct BenchRow {
    pub route: String,
    pub window: u64,
    pub payload: u64,
    pub iterations: u32,
    pub bandwidth_mib_s: f64,
    pub latency_us: f64,
    pub mismatched_words: u64,
}

pub fn rows_from_sweep(
    route: &str,
    payload: u64,
    iterations: u32,
    points: &[SweepPoint],
) -> Vec<BenchRow> {
    points
        .iter()
        .map(|p| BenchRow {
            route: route.to_string(),
            window: p.window as u64,
            payload,
            iterations,
            bandwidth_mib_s: p.bandwidth_mib_s,
            latency_us: p.latency_us,
            mismatched_words: p.mismatched_words as u64,
        })
        .collect()
}

pub fn write_parquet(path: &str, rows: &[BenchRow]) -> Result<(), Box<dyn std::error::Error>> {
    if rows.is_empty() {
        return Ok(());
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("route", DataType::Utf8, false),
        Field::new("window", DataType::UInt64, false),
        Field::new("payload", DataType::UInt64, false),
        Field::new("iterations", DataType::UInt32, false),
        Field::new("bandwidth_mib_s", DataType::Float64, false),
        Field::new("latency_us", DataType::Float64, false),
        Field::new("mismatched_words", DataType::UInt64, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.route.as_str()).collect::<Vec<_>>(),
            )) as ArrayRef,
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.window).collect::<Vec<_>>(),
            )) as ArrayRef,
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.payload).collect::<Vec<_>>(),
            )) as ArrayRef,
            Arc::new(UInt32Array::from(
                rows.iter().map(|r| r.iterations).collect::<Vec<_>>(),
            )) as ArrayRef,
            Arc::new(Float64Array::from(
                rows.iter().map(|r| r.bandwidth_mib_s).collect::<Vec<_>>(),
            )) as ArrayRef,
            Arc::new(Float64Array::from(
                rows.iter().map(|r| r.latency_us).collect::<Vec<_>>(),
            )) as ArrayRef,
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.mismatched_words).collect::<Vec<_>>(),
            )) as ArrayRef,
        ],
    )?;

    let file = std::fs::File::create(path)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

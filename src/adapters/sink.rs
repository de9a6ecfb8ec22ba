use crate::domain::model::FlatRecord;
use crate::domain::ports::RecordSink;
use crate::utils::error::{FlattenError, Result};
use async_trait::async_trait;
use std::io::Write;

/// 每筆記錄寫成一行 JSON
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    label: String,
    written: usize,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W, label: impl Into<String>) -> Self {
        Self {
            writer,
            label: label.into(),
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    async fn write_record(&mut self, record: &FlatRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<String> {
        self.writer.flush()?;
        tracing::debug!("💾 Wrote {} JSON lines to {}", self.written, self.label);
        Ok(self.label.clone())
    }
}

/// 表格輸出：第一筆記錄決定欄位標題，之後每筆都必須相同
pub struct CsvSink<W: Write + Send> {
    writer: csv::Writer<W>,
    label: String,
    unset_placeholder: String,
    header: Option<Vec<String>>,
}

impl<W: Write + Send> CsvSink<W> {
    pub fn new(writer: W, label: impl Into<String>, unset_placeholder: impl Into<String>) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            label: label.into(),
            unset_placeholder: unset_placeholder.into(),
            header: None,
        }
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| FlattenError::IoError(e.into_error()))
    }

    fn columns(record: &FlatRecord) -> Vec<String> {
        record
            .field_names()
            .map(str::to_string)
            .chain(record.metrics().keys().cloned())
            .collect()
    }
}

#[async_trait]
impl<W: Write + Send> RecordSink for CsvSink<W> {
    async fn write_record(&mut self, record: &FlatRecord) -> Result<()> {
        let columns = Self::columns(record);
        match &self.header {
            Some(header) if *header != columns => {
                return Err(FlattenError::malformed(format!(
                    "record columns [{}] differ from CSV header [{}]",
                    columns.join(", "),
                    header.join(", ")
                )));
            }
            Some(_) => {}
            None => {
                self.writer.write_record(&columns)?;
                self.header = Some(columns);
            }
        }

        let row = record
            .fields()
            .iter()
            .map(|(_, value)| value.to_cell(&self.unset_placeholder))
            .chain(record.metrics().values().map(|number| number.to_string()));
        self.writer.write_record(row)?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<String> {
        self.writer.flush()?;
        Ok(self.label.clone())
    }
}

/// 把記錄留在記憶體中
#[derive(Debug, Default)]
pub struct CollectSink {
    records: Vec<FlatRecord>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[FlatRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<FlatRecord> {
        self.records
    }
}

#[async_trait]
impl RecordSink for CollectSink {
    async fn write_record(&mut self, record: &FlatRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    async fn finish(&mut self) -> Result<String> {
        Ok(format!("memory ({} records)", self.records.len()))
    }
}

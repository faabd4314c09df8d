//! 记录表：CSV 表头 + 记录
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use rustc_hash::FxHashSet;
use themetrack_engine::{CellValue, Record};

use crate::error::TtResult;
use crate::rule::standardize_cell;

/// 一张持仓/推荐表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    headers: Vec<String>,
    records: Vec<Record>,
}

impl RecordTable {
    pub fn new(headers: Vec<String>, records: Vec<Record>) -> Self {
        Self { headers, records }
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> TtResult<Self> {
        let file = fs::File::open(path.as_ref())?;
        Self::from_csv_reader(file)
    }

    /// 首行为表头；空单元格读为 Null，多出表头的单元格忽略
    pub fn from_csv_reader<R: Read>(reader: R) -> TtResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| standardize_cell(h).to_string())
            .collect();

        let mut records = Vec::new();
        for result in csv_reader.records() {
            let row = result?;
            let record = Record::from_pairs(headers.iter().zip(row.iter()).map(|(h, cell)| {
                let cell = standardize_cell(cell);
                let value = if cell.is_empty() {
                    CellValue::Null
                } else {
                    CellValue::from(cell)
                };
                (h.clone(), value)
            }));
            records.push(record);
        }

        log::debug!("Read {} records with {} columns", records.len(), headers.len());
        Ok(Self { headers, records })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 输出列：原表头在前，规则新建的列按首次出现的记录顺序追加（同一记录内按列名排序）
    pub fn output_headers(&self) -> Vec<String> {
        let mut seen: FxHashSet<&str> = self.headers.iter().map(String::as_str).collect();
        let mut headers = self.headers.clone();
        for record in &self.records {
            let mut fresh: Vec<&str> = record.columns().filter(|c| !seen.contains(c)).collect();
            fresh.sort_unstable();
            for column in fresh {
                seen.insert(column);
                headers.push(column.to_string());
            }
        }
        headers
    }

    pub fn write_csv_path(&self, path: impl AsRef<Path>) -> TtResult<()> {
        let file = fs::File::create(path.as_ref())?;
        self.write_csv(file)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> TtResult<()> {
        let headers = self.output_headers();
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&headers)?;
        for record in &self.records {
            csv_writer.write_record(
                headers
                    .iter()
                    .map(|h| record.get(h).map(|v| v.to_string()).unwrap_or_default()),
            )?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_table() {
        let table = RecordTable::from_csv_reader("Ticker, Qty ,Note\nASX:FOO,10,\nBAR,3\n".as_bytes()).unwrap();
        assert_eq!(table.headers(), &["Ticker", "Qty", "Note"]);
        assert_eq!(table.len(), 2);
        let first = &table.records()[0];
        assert_eq!(first.text("Ticker").as_deref(), Some("ASX:FOO"));
        assert_eq!(first.get("Note"), Some(&CellValue::Null));
        assert!(!table.records()[1].contains_column("Note"));
    }

    #[test]
    fn test_new_columns_appended_on_write() {
        let mut table = RecordTable::from_csv_reader("Ticker\nFOO\nBAR\n".as_bytes()).unwrap();
        table.records_mut()[0].set("Exchange", "NYSE");
        table.records_mut()[1].set("Region", "US");
        table.records_mut()[1].set("Currency", "USD");

        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "Ticker,Exchange,Currency,Region\nFOO,NYSE,,\nBAR,,USD,US\n");
    }
}

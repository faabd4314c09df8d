//! 标准化 CSV 行读取
//! - 每个单元格去掉首尾空白（以及 UTF-8 BOM）
//! - 去掉行尾的空单元格
//! - 空行保留为空行（规则表用空行分隔规则，行号也依赖它）
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::error::TtResult;

/// 标准化单元格：去 BOM、去首尾空白
pub fn standardize_cell(cell: &str) -> &str {
    cell.trim_start_matches('\u{feff}').trim()
}

/// 读取 CSV 文件为字符串行
pub fn read_standardized_csv(path: impl AsRef<Path>) -> TtResult<Vec<Vec<String>>> {
    let file = fs::File::open(path.as_ref())?;
    read_standardized_csv_from_reader(file)
}

/// 空行不产生 CSV 记录，按记录前跳过的空行补回空行
pub fn read_standardized_csv_from_reader<R: Read>(mut reader: R) -> TtResult<Vec<Vec<String>>> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data.as_slice());

    let mut rows = Vec::new();
    let mut record = csv::StringRecord::new();
    while csv_reader.read_record(&mut record)? {
        // 记录位置是上一条记录结束处，空行尚未跳过
        let start = record.position().map_or(0, |p| p.byte() as usize);
        for _ in 0..skipped_blank_lines(&data, start) {
            rows.push(Vec::new());
        }
        rows.push(standardize_row(record.iter()));
    }
    Ok(rows)
}

/// 从 start 起连续的行结束符个数（\r\n 算一个）
fn skipped_blank_lines(data: &[u8], mut idx: usize) -> usize {
    // 上一条记录以 \r\n 结束时，\n 留在下一条记录之前
    if idx > 0 && data[idx - 1] == b'\r' && data.get(idx) == Some(&b'\n') {
        idx += 1;
    }
    let mut blanks = 0;
    while let Some(&byte) = data.get(idx) {
        match byte {
            b'\n' => blanks += 1,
            b'\r' if data.get(idx + 1) != Some(&b'\n') => blanks += 1,
            b'\r' => {}
            _ => break,
        }
        idx += 1;
    }
    blanks
}

fn standardize_row<'a>(cells: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut row: Vec<String> = cells.map(|c| standardize_cell(c).to_string()).collect();
    while row.last().is_some_and(|c| c.is_empty()) {
        row.pop();
    }
    row
}

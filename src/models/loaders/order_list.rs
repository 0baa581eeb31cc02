//! 订单列表加载
//!
//! 支持三种格式：
//! - 电子表格（`.xlsx` / `.xlsm` / `.xls` / `.ods`），读取第一个工作表
//! - 带表头的分隔文本（`.csv` / `.tsv` / `.txt`），分隔符在 `,` `;` 制表符中自动识别
//! - TOML：`orders = ["SO001", "SO002"]`
//!
//! 表格类输入都按表头找订单号列，取第一个匹配的列。

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info};

use crate::error::InputError;
use crate::models::order::OrderId;

/// 订单号列的表头关键字（不区分大小写）
const COLUMN_KEYWORDS: [&str; 3] = ["service order", "order no", "job no"];

const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Debug, Deserialize)]
struct OrderListFile {
    #[serde(default)]
    orders: Vec<String>,
}

/// 加载订单号列表，保持文件中的顺序（重复的订单号保留）
pub async fn load_identifiers(path: &Path) -> Result<Vec<OrderId>, InputError> {
    if !path.exists() {
        return Err(InputError::NotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    let format_error = |reason: String| InputError::Format {
        path: path.to_path_buf(),
        reason,
    };

    let ids = if SPREADSHEET_EXTENSIONS.contains(&extension.as_str()) {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || parse_spreadsheet(&owned))
            .await
            .map_err(|e| format_error(format!("读取电子表格的任务异常结束: {}", e)))?
            .map_err(format_error)?
    } else {
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| InputError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let parsed = match extension.as_str() {
            "toml" => parse_toml(&content),
            "tsv" => parse_delimited(&content, Some(b'\t')),
            _ => parse_delimited(&content, None),
        };
        parsed.map_err(format_error)?
    };

    if ids.is_empty() {
        return Err(InputError::Empty(path.to_path_buf()));
    }

    info!("✓ 已加载 {} 个订单号: {}", ids.len(), path.display());
    Ok(ids)
}

fn parse_toml(content: &str) -> Result<Vec<OrderId>, String> {
    let file: OrderListFile = toml::from_str(content).map_err(|e| e.to_string())?;
    Ok(file.orders.iter().filter_map(OrderId::new).collect())
}

/// 读取第一个工作表：第一行非空行是表头
fn parse_spreadsheet(path: &Path) -> Result<Vec<OrderId>, String> {
    let mut workbook = open_workbook_auto(path).map_err(|e| format!("无法打开电子表格: {}", e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| "电子表格中没有工作表".to_string())?
        .map_err(|e| format!("读取第一个工作表失败: {}", e))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
    let header = rows
        .by_ref()
        .find(|row| row.iter().any(|cell| !cell.is_empty()))
        .ok_or_else(|| "工作表为空".to_string())?;
    let column = select_column(&header)?;

    Ok(rows
        .filter_map(|row| row.get(column).and_then(OrderId::new))
        .collect())
}

/// 单元格文本；整数值的数字单元格不带小数点
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Int(i) => i.to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn parse_delimited(content: &str, delimiter: Option<u8>) -> Result<Vec<OrderId>, String> {
    let content = content.trim_start_matches('\u{feff}');
    let header_line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| "文件为空".to_string())?;
    let delimiter = delimiter
        .or_else(|| detect_delimiter(header_line))
        .unwrap_or(b',');

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| format!("表头解析失败: {}", e))?
        .iter()
        .map(str::to_string)
        .collect();
    let column = select_column(&header)?;

    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("解析失败: {}", e))?;
        if let Some(id) = record.get(column).and_then(OrderId::new) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// 在表头里出现次数最多的分隔符
fn detect_delimiter(header: &str) -> Option<u8> {
    [b',', b';', b'\t']
        .into_iter()
        .map(|d| (d, header.bytes().filter(|b| *b == d).count()))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(_, count)| *count)
        .map(|(d, _)| d)
}

fn select_column(header: &[String]) -> Result<usize, String> {
    let column = find_order_column(header).ok_or_else(|| {
        format!(
            "找不到订单号列（表头需包含 Service Order / SO / Order No / Job No），实际表头: {}",
            header.join(" | ")
        )
    })?;
    debug!("使用第 {} 列 '{}' 作为订单号", column + 1, header[column]);
    Ok(column)
}

fn find_order_column(columns: &[String]) -> Option<usize> {
    columns.iter().position(|column| {
        let lowered = column.to_lowercase();
        // "SO" 必须是独立的词，避免匹配到 "Reason" 之类的表头
        COLUMN_KEYWORDS.iter().any(|k| lowered.contains(k))
            || lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == "so")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ids(list: &[OrderId]) -> Vec<&str> {
        list.iter().map(|id| id.as_str()).collect()
    }

    #[test]
    fn test_comma_separated_with_order_column() {
        let content = "Customer,Service Order,Amount\nACME, SO001 ,10\nBeta,,5\nGamma,SO002,7\n";
        let parsed = parse_delimited(content, None).unwrap();
        assert_eq!(ids(&parsed), vec!["SO001", "SO002"]);
    }

    #[test]
    fn test_quoted_delimiter_does_not_shift_columns() {
        let content = "Customer,Service Order\n\"Smith, John\",SO001\nACME,SO002\n";
        let parsed = parse_delimited(content, None).unwrap();
        assert_eq!(ids(&parsed), vec!["SO001", "SO002"]);
    }

    #[test]
    fn test_semicolon_and_job_no_header() {
        let content = "\u{feff}\"Job No.\";Status\n\"J-1\";open\nJ-2;closed\nJ-1;open\n";
        let parsed = parse_delimited(content, None).unwrap();
        assert_eq!(ids(&parsed), vec!["J-1", "J-2", "J-1"]);
    }

    #[test]
    fn test_so_must_be_a_whole_word() {
        let columns = vec!["Reason".to_string(), "SO".to_string()];
        assert_eq!(find_order_column(&columns), Some(1));

        let columns = vec!["Reason".to_string(), "Person".to_string()];
        assert_eq!(find_order_column(&columns), None);
        assert!(parse_delimited("Reason,Person\na,b\n", None).is_err());
    }

    #[test]
    fn test_single_column_file() {
        let parsed = parse_delimited("SO\nSO9\n\n SO10 \n", None).unwrap();
        assert_eq!(ids(&parsed), vec!["SO9", "SO10"]);
    }

    #[tokio::test]
    async fn test_load_first_sheet_of_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.xlsx");

        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Customer").unwrap();
        sheet.write_string(0, 1, "Service Order").unwrap();
        sheet.write_string(1, 0, "Smith, John").unwrap();
        sheet.write_string(1, 1, " SO001 ").unwrap();
        sheet.write_string(2, 0, "ACME").unwrap();
        sheet.write_number(3, 0, 7).unwrap();
        sheet.write_number(3, 1, 40213).unwrap();
        workbook.save(&path).unwrap();

        let loaded = load_identifiers(&path).await.unwrap();
        assert_eq!(ids(&loaded), vec!["SO001", "40213"]);
    }

    #[test]
    fn test_numeric_cells_have_no_fraction() {
        assert_eq!(cell_text(&Data::Float(40213.0)), "40213");
        assert_eq!(cell_text(&Data::Float(1.5)), "1.5");
        assert_eq!(cell_text(&Data::String("  SO9 ".into())), "SO9");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[tokio::test]
    async fn test_load_toml_and_errors() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("orders.toml");
        std::fs::write(&toml_path, "orders = [\"SO001\", \"  \", \"SO002\"]\n").unwrap();
        let loaded = load_identifiers(&toml_path).await.unwrap();
        assert_eq!(ids(&loaded), vec!["SO001", "SO002"]);

        let missing = dir.path().join("missing.csv");
        assert!(matches!(
            load_identifiers(&missing).await,
            Err(InputError::NotFound(_))
        ));

        let broken = dir.path().join("orders.xlsx");
        std::fs::write(&broken, b"PK").unwrap();
        assert!(matches!(
            load_identifiers(&broken).await,
            Err(InputError::Format { .. })
        ));

        let empty = dir.path().join("empty.csv");
        let mut file = std::fs::File::create(&empty).unwrap();
        writeln!(file, "Service Order").unwrap();
        writeln!(file, "   ").unwrap();
        assert!(matches!(
            load_identifiers(&empty).await,
            Err(InputError::Empty(_))
        ));
    }
}

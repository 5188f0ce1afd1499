// 歌曲表格读取模块
//
// 支持 CSV（UTF-8，可带 BOM）和 JSON（对象数组）两种输入。
// 表头在这里一次性按同义词表解析成 SongRecord，之后各步骤只接触强类型数据。

use crate::error::{AppError, AppResult};
use crate::models::SongRecord;
use crate::utils::normalize_id;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// 逻辑列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Name,
    Key,
    Tempo,
    Id,
    Gender,
    Artist,
}

/// 逻辑列及其可接受的表头写法（按优先级，区分大小写）
const COLUMN_SYNONYMS: &[(Column, &[&str])] = &[
    (Column::Name, &["歌名", "name"]),
    (Column::Key, &["调号", "key"]),
    (Column::Tempo, &["速度", "bpm", "tempo"]),
    (Column::Id, &["ID", "id"]),
    (Column::Gender, &["性别", "gender", "Gender", "SEX", "sex"]),
    (Column::Artist, &["歌手", "歌手名", "artist"]),
];

const REQUIRED_COLUMNS: &[Column] = &[Column::Name, Column::Key, Column::Tempo];

/// 原始表格：表头 + 数据行
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// 读取歌曲表格
pub fn load_song_table(path: &Path) -> AppResult<Vec<SongRecord>> {
    if !path.exists() {
        return Err(AppError::NotFound(format!("表格文件不存在: {}", path.display())));
    }

    let ext = path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let content = fs::read_to_string(path)?;

    let table = match ext.as_str() {
        "csv" | "txt" => parse_csv_table(&content),
        "json" => parse_json_table(&content)?,
        other => {
            return Err(AppError::InvalidArgument(format!(
                "不支持的表格格式: .{}（请使用 csv 或 json）", other
            )))
        }
    };

    let records = records_from_table(&table)?;
    info!("[TABLE] 读取 {} 首歌曲: {}", records.len(), path.display());
    Ok(records)
}

/// 将原始表格转换为歌曲记录
///
/// 缺少歌名/调号/速度任一列时整体失败；速度无法解析时报告具体行号。
pub fn records_from_table(table: &RawTable) -> AppResult<Vec<SongRecord>> {
    let mut resolved: Vec<(Column, usize)> = Vec::new();
    for (column, synonyms) in COLUMN_SYNONYMS {
        let index = synonyms
            .iter()
            .find_map(|name| table.headers.iter().position(|h| h.trim() == *name));
        if let Some(index) = index {
            debug!("[TABLE] 列 {:?} -> '{}'", column, table.headers[index]);
            resolved.push((*column, index));
        }
    }

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !resolved.iter().any(|(r, _)| r == *c))
        .map(|c| match c {
            Column::Name => "歌名",
            Column::Key => "调号",
            _ => "速度",
        })
        .collect();
    if !missing.is_empty() {
        return Err(AppError::MissingColumns(missing.join("、")));
    }

    let index_of = |column: Column| resolved.iter().find(|(c, _)| *c == column).map(|(_, i)| *i);
    let consumed: Vec<usize> = resolved.iter().map(|(_, i)| *i).collect();

    let mut records = Vec::with_capacity(table.rows.len());
    for (row_idx, row) in table.rows.iter().enumerate() {
        let row_number = row_idx + 1;
        let cell = |column: Column| -> String {
            index_of(column)
                .and_then(|i| row.get(i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let tempo_raw = cell(Column::Tempo);
        let tempo = tempo_raw
            .parse::<f64>()
            .ok()
            .filter(|t| t.is_finite())
            .ok_or_else(|| AppError::InvalidTempo { row: row_number, value: tempo_raw.clone() })?;

        let id = match normalize_id(&cell(Column::Id)) {
            id if id.is_empty() => row_number.to_string(),
            id => id,
        };

        let extra = table.headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !consumed.contains(i))
            .map(|(i, header)| {
                (header.trim().to_string(), row.get(i).map(|v| v.trim().to_string()).unwrap_or_default())
            })
            .collect();

        records.push(SongRecord {
            id,
            name: cell(Column::Name),
            artist: cell(Column::Artist),
            key: cell(Column::Key),
            tempo,
            gender: cell(Column::Gender),
            extra,
        });
    }

    Ok(records)
}

/// 解析 CSV 表格，首行为表头，全空行跳过
pub fn parse_csv_table(content: &str) -> RawTable {
    let mut rows = parse_csv(content.trim_start_matches('\u{feff}'));
    if rows.is_empty() {
        return RawTable::default();
    }
    let headers = rows.remove(0);
    rows.retain(|row| row.iter().any(|cell| !cell.trim().is_empty()));
    RawTable { headers, rows }
}

/// 解析 JSON 表格：对象数组，表头按首次出现的顺序收集
pub fn parse_json_table(content: &str) -> AppResult<RawTable> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let items = value
        .as_array()
        .ok_or_else(|| AppError::InvalidArgument("JSON 表格必须是对象数组".to_string()))?;

    let mut headers: Vec<String> = Vec::new();
    for item in items {
        if let Some(obj) = item.as_object() {
            for key in obj.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
    }

    let rows = items
        .iter()
        .filter_map(|item| item.as_object())
        .map(|obj| {
            headers
                .iter()
                .map(|h| match obj.get(h) {
                    None | Some(serde_json::Value::Null) => String::new(),
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                })
                .collect()
        })
        .collect();

    Ok(RawTable { headers, rows })
}

/// RFC 4180 风格的 CSV 解析（支持引号、转义引号、字段内换行）
pub fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}

/// CSV 字段转义
pub fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows.iter().map(|r| r.iter().map(|s| s.to_string()).collect()).collect(),
        }
    }

    #[test]
    fn test_parse_csv_quoting() {
        let rows = parse_csv("a,b,c\r\n1,\"x,y\",\"say \"\"hi\"\"\"\n2,\"multi\nline\",\n");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["1", "x,y", "say \"hi\""]);
        assert_eq!(rows[2], vec!["2", "multi\nline", ""]);
    }

    #[test]
    fn test_parse_csv_without_trailing_newline() {
        let rows = parse_csv("a,b\n1,2");
        assert_eq!(rows, vec![vec!["a", "b"], vec!["1", "2"]]);
    }

    #[test]
    fn test_csv_table_strips_bom_and_blank_rows() {
        let t = parse_csv_table("\u{feff}歌名,调号,速度\n晴天,C,120\n,,\n");
        assert_eq!(t.headers, vec!["歌名", "调号", "速度"]);
        assert_eq!(t.rows.len(), 1);
    }

    #[test]
    fn test_chinese_headers_and_synonyms() {
        let t = table(
            &["ID", "歌名", "歌手名", "调号", "速度", "性别", "Chord Ai"],
            &[&["12.0", "晴天", "周杰伦", "G", "69", "男", "G-D-Em"]],
        );
        let records = records_from_table(&t).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.id, "12");
        assert_eq!(r.name, "晴天");
        assert_eq!(r.artist, "周杰伦");
        assert_eq!(r.key, "G");
        assert_eq!(r.tempo, 69.0);
        assert_eq!(r.gender, "男");
        assert_eq!(r.extra_value("Chord Ai"), "G-D-Em");
    }

    #[test]
    fn test_english_headers_and_default_id() {
        let t = table(
            &["name", "key", "bpm", "Gender"],
            &[&["a", "C", "120", " F "], &["b", "D", "122", "f"]],
        );
        let records = records_from_table(&t).unwrap();
        assert_eq!(records[0].id, "1");
        assert_eq!(records[1].id, "2");
        assert_eq!(records[0].gender_normalized(), "f");
        assert_eq!(records[0].gender_normalized(), records[1].gender_normalized());
    }

    #[test]
    fn test_header_synonyms_are_case_sensitive() {
        let t = table(&["Name", "key", "bpm"], &[&["a", "C", "120"]]);
        assert!(matches!(records_from_table(&t), Err(AppError::MissingColumns(_))));
    }

    #[test]
    fn test_missing_required_columns() {
        let t = table(&["歌名", "调号"], &[&["a", "C"]]);
        match records_from_table(&t) {
            Err(AppError::MissingColumns(cols)) => assert_eq!(cols, "速度"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_tempo_reports_row() {
        let t = table(&["name", "key", "bpm"], &[&["a", "C", "120"], &["b", "D", "fast"]]);
        match records_from_table(&t) {
            Err(AppError::InvalidTempo { row, value }) => {
                assert_eq!(row, 2);
                assert_eq!(value, "fast");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_json_table() {
        let json = r#"[
            {"id": 1, "name": "a", "key": "C", "tempo": 120, "gender": "f"},
            {"id": 2, "name": "b", "key": 2, "tempo": 122.5, "gender": null}
        ]"#;
        let t = parse_json_table(json).unwrap();
        let records = records_from_table(&t).unwrap();
        assert_eq!(records[1].id, "2");
        assert_eq!(records[1].key, "2");
        assert_eq!(records[1].tempo, 122.5);
        assert_eq!(records[1].gender, "");
    }

    #[test]
    fn test_load_song_table_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs.csv");
        fs::write(&path, "ID,歌名,调号,速度,性别\n1,a,C,120,女\n2,b,D,122,女\n").unwrap();
        let records = load_song_table(&path).unwrap();
        assert_eq!(records.len(), 2);

        let bad = dir.path().join("songs.xlsx");
        fs::write(&bad, "").unwrap();
        assert!(matches!(load_song_table(&bad), Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}

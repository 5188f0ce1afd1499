// 分类结果工作簿
//
// 歌曲分类的结果以 SQLite 文件保存，作为三个步骤之间的交接表格：
// 每个分类组一个 sheet，sheet 内按「锚定行、匹配行」成对排列，两行共享同一个成品名。

use rusqlite::{Connection, params};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use chrono::Local;
use tracing::{info, warn};
use crate::error::{AppError, AppResult};
use crate::models::{CompatibilityGroup, Pair, SongRecord};
use crate::music::key::{number_to_key, parse_key};
use crate::pipeline::grouper;
use crate::table::csv_escape;

/// sheet 名称最大长度（与常见表格软件保持一致）
const MAX_SHEET_NAME_LEN: usize = 31;

/// 导出 CSV 时保留的透传列
const PASSTHROUGH_COLUMNS: &[&str] = &["Chord Ai", "副歌开始时间", "副歌结束时间", "段落剪切时间"];

const ROLE_ANCHOR: &str = "anchor";
const ROLE_MATCH: &str = "match";

/// 分类结果工作簿
pub struct Workbook {
    conn: Connection,
}

impl Workbook {
    /// 创建新的工作簿（已存在的同名文件会被清空）
    pub fn create(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let workbook = Self { conn: Connection::open(path)? };
        workbook.init_schema()?;
        workbook.clear_all_data()?;
        Ok(workbook)
    }

    /// 打开已有的工作簿
    pub fn open(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::NotFound(format!("分类表格不存在: {}", path.display())));
        }
        let workbook = Self { conn: Connection::open(path)? };
        workbook.init_schema()?;
        Ok(workbook)
    }

    fn init_schema(&self) -> AppResult<()> {
        // 创建 sheet 表
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS sheets (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                anchor_id TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
            )",
            [],
        )?;

        // 创建行表
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sheet_id INTEGER NOT NULL,
                pair_index INTEGER NOT NULL,
                role TEXT NOT NULL,
                song_id TEXT NOT NULL,
                name TEXT NOT NULL,
                artist TEXT NOT NULL DEFAULT '',
                song_key TEXT NOT NULL,
                tempo REAL NOT NULL,
                gender TEXT NOT NULL DEFAULT '',
                extra TEXT NOT NULL DEFAULT '[]',
                product_name TEXT NOT NULL,
                FOREIGN KEY (sheet_id) REFERENCES sheets(id) ON DELETE CASCADE
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rows_sheet ON rows(sheet_id, pair_index)",
            [],
        )?;

        // 元信息（来源表格、分类参数）
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// 清空所有数据
    pub fn clear_all_data(&self) -> AppResult<()> {
        self.conn.execute("DELETE FROM rows", [])?;
        self.conn.execute("DELETE FROM sheets", [])?;
        self.conn.execute("DELETE FROM meta", [])?;
        Ok(())
    }

    /// 写入元信息
    pub fn set_meta(&self, key: &str, value: &str) -> AppResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取元信息
    pub fn get_meta(&self, key: &str) -> AppResult<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM meta WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// 写入分类组，返回按 sheet 顺序展开的配对
    ///
    /// 所有行在同一事务内写入，任一行失败则整体回滚。
    pub fn save_groups(&mut self, groups: &[CompatibilityGroup]) -> AppResult<Vec<Pair>> {
        let mut used_sheet_names: HashSet<String> = HashSet::new();
        let mut all_pairs = Vec::new();
        let mut pair_seq = 0usize;

        let tx = self.conn.transaction()?;
        for (group_idx, group) in groups.iter().enumerate() {
            let sheet_name = unique_sheet_name(&group.anchor.name, group_idx + 1, &mut used_sheet_names);
            tx.execute(
                "INSERT INTO sheets (id, name, anchor_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    (group_idx + 1) as i64,
                    sheet_name,
                    group.anchor.id,
                    Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                ],
            )?;

            let pairs = grouper::group_pairs(group, &mut pair_seq);
            for (pair_index, pair) in pairs.iter().enumerate() {
                for (role, song) in [(ROLE_ANCHOR, &pair.anchor), (ROLE_MATCH, &pair.matched)] {
                    tx.execute(
                        "INSERT INTO rows (sheet_id, pair_index, role, song_id, name, artist, song_key, tempo, gender, extra, product_name)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                        params![
                            (group_idx + 1) as i64,
                            pair_index as i64,
                            role,
                            song.id,
                            song.name,
                            song.artist,
                            song.key,
                            song.tempo,
                            song.gender,
                            serde_json::to_string(&song.extra)?,
                            pair.product_name,
                        ],
                    )?;
                }
            }
            all_pairs.extend(pairs);
        }
        tx.commit()?;

        info!("[WORKBOOK] 写入 {} 个分类、{} 个配对", groups.len(), all_pairs.len());
        Ok(all_pairs)
    }

    /// 所有 sheet 名称（按写入顺序）
    pub fn sheet_names(&self) -> AppResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM sheets ORDER BY id")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// 按 sheet、配对顺序读回所有配对
    ///
    /// 缺少锚定行或匹配行的配对会被跳过并记录警告。
    pub fn read_pairs(&self) -> AppResult<Vec<Pair>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.name, r.pair_index, r.role, r.song_id, r.name, r.artist, r.song_key, r.tempo, r.gender, r.extra, r.product_name
             FROM rows r JOIN sheets s ON r.sheet_id = s.id
             ORDER BY r.sheet_id, r.pair_index, CASE r.role WHEN 'anchor' THEN 0 ELSE 1 END, r.id",
        )?;

        let rows = stmt.query_map([], |row| {
            let extra: String = row.get(9)?;
            let workbook_row = WorkbookRow {
                sheet: row.get(0)?,
                pair_index: row.get(1)?,
                role: row.get(2)?,
                song: SongRecord {
                    id: row.get(3)?,
                    name: row.get(4)?,
                    artist: row.get(5)?,
                    key: row.get(6)?,
                    tempo: row.get(7)?,
                    gender: row.get(8)?,
                    extra: Vec::new(),
                },
                product_name: row.get(10)?,
            };
            Ok((workbook_row, extra))
        })?;

        let mut pairs = Vec::new();
        let mut pending_anchor: Option<WorkbookRow> = None;
        for row in rows {
            let (mut row, extra) = row?;
            row.song.extra = parse_extra(&extra)?;
            if row.role == ROLE_ANCHOR {
                if let Some(orphan) = pending_anchor.take() {
                    warn!("[WORKBOOK] Sheet '{}' 第 {} 组缺少匹配行，跳过", orphan.sheet, orphan.pair_index + 1);
                }
                pending_anchor = Some(row);
                continue;
            }

            match pending_anchor.take() {
                Some(anchor) if anchor.sheet == row.sheet && anchor.pair_index == row.pair_index => {
                    pairs.push(Pair {
                        anchor: anchor.song,
                        matched: row.song,
                        product_name: row.product_name,
                    });
                }
                _ => {
                    warn!("[WORKBOOK] Sheet '{}' 第 {} 组缺少锚定行，跳过", row.sheet, row.pair_index + 1);
                }
            }
        }
        if let Some(orphan) = pending_anchor {
            warn!("[WORKBOOK] Sheet '{}' 第 {} 组缺少匹配行，跳过", orphan.sheet, orphan.pair_index + 1);
        }

        Ok(pairs)
    }

    /// 导出为 CSV，便于人工查看
    pub fn export_csv(&self, path: &Path) -> AppResult<()> {
        let mut stmt = self.conn.prepare(
            "SELECT s.name, r.song_id, r.name, r.artist, r.song_key, r.tempo, r.gender, r.extra, r.product_name
             FROM rows r JOIN sheets s ON r.sheet_id = s.id
             ORDER BY r.sheet_id, r.pair_index, CASE r.role WHEN 'anchor' THEN 0 ELSE 1 END, r.id",
        )?;

        let mut header = vec!["Sheet", "ID", "歌名", "歌手"];
        header.extend_from_slice(PASSTHROUGH_COLUMNS);
        header.extend_from_slice(&["调号", "标准调号", "速度", "性别", "成品名"]);
        let mut output = String::new();
        output.push_str(&header.join(","));
        output.push('\n');

        let rows = stmt.query_map([], |row| {
            let extra_json: String = row.get(7)?;
            let song = SongRecord {
                id: row.get(1)?,
                name: row.get(2)?,
                artist: row.get(3)?,
                key: row.get(4)?,
                tempo: row.get(5)?,
                gender: row.get(6)?,
                extra: Vec::new(),
            };
            let sheet: String = row.get(0)?;
            let product_name: String = row.get(8)?;
            Ok((sheet, song, product_name, extra_json))
        })?;

        for row in rows {
            let (sheet, mut song, product_name, extra_json) = row?;
            song.extra = parse_extra(&extra_json)?;
            let mut cells = vec![
                csv_escape(&sheet),
                csv_escape(&song.id),
                csv_escape(&song.name),
                csv_escape(&song.artist),
            ];
            cells.extend(PASSTHROUGH_COLUMNS.iter().map(|c| csv_escape(song.extra_value(c))));
            cells.push(csv_escape(&song.key));
            cells.push(parse_key(&song.key).map(number_to_key).unwrap_or_default().to_string());
            cells.push(song.tempo.to_string());
            cells.push(csv_escape(&song.gender));
            cells.push(csv_escape(&product_name));
            output.push_str(&cells.join(","));
            output.push('\n');
        }

        fs::write(path, output)?;
        info!("[WORKBOOK] 已导出 CSV: {}", path.display());
        Ok(())
    }
}

struct WorkbookRow {
    sheet: String,
    pair_index: i64,
    role: String,
    song: SongRecord,
    product_name: String,
}

/// 生成 sheet 名称：锚定歌名去掉非法字符，截断到 31 个字符，与已有名称重复时追加 `_n`
fn unique_sheet_name(anchor_name: &str, group_num: usize, used: &mut HashSet<String>) -> String {
    let cleaned: String = anchor_name
        .trim()
        .chars()
        .map(|c| if "[]:*?/\\".contains(c) { '-' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    let base: String = if cleaned.is_empty() {
        format!("Group{}", group_num)
    } else {
        cleaned.chars().take(MAX_SHEET_NAME_LEN).collect()
    };

    if used.insert(base.clone()) {
        return base;
    }

    // 原名本身也可能带 `_n`，逐个尝试直到没有冲突
    let mut n = 1usize;
    loop {
        let suffix = format!("_{}", n);
        let available = MAX_SHEET_NAME_LEN - suffix.chars().count();
        let candidate = format!("{}{}", base.chars().take(available).collect::<String>(), suffix);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// 解析透传列 JSON
fn parse_extra(raw: &str) -> AppResult<Vec<(String, String)>> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: &str, name: &str, key: &str, tempo: f64) -> SongRecord {
        SongRecord {
            id: id.to_string(),
            name: name.to_string(),
            artist: String::new(),
            key: key.to_string(),
            tempo,
            gender: "女".to_string(),
            extra: vec![("Chord Ai".to_string(), "C-G".to_string())],
        }
    }

    fn sample_groups() -> Vec<CompatibilityGroup> {
        vec![
            CompatibilityGroup {
                anchor: song("1", "晴天", "C", 120.0),
                matches: vec![song("2", "七里香", "D", 122.0), song("3", "稻香", "Bb", 118.0)],
            },
            CompatibilityGroup {
                anchor: song("4", "晴天", "E", 90.0),
                matches: vec![song("5", "夜曲", "F", 92.0)],
            },
        ]
    }

    #[test]
    fn test_save_and_read_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classified.db");

        let mut workbook = Workbook::create(&path).unwrap();
        let saved = workbook.save_groups(&sample_groups()).unwrap();
        assert_eq!(saved.len(), 3);
        drop(workbook);

        let workbook = Workbook::open(&path).unwrap();
        let pairs = workbook.read_pairs().unwrap();
        assert_eq!(pairs, saved);
        assert_eq!(pairs[0].anchor.id, "1");
        assert_eq!(pairs[0].matched.id, "2");
        assert_eq!(pairs[1].matched.id, "3");
        assert_eq!(pairs[2].product_name, "4-5-晴天+夜曲");
        assert_eq!(pairs[0].matched.extra_value("Chord Ai"), "C-G");
    }

    #[test]
    fn test_duplicate_sheet_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::create(&dir.path().join("wb.db")).unwrap();
        workbook.save_groups(&sample_groups()).unwrap();
        assert_eq!(workbook.sheet_names().unwrap(), vec!["晴天", "晴天_1"]);
    }

    #[test]
    fn test_create_clears_previous_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wb.db");
        let mut workbook = Workbook::create(&path).unwrap();
        workbook.save_groups(&sample_groups()).unwrap();
        drop(workbook);

        let workbook = Workbook::create(&path).unwrap();
        assert!(workbook.read_pairs().unwrap().is_empty());
    }

    #[test]
    fn test_open_missing_workbook() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Workbook::open(&dir.path().join("missing.db")),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_meta_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let workbook = Workbook::create(&dir.path().join("wb.db")).unwrap();
        workbook.set_meta("key_range", "2").unwrap();
        assert_eq!(workbook.get_meta("key_range").unwrap().as_deref(), Some("2"));
        assert_eq!(workbook.get_meta("missing").unwrap(), None);
    }

    #[test]
    fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::create(&dir.path().join("wb.db")).unwrap();
        workbook.save_groups(&sample_groups()).unwrap();
        let csv_path = dir.path().join("wb.csv");
        workbook.export_csv(&csv_path).unwrap();

        let content = fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].starts_with("Sheet,ID,歌名,歌手,Chord Ai"));
        assert!(lines[1].starts_with("晴天,1,晴天,,C-G"));
        assert!(lines[1].ends_with("1-2-晴天+七里香"));
        assert!(lines[2].ends_with("1-2-晴天+七里香"));
        assert!(lines[4].contains(",Bb,A#,118,"));
    }

    #[test]
    fn test_sheet_name_that_looks_like_a_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::create(&dir.path().join("wb.db")).unwrap();
        let groups: Vec<CompatibilityGroup> = [("1", "晴天"), ("3", "晴天"), ("5", "晴天_1")]
            .iter()
            .map(|(id, name)| CompatibilityGroup {
                anchor: song(id, name, "C", 120.0),
                matches: vec![song("9", "夜曲", "C", 120.0)],
            })
            .collect();

        let pairs = workbook.save_groups(&groups).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(workbook.sheet_names().unwrap(), vec!["晴天", "晴天_1", "晴天_1_1"]);
        assert_eq!(workbook.read_pairs().unwrap(), pairs);
    }

    #[test]
    fn test_corrupt_passthrough_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::create(&dir.path().join("wb.db")).unwrap();
        workbook.save_groups(&sample_groups()).unwrap();
        workbook.conn.execute("UPDATE rows SET extra = 'not json' WHERE id = 1", []).unwrap();

        assert!(matches!(workbook.read_pairs(), Err(AppError::Json(_))));
        assert!(matches!(
            workbook.export_csv(&dir.path().join("wb.csv")),
            Err(AppError::Json(_))
        ));
    }

    #[test]
    fn test_unique_sheet_name() {
        let mut used = HashSet::new();
        assert_eq!(unique_sheet_name("a/b", 1, &mut used), "a-b");
        assert_eq!(unique_sheet_name("", 2, &mut used), "Group2");
        let long = "x".repeat(40);
        assert_eq!(unique_sheet_name(&long, 3, &mut used).chars().count(), 31);
        let second = unique_sheet_name(&long, 4, &mut used);
        assert_eq!(second.chars().count(), 31);
        assert!(second.ends_with("_1"));
    }
}

// 调号与音级换算
//
// 音级 (pitch class) 为 0-11 的整数，C=0。表格中的调号既可能是字母写法（C#、Eb、Am），
// 也可能直接是数字。

use crate::error::{AppError, AppResult};
use regex::Regex;

lazy_static::lazy_static! {
    // 大小调后缀，例如 Am、C major、Dm7
    static ref MODE_SUFFIX: Regex =
        Regex::new(r"(?i)\s*(minor|major|min|maj|m11|m9|m7|m)\s*$").unwrap();
}

/// 数字到字母调号的映射
const NUM_TO_KEY: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// 解析调号为音级，无法识别时返回 None
pub fn parse_key(raw: &str) -> Option<u8> {
    let key_str = raw.trim();
    if key_str.is_empty() {
        return None;
    }

    // 数字写法，直接取模
    if let Ok(num) = key_str.parse::<f64>() {
        if !num.is_finite() {
            return None;
        }
        return Some((num.trunc() as i64).rem_euclid(12) as u8);
    }

    let key_str = MODE_SUFFIX.replace(key_str, "");
    let mut chars = key_str.trim().chars();

    let base: i32 = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let accidental: i32 = match (chars.next(), chars.next()) {
        (None, _) => 0,
        (Some('#' | '♯'), None) => 1,
        (Some('b' | 'B' | '♭'), None) => -1,
        _ => return None,
    };

    Some((base + accidental).rem_euclid(12) as u8)
}

/// 解析调号，失败时返回 `UnresolvableKey`
pub fn resolve_key(raw: &str) -> AppResult<u8> {
    parse_key(raw).ok_or_else(|| AppError::UnresolvableKey(raw.trim().to_string()))
}

/// 将音级转换为字母调号
pub fn number_to_key(pitch_class: u8) -> &'static str {
    NUM_TO_KEY[(pitch_class % 12) as usize]
}

/// 两个音级在圆周上的距离，范围 0-6
pub fn circular_distance(p: u8, q: u8) -> u8 {
    let diff = (p as i32 - q as i32).unsigned_abs() % 12;
    diff.min(12 - diff) as u8
}

/// 将半音差规范到 [-6, 6]，保持模 12 同余
pub fn normalize_shift(diff: i32) -> i32 {
    if (-6..=6).contains(&diff) {
        return diff;
    }
    let wrapped = diff.rem_euclid(12);
    if wrapped > 6 {
        wrapped - 12
    } else {
        wrapped
    }
}

/// 计算把 source 调移到 target 调所需的半音数（有方向）
pub fn semitone_shift(source_key: &str, target_key: &str) -> AppResult<i32> {
    let source = resolve_key(source_key)?;
    let target = resolve_key(target_key)?;
    Ok(normalize_shift(target as i32 - source as i32))
}

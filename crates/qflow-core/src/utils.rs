//! 通用工具函数

use crate::models::TicketId;
use regex::Regex;
use std::sync::OnceLock;

/// 按空白拆分完整姓名为 (名, 中间名, 姓)
///
/// 一个词只有名；两个词为名和姓；更多时中间部分合并为中间名。
pub fn split_full_name(full: &str) -> (String, String, String) {
    let parts: Vec<&str> = full.split_whitespace().collect();
    match parts.as_slice() {
        [] => (String::new(), String::new(), String::new()),
        [first] => (first.to_string(), String::new(), String::new()),
        [first, surname] => (first.to_string(), String::new(), surname.to_string()),
        [first, middle @ .., surname] => (
            first.to_string(),
            middle.join(" "),
            surname.to_string(),
        ),
    }
}

/// 由排队票序号生成票号，序号唯一则票号唯一
pub fn format_ticket_code(prefix: &str, id: TicketId) -> String {
    format!("{}{:05}", prefix, id)
}

/// 校验血压格式，例如 "120/80"
pub fn is_valid_blood_pressure(bp: &str) -> bool {
    static BP_PATTERN: OnceLock<Regex> = OnceLock::new();
    BP_PATTERN
        .get_or_init(|| Regex::new(r"^\d{2,3}/\d{2,3}$").expect("static pattern"))
        .is_match(bp)
}

//! 题号归一化 - 业务能力层
//!
//! 把页面上各种写法的题号统一成整数：
//! 阿拉伯数字、全角数字、中文数字，以及 "(5)"、"【5】"、"Q5"、
//! "第5题"、"五、" 等带前后缀的形式。

use std::sync::OnceLock;

use phf::phf_map;
use regex::Regex;

/// 中文数字表
static CN_NUMERALS: phf::Map<char, u32> = phf_map! {
    '〇' => 0,
    '零' => 0,
    '一' => 1,
    '二' => 2,
    '两' => 2,
    '三' => 3,
    '四' => 4,
    '五' => 5,
    '六' => 6,
    '七' => 7,
    '八' => 8,
    '九' => 9,
};

static LEADING_NUMBER: OnceLock<Regex> = OnceLock::new();

fn leading_number_pattern() -> &'static Regex {
    LEADING_NUMBER.get_or_init(|| {
        Regex::new(
            r"^\s*(?:第)?\s*(?:[Qq]|[Nn][Oo]\.?)?\s*[\(（\[【]?\s*([0-9０-９]+|[〇零一二三四五六七八九十两]+)",
        )
        .expect("题号正则不合法")
    })
}

/// 提取并归一化题号开头的序号
///
/// 无法识别时返回 None（例如纯文字标题）。
pub fn normalize_question_number(raw: &str) -> Option<u32> {
    let caps = leading_number_pattern().captures(raw)?;
    let token = caps.get(1)?.as_str();

    if token.chars().any(|c| CN_NUMERALS.contains_key(&c) || c == '十') {
        parse_chinese_numeral(token)
    } else {
        parse_digits(token)
    }
}

/// 解析阿拉伯数字（含全角）
fn parse_digits(token: &str) -> Option<u32> {
    token.chars().try_fold(0u32, |acc, c| {
        let digit = digit_value(c)?;
        acc.checked_mul(10)?.checked_add(digit)
    })
}

fn digit_value(c: char) -> Option<u32> {
    if c.is_ascii_digit() {
        return Some(c as u32 - '0' as u32);
    }
    // 全角数字 ０-９
    let code = c as u32;
    if ('０' as u32..='９' as u32).contains(&code) {
        return Some(code - '０' as u32);
    }
    None
}

/// 解析中文数字（支持到 99，覆盖试卷题号的实际范围）
fn parse_chinese_numeral(token: &str) -> Option<u32> {
    let chars: Vec<char> = token.chars().collect();

    if let Some(pos) = chars.iter().position(|&c| c == '十') {
        // X十Y 形式：十五、二十、二十三
        let tens = if pos == 0 {
            1
        } else if pos == 1 {
            *CN_NUMERALS.get(&chars[0])?
        } else {
            return None;
        };
        let units = match chars.len() - pos - 1 {
            0 => 0,
            1 => *CN_NUMERALS.get(&chars[pos + 1])?,
            _ => return None,
        };
        return Some(tens * 10 + units);
    }

    // 单字形式
    if chars.len() == 1 {
        return CN_NUMERALS.get(&chars[0]).copied();
    }

    None
}

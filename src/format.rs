use std::sync::OnceLock;

use anyhow::{bail, Result};
use regex::Regex;

/// How a routed message is rendered before it is sent to the targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStyle {
    /// Condensed bank SMS summary
    Summary,
    /// Original text under a "자동전달" header
    Header,
}

impl MessageStyle {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "summary" => Ok(Self::Summary),
            "header" => Ok(Self::Header),
            other => bail!("unknown message style: {}", other),
        }
    }

    pub fn render(&self, text: &str, chat_title: Option<&str>) -> String {
        match self {
            Self::Summary => format_summary(text),
            Self::Header => format_header(text, chat_title),
        }
    }
}

pub fn format_header(text: &str, chat_title: Option<&str>) -> String {
    match chat_title.filter(|t| !t.is_empty()) {
        Some(title) => format!("자동전달 ({})\n{}", title, text),
        None => format!("자동전달\n{}", text),
    }
}

struct Patterns {
    sender_number: Regex,
    web_origin: Regex,
    sender_label: Regex,
    kakao_label: Regex,
    kakao: Regex,
    date: Regex,
    bank: Regex,
    parenthesized: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        sender_number: Regex::new(r"^\d{7,}$").unwrap(),
        web_origin: Regex::new(r"(?i)^\[?Web발신\]?$").unwrap(),
        sender_label: Regex::new(r"^보낸사람\s*:").unwrap(),
        kakao_label: Regex::new(r"(?i)^\[?카카오뱅크\]?$").unwrap(),
        kakao: Regex::new(r"(?i)카카오뱅크").unwrap(),
        date: Regex::new(r"\d{2}/\d{2}\s+\d{2}:\d{2}").unwrap(),
        bank: Regex::new(r"(?i)신한|kb|국민|농협|우리|ibk|하나|기업").unwrap(),
        parenthesized: Regex::new(r"\(.+\)").unwrap(),
    })
}

fn is_deposit(line: &str) -> bool {
    line.contains("입금")
}

/// Unit ("호") or building phase ("차") mention
fn mentions_unit(line: &str) -> bool {
    line.contains('호') || line.contains('차')
}

fn is_noise(p: &Patterns, line: &str) -> bool {
    p.sender_number.is_match(line)
        || p.web_origin.is_match(line)
        || p.sender_label.is_match(line)
        || p.kakao_label.is_match(line)
}

/// Condenses a forwarded bank SMS into date, amount and depositor lines.
///
/// KakaoBank notices lead with the depositor name; other banks lead with
/// the bank/date line. Text with nothing recognizable is returned as is.
pub fn format_summary(raw: &str) -> String {
    let p = patterns();

    let lines: Vec<&str> = raw.lines().map(str::trim).filter(|s| !s.is_empty()).collect();
    let cleaned: Vec<&str> = lines.iter().copied().filter(|s| !is_noise(p, s)).collect();

    let is_kakao = lines.iter().any(|s| p.kakao.is_match(s));

    let bank_date_line = cleaned
        .iter()
        .copied()
        .find(|s| p.date.is_match(s) && p.bank.is_match(s));
    let date_line = cleaned.iter().copied().find(|s| p.date.is_match(s));
    let deposit_idx = cleaned.iter().position(|s| is_deposit(s));
    let deposit_line = deposit_idx.map(|i| cleaned[i]);

    let name_line = cleaned
        .iter()
        .copied()
        .find(|s| (p.parenthesized.is_match(s) || mentions_unit(s)) && !is_deposit(s));

    let not_name = |s: &&str| Some(*s) != name_line;

    let extra_line = cleaned
        .iter()
        .copied()
        .filter(not_name)
        .find(|s| !is_deposit(s) && mentions_unit(s))
        .or_else(|| {
            let idx = deposit_idx?;
            cleaned[idx + 1..]
                .iter()
                .copied()
                .filter(not_name)
                .find(|s| !is_deposit(s))
        });

    let ordered = if is_kakao {
        [name_line, date_line, deposit_line, extra_line]
    } else {
        [bank_date_line.or(date_line), deposit_line, name_line, extra_line]
    };

    let out: Vec<&str> = ordered.into_iter().flatten().collect();
    if out.is_empty() {
        raw.to_string()
    } else {
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shinhan_notice_keeps_bank_date_first() {
        let sms = "[Web발신]\n신한08/20 18:52\n입금 300,000\n잔액 1,234,567\n박민수(스튜디오다)";
        assert_eq!(
            format_summary(sms),
            "신한08/20 18:52\n입금 300,000\n박민수(스튜디오다)\n잔액 1,234,567"
        );
    }

    #[test]
    fn kb_notice_with_unit_number() {
        let sms = "15881688\r\n[Web발신]\r\n[KB]08/20 20:17\r\n110-***-038170\r\n김도연204호\r\n입금\r\n500,000\r\n잔액1,000,000";
        assert_eq!(
            format_summary(sms),
            "[KB]08/20 20:17\n입금\n김도연204호\n500,000"
        );
    }

    #[test]
    fn kakaobank_notice_leads_with_name() {
        let sms = "[카카오뱅크]\n문*영(6825)\n08/21 09:15\n입금 1,000,000원\n3차 802호\n잔액 5,000,000원";
        assert_eq!(
            format_summary(sms),
            "문*영(6825)\n08/21 09:15\n입금 1,000,000원\n3차 802호"
        );
    }

    #[test]
    fn kakaobank_falls_back_to_line_after_deposit() {
        let sms = "보낸사람 : 카카오뱅크\n카카오뱅크 08/22 11:02\n입금 70,000원\n홍길동\n잔액 90,000원";
        assert_eq!(
            format_summary(sms),
            "카카오뱅크 08/22 11:02\n입금 70,000원\n홍길동"
        );
    }

    #[test]
    fn unrecognized_text_is_returned_unchanged() {
        assert_eq!(format_summary("  hello there  "), "  hello there  ");
        assert_eq!(format_summary("[Web발신]\n01012345678"), "[Web발신]\n01012345678");
    }

    #[test]
    fn header_style_names_the_source_chat() {
        assert_eq!(format_header("입금 1,000", Some("자동메세지 시스템")), "자동전달 (자동메세지 시스템)\n입금 1,000");
        assert_eq!(format_header("입금 1,000", None), "자동전달\n입금 1,000");
        assert_eq!(
            MessageStyle::Header.render("x", Some("")),
            "자동전달\nx"
        );
    }

    #[test]
    fn parses_style_names() {
        assert_eq!(MessageStyle::parse("Summary").unwrap(), MessageStyle::Summary);
        assert_eq!(MessageStyle::parse(" header ").unwrap(), MessageStyle::Header);
        assert!(MessageStyle::parse("fancy").is_err());
    }
}

use std::path::Path;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

/// Source chat: "자동메세지 시스템"
pub const SOURCE_CHAT_ID: i64 = -1002552721308;

/// Target chats known to the built-in presets
pub mod targets {
    /// 독산동 계약서 관리비 확인방
    pub const DOKSAN: i64 = -4786506925;
    /// 종로1차
    pub const JONGNO1: i64 = -4787323606;
    /// 종로2차
    pub const JONGNO2: i64 = -4698985829;
    /// 종로3차
    pub const JONGNO3: i64 = -4651498378;
    /// 도곡동입금관리비방
    pub const DOGOK: i64 = -1002723031579;
    /// 종로 입금확인방
    pub const JONGNO_DEPOSIT: i64 = -4940765825;
}

pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Deposits only; anything mentioning a withdrawal is dropped
pub fn should_forward(text: &str) -> bool {
    text.contains("입금") && !text.contains("출금")
}

#[derive(Debug, Clone)]
pub struct Rule {
    keywords: Vec<String>,
    patterns: Vec<Regex>,
    targets: Vec<i64>,
}

impl Rule {
    pub fn keywords(keywords: &[&str], targets: &[i64]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| normalize(k)).collect(),
            patterns: Vec::new(),
            targets: targets.to_vec(),
        }
    }

    /// `norm` is the normalized message, `raw` the original one
    fn hits(&self, norm: &str, raw: &str) -> bool {
        self.keywords.iter().any(|k| norm.contains(k.as_str()))
            || self.patterns.iter().any(|p| p.is_match(raw))
    }

    pub fn targets(&self) -> &[i64] {
        &self.targets
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    patterns: Vec<String>,
    targets: Vec<i64>,
}

impl TryFrom<RuleFile> for Rule {
    type Error = anyhow::Error;

    fn try_from(raw: RuleFile) -> Result<Self> {
        if raw.keywords.iter().any(|k| k.trim().is_empty()) {
            bail!("route keywords must not be blank (targets {:?})", raw.targets);
        }

        let patterns = raw
            .patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid route pattern {:?}", p)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            keywords: raw.keywords.iter().map(|k| normalize(k)).collect(),
            patterns,
            targets: raw.targets,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TableFile {
    #[serde(default)]
    deposit_only: bool,
    #[serde(default)]
    exclusive: Vec<RuleFile>,
    #[serde(default)]
    additive: Vec<RuleFile>,
}

/// Decides which target chats receive a message.
///
/// Exclusive rules win outright: when any of them hits, only their targets
/// are used. Otherwise every hitting additive rule contributes its targets.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    pub deposit_only: bool,
    pub exclusive: Vec<Rule>,
    pub additive: Vec<Rule>,
}

impl RoutingTable {
    /// Account-fragment table: deposits only, exclusive owners first
    pub fn accounts() -> Self {
        use targets::*;

        Self {
            deposit_only: true,
            exclusive: vec![
                Rule::keywords(&["박*영(2982)"], &[DOKSAN]),
                Rule::keywords(&["문*영(6825)"], &[DOGOK]),
            ],
            additive: vec![
                Rule::keywords(&["문*영(8885)"], &[JONGNO3, JONGNO_DEPOSIT]),
                Rule::keywords(&["110-***-038170"], &[JONGNO1, JONGNO_DEPOSIT]),
                Rule::keywords(&["877001**550"], &[JONGNO2, JONGNO_DEPOSIT]),
            ],
        }
    }

    /// Bank and site keyword table, no deposit filter
    pub fn keywords() -> Self {
        use targets::*;

        Self {
            deposit_only: false,
            exclusive: Vec::new(),
            additive: vec![
                Rule::keywords(&["KB", "국민", "국민은행"], &[JONGNO_DEPOSIT]),
                Rule::keywords(&["카카오뱅크", "카뱅", "kakaobank"], &[JONGNO_DEPOSIT]),
                Rule::keywords(&["도곡", "도곡동"], &[DOGOK]),
                Rule::keywords(&["독산", "독산동"], &[DOKSAN]),
                Rule::keywords(&["종로1", "종로 1", "종로1차"], &[JONGNO1]),
                Rule::keywords(&["종로2", "종로 2", "종로2차"], &[JONGNO2]),
                Rule::keywords(&["종로3", "종로 3", "종로3차"], &[JONGNO3]),
            ],
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: TableFile = serde_json::from_str(json).context("malformed routing table")?;

        Ok(Self {
            deposit_only: raw.deposit_only,
            exclusive: raw.exclusive.into_iter().map(Rule::try_from).collect::<Result<_>>()?,
            additive: raw.additive.into_iter().map(Rule::try_from).collect::<Result<_>>()?,
        })
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read routing table {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Target chats for `text`, deduplicated in first-match order
    pub fn match_targets(&self, text: &str) -> Vec<i64> {
        if self.deposit_only && !should_forward(text) {
            return Vec::new();
        }

        let norm = normalize(text);
        let mut out = Vec::new();

        collect_hits(&self.exclusive, &norm, text, &mut out);
        if !out.is_empty() {
            return out;
        }

        collect_hits(&self.additive, &norm, text, &mut out);
        out
    }

    pub fn rule_count(&self) -> usize {
        self.exclusive.len() + self.additive.len()
    }
}

fn collect_hits(rules: &[Rule], norm: &str, raw: &str, out: &mut Vec<i64>) {
    for rule in rules.iter().filter(|r| r.hits(norm, raw)) {
        for target in rule.targets() {
            if !out.contains(target) {
                out.push(*target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::targets::*;
    use super::*;

    #[test]
    fn withdrawals_are_never_routed() {
        let table = RoutingTable::accounts();
        assert!(table.match_targets("110-***-038170 출금 50,000").is_empty());
        assert!(table.match_targets("110-***-038170 입금 50,000 출금").is_empty());
        assert!(table.match_targets("110-***-038170 잔액 50,000").is_empty());
    }

    #[test]
    fn additive_rules_accumulate_in_order() {
        let table = RoutingTable::accounts();
        assert_eq!(
            table.match_targets("[KB]08/20 20:17\n110-***-038170\n입금 300,000"),
            vec![JONGNO1, JONGNO_DEPOSIT]
        );
        assert_eq!(
            table.match_targets("문*영(8885) 877001**550 입금"),
            vec![JONGNO3, JONGNO_DEPOSIT, JONGNO2]
        );
    }

    #[test]
    fn exclusive_rule_suppresses_additive_targets() {
        let table = RoutingTable::accounts();
        assert_eq!(
            table.match_targets("박*영(2982)\n110-***-038170\n입금 10,000"),
            vec![DOKSAN]
        );
        assert_eq!(
            table.match_targets("박*영(2982) 문*영(6825) 입금"),
            vec![DOKSAN, DOGOK]
        );
    }

    #[test]
    fn keyword_table_is_case_insensitive() {
        let table = RoutingTable::keywords();
        assert_eq!(table.match_targets("KakaoBank 알림"), vec![JONGNO_DEPOSIT]);
        assert_eq!(table.match_targets("kb 도곡동 관리비"), vec![JONGNO_DEPOSIT, DOGOK]);
        assert_eq!(table.match_targets("종로 2 출금"), vec![JONGNO2]);
        assert!(table.match_targets("nothing here").is_empty());
    }

    #[test]
    fn loads_table_with_patterns() {
        let table = RoutingTable::from_json(
            r#"{
                "deposit_only": true,
                "additive": [
                    { "patterns": ["^\\[KB\\]"], "targets": [1] },
                    { "keywords": ["홍길동"], "targets": [2, 1] }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(table.rule_count(), 2);
        assert_eq!(table.match_targets("[KB]08/20 입금 홍길동"), vec![1, 2]);
        assert_eq!(table.match_targets("신한 입금 홍길동"), vec![2, 1]);
        assert!(table.match_targets("[KB]08/20 출금").is_empty());
    }

    #[test]
    fn example_routes_file_matches_accounts_preset() {
        let file = RoutingTable::from_json(include_str!("../routes.example.json")).unwrap();
        let preset = RoutingTable::accounts();

        for text in [
            "박*영(2982) 입금 10,000",
            "문*영(6825) 입금 10,000",
            "문*영(8885) 877001**550 입금",
            "110-***-038170 입금",
            "877001**550 출금",
            "홍길동 입금",
        ] {
            assert_eq!(file.match_targets(text), preset.match_targets(text), "{}", text);
        }
    }

    #[test]
    fn rejects_blank_keyword() {
        let err = RoutingTable::from_json(r#"{ "additive": [{ "keywords": ["홍길동", " "], "targets": [1] }] }"#)
            .unwrap_err();
        assert!(err.to_string().contains("must not be blank"));
    }

    #[test]
    fn rejects_invalid_pattern() {
        let err = RoutingTable::from_json(r#"{ "additive": [{ "patterns": ["("], "targets": [1] }] }"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid route pattern"));
    }
}

//! 页面解析
//!
//! [`parse`] 是纯函数：同样的输入总是得到同样的结果，不做任何 IO。
//! 尽量抽取，字段缺失记入 [`ParsedPage::missing`] 而不是报错。

use std::collections::HashSet;

use chrono::NaiveDate;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::collapse_whitespace;

mod extract;
pub mod placing;
pub mod profile;

pub use placing::{PlacingKind, PlacingSummary};
pub use profile::{ExtractionRule, SiteProfile, SiteRegistry};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("页面内容为空")]
    EmptyDocument,

    #[error("内容不是HTML")]
    NoMarkup,

    #[error("无效的选择器 {selector}: {message}")]
    Selector { selector: String, message: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    TournamentName,
    Date,
    Division,
    Detail,
    Placing,
}

/// 第 `row` 条候选记录缺少 `field`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissingField {
    pub row: usize,
    pub field: Field,
}

/// 一条入赏记录
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwardRecord {
    pub tournament_name: Option<String>,
    pub tournament_date: Option<NaiveDate>,
    /// 页面上的原始日期文本
    pub date_text: Option<String>,
    pub division: Option<String>,
    pub detail: Option<String>,
    pub placing: Option<String>,
}

impl AwardRecord {
    fn is_empty(&self) -> bool {
        self.tournament_name.is_none()
            && self.date_text.is_none()
            && self.division.is_none()
            && self.detail.is_none()
            && self.placing.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParsedPage {
    pub title: Option<String>,
    pub records: Vec<AwardRecord>,
    pub missing: Vec<MissingField>,
    /// 解析失败时的原因；此时 records 可能为空或不完整
    pub parse_error: Option<String>,
}

impl ParsedPage {
    pub fn failed(err: &ParseError) -> Self {
        Self {
            parse_error: Some(err.to_string()),
            ..Default::default()
        }
    }
}

pub(crate) fn selector(raw: &str) -> Result<Selector, ParseError> {
    Selector::parse(raw).map_err(|e| ParseError::Selector {
        selector: raw.to_string(),
        message: format!("{e:?}"),
    })
}

pub fn parse(profile: &SiteProfile, body: &str) -> Result<ParsedPage, ParseError> {
    if body.trim().is_empty() {
        return Err(ParseError::EmptyDocument);
    }
    if !body.contains('<') {
        return Err(ParseError::NoMarkup);
    }

    let document = Html::parse_document(body);
    let title = document
        .select(&selector("title")?)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let candidates = match &profile.rule {
        ExtractionRule::Table(rule) => extract::table(&document, rule, profile)?,
        ExtractionRule::Blocks(rule) => extract::blocks(&document, rule, profile)?,
    };

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    let mut missing = Vec::new();
    for (row, record) in candidates.into_iter().enumerate() {
        if record.is_empty() {
            continue;
        }
        let identity = (
            record.tournament_name.clone(),
            record.tournament_date.map(|d| d.to_string()).or(record.date_text.clone()),
            record.division.clone(),
            record.placing.clone(),
        );
        if !seen.insert(identity) {
            continue;
        }

        missing.extend(missing_fields(row, &record, profile));
        records.push(record);
    }

    Ok(ParsedPage {
        title,
        records,
        missing,
        parse_error: None,
    })
}

fn missing_fields(row: usize, record: &AwardRecord, profile: &SiteProfile) -> Vec<MissingField> {
    let has_detail = match &profile.rule {
        ExtractionRule::Table(rule) => rule.detail_col.is_some(),
        ExtractionRule::Blocks(_) => true,
    };
    let checks = [
        (Field::TournamentName, record.tournament_name.is_some()),
        (Field::Date, record.tournament_date.is_some()),
        (Field::Division, record.division.is_some()),
        (Field::Detail, !has_detail || record.detail.is_some()),
        (Field::Placing, record.placing.is_some()),
    ];
    checks
        .into_iter()
        .filter(|(_, present)| !present)
        .map(|(field, _)| MissingField { row, field })
        .collect()
}

/// 取 `~` 前的部分，按顺序尝试每种格式
pub fn parse_date(text: &str, formats: &[&str]) -> Option<NaiveDate> {
    let first = text.split('~').next()?.trim();
    formats
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(first, f).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::profile::{KOREA_TAKGU, MYTT};

    #[test]
    fn test_rejects_empty_and_plain_text() {
        assert_eq!(parse(&MYTT, "  \n"), Err(ParseError::EmptyDocument));
        assert_eq!(parse(&MYTT, "just text"), Err(ParseError::NoMarkup));
    }

    #[test]
    fn test_malformed_markup_is_tolerated() {
        let page = parse(&KOREA_TAKGU, "<html><title> 결과 </title><table><tr><td>1").unwrap();
        assert_eq!(page.title.as_deref(), Some("결과"));
        assert!(page.records.is_empty());
        assert!(page.parse_error.is_none());
    }

    #[test]
    fn test_parse_date_formats() {
        let formats = &["%Y.%m.%d", "%Y-%m-%d", "%Y년 %m월 %d일"];
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9);
        assert_eq!(parse_date("2024.03.09 ~ 2024.03.10", formats), expected);
        assert_eq!(parse_date("2024-03-09", formats), expected);
        assert_eq!(parse_date("2024년 3월 9일", formats), expected);
        assert_eq!(parse_date("미정", formats), None);
    }

    #[test]
    fn test_bad_selector_is_reported() {
        let err = selector("td:::").unwrap_err();
        assert!(matches!(err, ParseError::Selector { .. }));
    }
}

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::profile::{BlockRule, SiteProfile, TableRule};
use super::{AwardRecord, ParseError, parse_date, selector};
use crate::utils::collapse_whitespace;

fn text_of(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

/// 所有匹配元素的文本，用空格连接
fn select_text(scope: ElementRef<'_>, selector: &Selector) -> String {
    let parts: Vec<String> = scope.select(selector).map(text_of).collect();
    collapse_whitespace(&parts.join(" "))
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

fn with_date(mut record: AwardRecord, date_text: Option<String>, profile: &SiteProfile) -> AwardRecord {
    record.tournament_date = date_text
        .as_deref()
        .and_then(|t| parse_date(t, profile.date_formats));
    record.date_text = date_text;
    record
}

pub(super) fn table(document: &Html, rule: &TableRule, profile: &SiteProfile) -> Result<Vec<AwardRecord>, ParseError> {
    let rows = selector(rule.row)?;
    let td = selector("td")?;

    let mut records = Vec::new();
    for row in document.select(&rows) {
        let cells: Vec<String> = row.select(&td).map(text_of).collect();
        if cells.len() < rule.min_cells {
            continue;
        }
        if let Some(header) = rule.skip_text {
            if cells.iter().any(|c| c.contains(header)) {
                continue;
            }
        }

        let cell = |idx: usize| cells.get(idx).cloned().and_then(non_empty);
        let placing = cell(rule.placing_col);
        if let Some(p) = &placing {
            if !profile.is_prized(p) {
                continue;
            }
        }

        let record = AwardRecord {
            tournament_name: cell(rule.name_col),
            division: cell(rule.division_col),
            detail: rule.detail_col.and_then(cell),
            placing,
            ..Default::default()
        };
        records.push(with_date(record, cell(rule.date_col), profile));
    }
    Ok(records)
}

fn is_placeholder(block: ElementRef<'_>, rule: &BlockRule) -> bool {
    block.value().classes().any(|c| c == rule.placeholder_class)
}

/// 第一个能选出非占位区块的选择器的结果
fn pick_blocks<'a>(document: &'a Html, rule: &BlockRule) -> Result<Vec<ElementRef<'a>>, ParseError> {
    for raw in rule.blocks {
        let found: Vec<_> = document.select(&selector(raw)?).collect();
        if found.iter().any(|b| !is_placeholder(*b, rule)) {
            debug!("区块选择器 '{}' 命中 {} 个", raw, found.len());
            return Ok(found);
        }
    }
    Ok(Vec::new())
}

/// 记录文本去掉名次和组别两部分之后剩下的内容
fn detail_text(record: ElementRef<'_>, excluded: &[&Selector]) -> String {
    let skip: HashSet<_> = excluded
        .iter()
        .flat_map(|s| record.select(s))
        .map(|e| e.id())
        .collect();

    let parts: Vec<&str> = record
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node
                .ancestors()
                .take_while(|a| a.id() != record.id())
                .any(|a| skip.contains(&a.id()));
            (!hidden).then_some(&**text)
        })
        .collect();
    collapse_whitespace(&parts.join(" "))
}

pub(super) fn blocks(document: &Html, rule: &BlockRule, profile: &SiteProfile) -> Result<Vec<AwardRecord>, ParseError> {
    let skip: Vec<Selector> = rule.skip.iter().map(|s| selector(s)).collect::<Result<_, _>>()?;
    let names: Vec<Selector> = rule.name.iter().map(|s| selector(s)).collect::<Result<_, _>>()?;
    let date = selector(rule.date)?;
    let record_sel = selector(rule.record)?;
    let placing_sel = selector(rule.placing)?;
    let division_sel = selector(rule.division)?;

    let mut records = Vec::new();
    for block in pick_blocks(document, rule)? {
        if is_placeholder(block, rule) || skip.iter().any(|s| block.select(s).next().is_some()) {
            continue;
        }

        let tournament_name = names
            .iter()
            .map(|s| select_text(block, s))
            .find(|t| !t.is_empty());
        let date_text = non_empty(select_text(block, &date))
            .map(|t| t.split('~').next().unwrap_or_default().trim().to_string())
            .and_then(non_empty);

        for item in block.select(&record_sel) {
            let placing = non_empty(select_text(item, &placing_sel));
            if let Some(p) = &placing {
                if !profile.is_prized(p) {
                    continue;
                }
            }
            let division = non_empty(
                select_text(item, &division_sel)
                    .replace(['[', ']'], "")
                    .trim()
                    .to_string(),
            );

            let record = AwardRecord {
                tournament_name: tournament_name.clone(),
                division,
                detail: non_empty(detail_text(item, &[&placing_sel, &division_sel])),
                placing,
                ..Default::default()
            };
            records.push(with_date(record, date_text.clone(), profile));
        }
    }
    Ok(records)
}

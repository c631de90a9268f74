//! 站点配置
//!
//! 每个支持的站点一份静态配置：搜索地址、抓取方式、抽取规则。
//! 需要账号登录的站点不在这里。

use url::Url;

use crate::fetcher::{FetchHints, FetchMode, Paginator, SearchForm};
use crate::models::{FetchTarget, TargetError};

/// 表格型页面：每行一条记录
#[derive(Debug, Clone, Copy)]
pub struct TableRule {
    pub row: &'static str,
    pub min_cells: usize,
    /// 含有该文本的行是表头
    pub skip_text: Option<&'static str>,
    pub name_col: usize,
    pub date_col: usize,
    pub division_col: usize,
    pub placing_col: usize,
    pub detail_col: Option<usize>,
}

/// 区块型页面：每个区块一个大会，区块内有多条成绩
#[derive(Debug, Clone, Copy)]
pub struct BlockRule {
    /// 依次尝试，第一个选出非占位区块的选择器生效
    pub blocks: &'static [&'static str],
    pub placeholder_class: &'static str,
    /// 含有这些元素的区块跳过
    pub skip: &'static [&'static str],
    /// 大会名称，依次尝试
    pub name: &'static [&'static str],
    pub date: &'static str,
    pub record: &'static str,
    pub placing: &'static str,
    pub division: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub enum ExtractionRule {
    Table(TableRule),
    Blocks(BlockRule),
}

#[derive(Debug)]
pub struct SiteProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub host: &'static str,
    pub scheme: &'static str,
    pub search_path: &'static str,
    pub fixed_params: &'static [(&'static str, &'static str)],
    /// 携带选手姓名的查询参数
    pub player_param: &'static str,
    pub mode: FetchMode,
    pub wait_for: Option<&'static str>,
    pub search_form: Option<SearchForm>,
    pub stale_after_submit: Option<&'static str>,
    pub expand: Option<&'static str>,
    pub paginate: Option<Paginator>,
    pub rule: ExtractionRule,
    pub date_formats: &'static [&'static str],
    /// 非空时只保留这些名次
    pub prized: &'static [&'static str],
}

const DATE_FORMATS: &[&str] = &["%Y.%m.%d", "%Y-%m-%d", "%y.%m.%d", "%Y년 %m월 %d일"];

pub static AIRPING: SiteProfile = SiteProfile {
    id: "airping",
    name: "에어핑",
    host: "www.airping.co.kr",
    scheme: "https",
    search_path: "/11player/01.php",
    fixed_params: &[],
    player_param: "player_search_keyword",
    mode: FetchMode::Browser,
    wait_for: Some("li._mc_div:not(._vc_fixed)"),
    search_form: Some(SearchForm {
        input: "#player_search_keyword",
        submit: ".player_search_btn",
        param: "player_search_keyword",
    }),
    stale_after_submit: None,
    expand: Some("._cc_view_more_btn"),
    paginate: None,
    rule: ExtractionRule::Blocks(BlockRule {
        blocks: &[
            "._mc_result_div ul.player_cont_body > li._mc_div",
            "ul.player_cont_body > li._mc_div",
            ".player_cont_body li._mc_div",
            "li._mc_div",
        ],
        placeholder_class: "_vc_fixed",
        skip: &[".play_date_none", "._cc_view_more_btn"],
        name: &[".player_inner4 .player_box a", ".player_inner4 .game_match_wrap"],
        date: ".player_inner5 .player_box",
        record: "li._mc_player_result._mc_res_prized",
        placing: ".game_result",
        division: ".sear_game_type",
    }),
    date_formats: DATE_FORMATS,
    prized: &[],
};

pub static KOREA_TAKGU: SiteProfile = SiteProfile {
    id: "koreatakgu",
    name: "코리아탁구",
    host: "www.koreatakgu.com",
    scheme: "http",
    search_path: "/seoul/2017/Do.jsp",
    fixed_params: &[("urlSeq", "302")],
    player_param: "userNm",
    mode: FetchMode::Http,
    wait_for: None,
    search_form: None,
    stale_after_submit: None,
    expand: None,
    paginate: None,
    rule: ExtractionRule::Table(TableRule {
        row: "table tr",
        min_cells: 5,
        skip_text: Some("대회일자"),
        name_col: 2,
        date_col: 1,
        division_col: 3,
        placing_col: 4,
        detail_col: None,
    }),
    date_formats: DATE_FORMATS,
    prized: &["우승", "준우승", "4강"],
};

const MYTT_ROWS: &str = "#mainForm\\:winnerTable_data > tr";

pub static MYTT: SiteProfile = SiteProfile {
    id: "mytt",
    name: "MyTT",
    host: "mytt.kr",
    scheme: "https",
    search_path: "/main/winner_list.xhtml",
    fixed_params: &[],
    player_param: "playerName",
    mode: FetchMode::Browser,
    wait_for: Some(MYTT_ROWS),
    search_form: Some(SearchForm {
        input: "#mainForm\\:playerName",
        submit: "#mainForm\\:j_idt84",
        param: "playerName",
    }),
    stale_after_submit: Some(MYTT_ROWS),
    expand: None,
    paginate: Some(Paginator {
        next: "span.ui-paginator-next",
        disabled_class: "ui-state-disabled",
        rows: MYTT_ROWS,
    }),
    rule: ExtractionRule::Table(TableRule {
        row: MYTT_ROWS,
        min_cells: 7,
        skip_text: None,
        name_col: 0,
        date_col: 1,
        division_col: 3,
        placing_col: 4,
        detail_col: Some(6),
    }),
    date_formats: DATE_FORMATS,
    prized: &[],
};

fn bare_host(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

impl SiteProfile {
    /// 生成某个选手的搜索目标
    pub fn search_target(&self, player_name: &str) -> Result<FetchTarget, TargetError> {
        let base = Url::parse(&format!("{}://{}{}", self.scheme, self.host, self.search_path))
            .map_err(|e| TargetError::Invalid(e.to_string()))?;
        let mut params: Vec<(String, String)> = self
            .fixed_params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        params.push((self.player_param.to_string(), player_name.to_string()));
        FetchTarget::from_parts(base, params)
    }

    pub fn hints(&self) -> FetchHints {
        FetchHints {
            wait_for: self.wait_for,
            search_form: self.search_form,
            stale_after_submit: self.stale_after_submit,
            expand: self.expand,
            paginate: self.paginate,
        }
    }

    pub fn matches_host(&self, host: &str) -> bool {
        bare_host(host).eq_ignore_ascii_case(bare_host(self.host))
    }

    pub fn is_prized(&self, placing: &str) -> bool {
        self.prized.is_empty() || self.prized.contains(&placing)
    }
}

/// 站点注册表
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    profiles: Vec<&'static SiteProfile>,
}

impl SiteRegistry {
    pub fn new(profiles: Vec<&'static SiteProfile>) -> Self {
        Self { profiles }
    }

    pub fn builtin() -> Self {
        Self::new(vec![&AIRPING, &KOREA_TAKGU, &MYTT])
    }

    pub fn for_target(&self, target: &FetchTarget) -> Option<&'static SiteProfile> {
        self.profiles
            .iter()
            .copied()
            .find(|p| p.matches_host(target.host()))
    }

    pub fn get(&self, id: &str) -> Option<&'static SiteProfile> {
        self.profiles.iter().copied().find(|p| p.id == id)
    }

    pub fn all(&self) -> &[&'static SiteProfile] {
        &self.profiles
    }
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_target_carries_player_name() {
        let target = KOREA_TAKGU.search_target("홍길동").unwrap();
        assert_eq!(target.host(), "www.koreatakgu.com");
        assert_eq!(
            target.params(),
            &[
                ("urlSeq".to_string(), "302".to_string()),
                ("userNm".to_string(), "홍길동".to_string()),
            ]
        );
    }

    #[test]
    fn test_registry_matches_with_or_without_www() {
        let registry = SiteRegistry::builtin();
        let a = FetchTarget::parse("https://airping.co.kr/11player/01.php").unwrap();
        let b = FetchTarget::parse("https://www.mytt.kr/main/winner_list.xhtml").unwrap();
        let c = FetchTarget::parse("https://example.com/").unwrap();
        assert_eq!(registry.for_target(&a).map(|p| p.id), Some("airping"));
        assert_eq!(registry.for_target(&b).map(|p| p.id), Some("mytt"));
        assert!(registry.for_target(&c).is_none());
        assert_eq!(registry.get("koreatakgu").map(|p| p.host), Some("www.koreatakgu.com"));
    }

    #[test]
    fn test_prized_filter() {
        assert!(KOREA_TAKGU.is_prized("준우승"));
        assert!(!KOREA_TAKGU.is_prized("8강"));
        assert!(MYTT.is_prized("8강"));
    }

    #[test]
    fn test_mytt_waits_for_fresh_rows_and_pages() {
        let hints = MYTT.hints();
        assert_eq!(hints.stale_after_submit, Some(MYTT_ROWS));
        assert_eq!(hints.paginate.map(|p| p.rows), Some(MYTT_ROWS));
        assert!(AIRPING.hints().paginate.is_none());
        assert!(KOREA_TAKGU.hints().stale_after_submit.is_none());
    }
}

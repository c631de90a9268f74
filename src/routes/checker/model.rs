use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orchestrator::SearchTicket;

// 发起搜索请求参数
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub player_name: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub job_id: Uuid,
    pub player_name: String,
    pub reused: bool,
    pub remaining_requests: Option<u32>,
}

impl From<SearchTicket> for SearchResponse {
    fn from(ticket: SearchTicket) -> Self {
        Self {
            job_id: ticket.job_id,
            player_name: ticket.player_name,
            reused: ticket.reused,
            remaining_requests: ticket.remaining,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub player_name: Option<String>,
}

use serde::{Deserialize, Serialize};

use super::AwardRecord;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlacingKind {
    Winner,
    RunnerUp,
    Third,
    Other,
}

impl PlacingKind {
    /// “준우승”包含“우승”，所以先判断亚军
    pub fn classify(placing: &str) -> Self {
        if placing.contains("준우승") || placing.contains("2위") {
            PlacingKind::RunnerUp
        } else if placing.contains("우승") || placing.contains("1위") {
            PlacingKind::Winner
        } else if placing.contains("3위") || placing.contains("4강") {
            PlacingKind::Third
        } else {
            PlacingKind::Other
        }
    }
}

/// 名次统计
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlacingSummary {
    pub winner: u32,
    pub runner_up: u32,
    pub third: u32,
    pub other: u32,
}

impl PlacingSummary {
    pub fn add(&mut self, placing: &str) {
        match PlacingKind::classify(placing) {
            PlacingKind::Winner => self.winner += 1,
            PlacingKind::RunnerUp => self.runner_up += 1,
            PlacingKind::Third => self.third += 1,
            PlacingKind::Other => self.other += 1,
        }
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a AwardRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.add(record.placing.as_deref().unwrap_or_default());
        }
        summary
    }

    pub fn total(&self) -> u32 {
        self.winner + self.runner_up + self.third + self.other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(PlacingKind::classify("우승"), PlacingKind::Winner);
        assert_eq!(PlacingKind::classify("준우승"), PlacingKind::RunnerUp);
        assert_eq!(PlacingKind::classify("2위"), PlacingKind::RunnerUp);
        assert_eq!(PlacingKind::classify("공동 3위"), PlacingKind::Third);
        assert_eq!(PlacingKind::classify("4강"), PlacingKind::Third);
        assert_eq!(PlacingKind::classify("8강"), PlacingKind::Other);
    }

    #[test]
    fn test_summary_counts_records() {
        let records: Vec<AwardRecord> = ["우승", "준우승", "우승", "8강"]
            .iter()
            .map(|p| AwardRecord {
                placing: Some(p.to_string()),
                ..Default::default()
            })
            .collect();
        let summary = PlacingSummary::from_records(&records);
        assert_eq!(summary.winner, 2);
        assert_eq!(summary.runner_up, 1);
        assert_eq!(summary.other, 1);
        assert_eq!(summary.total(), 4);
    }
}

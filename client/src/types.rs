use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Shortage,
    Discontinuance,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Shortage => "shortage",
            ReportKind::Discontinuance => "discontinuance",
        }
    }

    /// Path prefix of the details endpoint for this kind of report.
    pub fn details_path(&self) -> &'static str {
        match self {
            ReportKind::Shortage => "shortages",
            ReportKind::Discontinuance => "discontinuances",
        }
    }
}

/// A shortage or discontinuance report as returned by the upstream API.
///
/// Only the fields the pipeline reasons about are typed. Everything else the
/// upstream sends is kept in `extra` and written back out unchanged.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Report {
    pub id: u64,
    #[serde(default)]
    pub din: Option<String>,
    #[serde(rename = "type")]
    pub kind: ReportKind,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub updated_date: Option<String>,
    #[serde(default)]
    pub en_drug_brand_name: Option<String>,
    #[serde(default)]
    pub fr_drug_brand_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of `/search` results.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SearchResponse {
    pub data: Vec<Report>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Parameters of a `/search` call.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportQuery {
    pub term: Option<String>,
    pub din: Option<String>,
    pub report_id: Option<u64>,
    pub limit: u32,
    pub offset: u32,
    pub order_by: Option<String>,
    pub order: Option<SortOrder>,
    pub status_filter: Option<String>,
}

impl Default for ReportQuery {
    fn default() -> Self {
        ReportQuery {
            term: None,
            din: None,
            report_id: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            order_by: None,
            order: None,
            status_filter: None,
        }
    }
}

impl ReportQuery {
    pub fn term<T: Into<String>>(term: T) -> Self {
        ReportQuery {
            term: Some(term.into()),
            ..Default::default()
        }
    }

    pub fn page(limit: u32, offset: u32) -> Self {
        ReportQuery {
            limit,
            offset,
            ..Default::default()
        }
    }

    /// Same query moved to a different offset.
    pub fn with_offset(&self, offset: u32) -> Self {
        ReportQuery {
            offset,
            ..self.clone()
        }
    }

    /// Query-string pairs in upstream naming. Unset filters are omitted.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(8);
        if let Some(term) = &self.term {
            params.push(("term", term.clone()));
        }
        if let Some(din) = &self.din {
            params.push(("din", din.clone()));
        }
        if let Some(report_id) = self.report_id {
            params.push(("report_id", report_id.to_string()));
        }
        params.push(("limit", self.limit.to_string()));
        params.push(("offset", self.offset.to_string()));
        if let Some(order_by) = &self.order_by {
            params.push(("orderby", order_by.clone()));
        }
        if let Some(order) = self.order {
            params.push(("order", order.as_str().to_string()));
        }
        if let Some(status) = &self.status_filter {
            params.push(("filter_status", status.clone()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_preserves_unknown_fields() {
        let raw = json!({
            "id": 12345,
            "din": "02242974",
            "type": "shortage",
            "status": "active_confirmed",
            "company_name": "ACME PHARMA",
            "created_date": "2024-01-05T10:00:00Z",
            "updated_date": "2024-02-01T08:30:00Z",
            "en_drug_brand_name": "METFORMIN",
            "fr_drug_brand_name": "METFORMINE",
            "shortage_reason": {"en_reason": "Demand increase"},
            "anticipated_end_date": null
        });

        let report: Report = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(report.id, 12345);
        assert_eq!(report.kind, ReportKind::Shortage);
        assert_eq!(report.din.as_deref(), Some("02242974"));
        assert!(report.extra.contains_key("shortage_reason"));
        assert!(report.extra.contains_key("anticipated_end_date"));

        // Writing it back yields the original record.
        assert_eq!(serde_json::to_value(&report).unwrap(), raw);
    }

    #[test]
    fn test_report_minimal() {
        let report: Report =
            serde_json::from_value(json!({"id": 7, "type": "discontinuance"})).unwrap();
        assert_eq!(report.kind, ReportKind::Discontinuance);
        assert_eq!(report.kind.details_path(), "discontinuances");
        assert!(report.company_name.is_none());
        assert!(report.extra.is_empty());
    }

    #[test]
    fn test_report_rejects_unknown_kind() {
        assert!(serde_json::from_value::<Report>(json!({"id": 1, "type": "recall"})).is_err());
    }

    #[test]
    fn test_query_params() {
        let query = ReportQuery {
            din: Some("02242974".into()),
            order_by: Some("updated_date".into()),
            order: Some(SortOrder::Desc),
            status_filter: Some("resolved".into()),
            ..ReportQuery::term("metformin")
        };

        assert_eq!(
            query.to_params(),
            vec![
                ("term", "metformin".to_string()),
                ("din", "02242974".to_string()),
                ("limit", "100".to_string()),
                ("offset", "0".to_string()),
                ("orderby", "updated_date".to_string()),
                ("order", "desc".to_string()),
                ("filter_status", "resolved".to_string()),
            ]
        );

        let paged = ReportQuery::page(20, 0).with_offset(40);
        assert_eq!(
            paged.to_params(),
            vec![("limit", "20".to_string()), ("offset", "40".to_string())]
        );
    }
}

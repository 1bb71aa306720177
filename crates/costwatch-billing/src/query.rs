//! The billing export query and its BigQuery REST request body.

use chrono::NaiveDate;
use costwatch_core::BillingTable;
use serde::Serialize;

pub const REPORT_DATE_PARAM: &str = "report_date";
pub const BASELINE_START_PARAM: &str = "baseline_start";

/// Column names the client decodes from the result schema.
pub const SERVICE_COLUMN: &str = "service";
pub const RECENT_COLUMN: &str = "recent_cost";
pub const BASELINE_COLUMN: &str = "baseline_total";

/// SQL that returns one row per service with spend on `@report_date`,
/// joined to its total over `[@baseline_start, @report_date)`.
pub fn build_query(table: &BillingTable, include_credits: bool) -> String {
    let cost = if include_credits {
        "cost + IFNULL((SELECT SUM(c.amount) FROM UNNEST(credits) c), 0)"
    } else {
        "cost"
    };
    let from = table.quoted();

    format!(
        r#"WITH baseline AS (
  SELECT service.description AS service, SUM({cost}) AS baseline_total
  FROM {from}
  WHERE DATE(usage_start_time) >= @{BASELINE_START_PARAM}
    AND DATE(usage_start_time) < @{REPORT_DATE_PARAM}
  GROUP BY service
),
recent AS (
  SELECT service.description AS service, SUM({cost}) AS recent_cost
  FROM {from}
  WHERE DATE(usage_start_time) = @{REPORT_DATE_PARAM}
  GROUP BY service
)
SELECT r.service AS {SERVICE_COLUMN},
       r.recent_cost AS {RECENT_COLUMN},
       COALESCE(b.baseline_total, 0) AS {BASELINE_COLUMN}
FROM recent r
LEFT JOIN baseline b USING (service)
ORDER BY r.recent_cost DESC"#
    )
}

/// Body of `POST /bigquery/v2/projects/{project}/queries`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    pub use_legacy_sql: bool,
    pub parameter_mode: &'static str,
    pub query_parameters: Vec<QueryParameter>,
    pub timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParameter {
    pub name: String,
    pub parameter_type: ParameterType,
    pub parameter_value: ParameterValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterType {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterValue {
    pub value: String,
}

impl QueryParameter {
    pub fn date(name: &str, value: NaiveDate) -> Self {
        QueryParameter {
            name: name.to_string(),
            parameter_type: ParameterType { kind: "DATE" },
            parameter_value: ParameterValue {
                value: value.format("%Y-%m-%d").to_string(),
            },
        }
    }
}

impl QueryRequest {
    pub fn service_costs(
        table: &BillingTable,
        include_credits: bool,
        report_date: NaiveDate,
        baseline_start: NaiveDate,
        location: Option<String>,
        timeout_ms: u64,
    ) -> Self {
        QueryRequest {
            query: build_query(table, include_credits),
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: vec![
                QueryParameter::date(REPORT_DATE_PARAM, report_date),
                QueryParameter::date(BASELINE_START_PARAM, baseline_start),
            ],
            timeout_ms,
            location,
            max_results: Some(1000),
        }
    }
}

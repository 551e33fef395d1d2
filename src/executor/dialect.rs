use std::sync::LazyLock;

use regex::Regex;

use crate::config::TsdbSystem;

// "data":[[6000,6010]],"meta"... : everything between the first [[ and ].
static CAQL_DATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data":\[\[([^\]]*)"#).expect("static caql pattern"));

// Greedy prefix, so this lands on the last `,<number>]]` in the body.
static INFLUX_LAST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s).*,(-?[0-9]+(?:\.[0-9]+)?)\]\]").expect("static influx pattern")
});

// Grafana table-shaped datapoints: [[value,timestamp],...,[value,timestamp]]
static SQL_LAST_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s).*\[\s*([^,\[\]]*?)\s*,\s*-?[0-9]+\s*\]\s*\]").expect("static sql pattern")
});

/// Query language spoken by the TSDB behind the dashboard proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// IRONdb's tag-based query language.
    Caql,
    /// InfluxDB's InfluxQL and flux.
    InfluxQl,
    /// TimescaleDB SQL.
    Sql,
}

impl Dialect {
    pub fn for_system(system: TsdbSystem) -> Self {
        match system {
            TsdbSystem::Irondb => Self::Caql,
            TsdbSystem::Influxdb => Self::InfluxQl,
            TsdbSystem::Timescale => Self::Sql,
        }
    }

    /// Label used for self-metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Caql => "caql",
            Self::InfluxQl => "influxql",
            Self::Sql => "sql",
        }
    }

    /// Pulls the trailing scalar out of a proxied response body.
    pub fn extract(self, body: &str) -> Option<String> {
        let token = match self {
            Self::Caql => {
                let group = CAQL_DATA.captures(body)?.get(1)?.as_str();
                group.rsplit(',').next()?
            }
            Self::InfluxQl => INFLUX_LAST.captures(body)?.get(1)?.as_str(),
            Self::Sql => SQL_LAST_PAIR.captures(body)?.get(1)?.as_str(),
        };

        let token = token.trim().trim_matches('"');
        is_scalar(token).then(|| token.to_string())
    }
}

/// `null` or a finite decimal number. Histograms, strings and the like
/// are not scalars.
fn is_scalar(token: &str) -> bool {
    token == "null" || token.parse::<f64>().is_ok_and(f64::is_finite)
}

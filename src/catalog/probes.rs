use std::sync::Arc;
use std::time::Duration;

use crate::executor::dialect::Dialect;

/// Placeholder replaced by the InfluxQL duration literal at request time.
pub const RANGE_PLACEHOLDER: &str = "{range}";

/// Lookback of a probe, in both the forms the dialects need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeWindow {
    pub span: Duration,
    /// InfluxQL duration literal for the same span.
    pub literal: &'static str,
}

const FIVE_MINUTES: ProbeWindow = ProbeWindow {
    span: Duration::from_secs(5 * 60),
    literal: "5m",
};
const SIX_HOURS: ProbeWindow = ProbeWindow {
    span: Duration::from_secs(6 * 60 * 60),
    literal: "6h",
};
const ONE_DAY: ProbeWindow = ProbeWindow {
    span: Duration::from_secs(24 * 60 * 60),
    literal: "24h",
};
const ONE_WEEK: ProbeWindow = ProbeWindow {
    span: Duration::from_secs(7 * 24 * 60 * 60),
    literal: "7d",
};

/// What a probe asks of the TSDB, independent of dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    MetricCount,
    OneSeries,
    HundredSeries,
    FourHundredSeries,
    HundredP99,
    FourHundredP99,
    HundredMean,
    FourHundredMean,
}

const PROBES: [(&str, Shape, ProbeWindow); 11] = [
    ("metrics-count", Shape::MetricCount, FIVE_MINUTES),
    ("1-ts-24-hour-range", Shape::OneSeries, ONE_DAY),
    ("1-ts-1-week-range", Shape::OneSeries, ONE_WEEK),
    ("100-ts-1-week-range", Shape::HundredSeries, ONE_WEEK),
    ("400-ts-1-week-range", Shape::FourHundredSeries, ONE_WEEK),
    ("100-ts-6-hour-range", Shape::HundredSeries, SIX_HOURS),
    ("400-ts-6-hour-range", Shape::FourHundredSeries, SIX_HOURS),
    ("100-ts-p99-1-week-range", Shape::HundredP99, ONE_WEEK),
    ("400-ts-p99-1-week-range", Shape::FourHundredP99, ONE_WEEK),
    ("100-ts-mean-1-week-range", Shape::HundredMean, ONE_WEEK),
    ("400-ts-mean-1-week-range", Shape::FourHundredMean, ONE_WEEK),
];

/// Probes issued every cycle, in launch order.
pub const PROBE_COUNT: usize = PROBES.len();

/// One canonical benchmark query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSpec {
    pub name: &'static str,
    pub dialect: Dialect,
    /// Query text; InfluxQL templates may contain [`RANGE_PLACEHOLDER`].
    pub query: &'static str,
    pub window: ProbeWindow,
}

/// The immutable probe list for one run.
///
/// Built once from the configuration before the scheduler starts and shared
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct ProbeCatalog {
    probes: Arc<[ProbeSpec]>,
}

impl ProbeCatalog {
    /// `caql_tags` selects tag-filter CAQL queries over namespace patterns;
    /// other dialects ignore it.
    pub fn build(dialect: Dialect, caql_tags: bool) -> Self {
        let probes = PROBES
            .iter()
            .map(|&(name, shape, window)| ProbeSpec {
                name,
                dialect,
                query: query_text(dialect, shape, caql_tags),
                window,
            })
            .collect();

        Self { probes }
    }

    pub fn probes(&self) -> &[ProbeSpec] {
        &self.probes
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

fn query_text(dialect: Dialect, shape: Shape, caql_tags: bool) -> &'static str {
    match (dialect, caql_tags) {
        (Dialect::Caql, false) => caql_namespace(shape),
        (Dialect::Caql, true) => caql_tags_query(shape),
        (Dialect::InfluxQl, _) => influx(shape),
        (Dialect::Sql, _) => sql(shape),
    }
}

fn caql_namespace(shape: Shape) -> &'static str {
    match shape {
        Shape::MetricCount => r#"find("/lagrande.randomint-1\.lg[0-4]\./")|count()"#,
        Shape::OneSeries => r#"find("lagrande.randomint-1.lg1.1")"#,
        Shape::HundredSeries => r#"find("lagrande.randomint-1.lg1.1??")"#,
        Shape::FourHundredSeries => r#"find("/lagrande.randomint-1.lg[0-4].1[0-9]{2}/")"#,
        Shape::HundredP99 => {
            r#"find("lagrande.randomint-1.lg1.1??")|window:percentile(1M, 99)"#
        }
        Shape::FourHundredP99 => {
            r#"find("/lagrande.randomint-1.lg[0-4].1[0-9]{2}/")|window:percentile(1M, 99)"#
        }
        Shape::HundredMean => r#"find("lagrande.randomint-1.lg1.1??")|window:mean(1M)"#,
        Shape::FourHundredMean => {
            r#"find("/lagrande.randomint-1.lg[0-4].1[0-9]{2}/")|window:mean(1M)"#
        }
    }
}

fn caql_tags_query(shape: Shape) -> &'static str {
    match shape {
        Shape::MetricCount => {
            r#"find("randomint-1","and(namespace:lagrande,node:/lg[0-4]/)")|count()"#
        }
        Shape::OneSeries => r#"find("randomint-1","and(namespace:lagrande,node:lg1,worker:1)")"#,
        Shape::HundredSeries => {
            r#"find("randomint-1","and(namespace:lagrande,node:lg1,worker:1??)")"#
        }
        Shape::FourHundredSeries => {
            r#"find("randomint-1","and(namespace:lagrande,node:/lg[0-4]/,worker:1??)")"#
        }
        Shape::HundredP99 => {
            r#"find("randomint-1","and(namespace:lagrande,node:lg1,worker:1??)")|window:percentile(1M, 99)"#
        }
        Shape::FourHundredP99 => {
            r#"find("randomint-1","and(namespace:lagrande,node:/lg[0-4]/,worker:1??)")|window:percentile(1M, 99)"#
        }
        Shape::HundredMean => {
            r#"find("randomint-1","and(namespace:lagrande,node:lg1,worker:1??)")|window:mean(1M)"#
        }
        Shape::FourHundredMean => {
            r#"find("randomint-1","and(namespace:lagrande,node:/lg[0-4]/,worker:1??)")|window:mean(1M)"#
        }
    }
}

fn influx(shape: Shape) -> &'static str {
    match shape {
        Shape::MetricCount => concat!(
            r#"from(bucket: "mydb/autogen") "#,
            r#"|> range(start: -8m, stop: -3m) "#,
            r#"|> filter(fn: (r) => r.run == "4" and r.process == "lagrande" and (r._field == "value")) "#,
            r#"|> map(fn: (r) => ({ _time: r._time, fqn: r.process + "." + r.node + "." + r._measurement + "." + r.worker })) "#,
            r#"|> keep(columns: ["_time", "fqn"]) "#,
            r#"|> window(every: 1m) "#,
            r#"|> unique(column: "fqn") "#,
            r#"|> aggregateWindow(every: 1m, fn: count, columns: ["fqn"])"#,
        ),
        Shape::OneSeries => {
            r#"SELECT "value" FROM "randomint-1" WHERE ("worker" = '1' AND "node" = 'lg1') AND time >= now() - {range}"#
        }
        Shape::HundredSeries => {
            r#"SELECT "value" FROM "randomint-1" WHERE ("worker" =~ /1[0-9]{2}/ AND "node" = 'lg1') AND time >= now() - {range}"#
        }
        Shape::FourHundredSeries => {
            r#"SELECT "value" FROM "randomint-1" WHERE ("worker" =~ /1[0-9]{2}/ AND "node" =~ /lg[0-4]/) AND time >= now() - {range}"#
        }
        Shape::HundredP99 => {
            r#"SELECT percentile("value", 99) FROM "randomint-1" WHERE ("worker" =~ /1[0-9]{2}/ AND "node" = 'lg1') AND time >= now() - {range} GROUP BY time(5s)"#
        }
        Shape::FourHundredP99 => {
            r#"SELECT percentile("value", 99) FROM "randomint-1" WHERE ("worker" =~ /1[0-9]{2}/ AND "node" =~ /lg[0-4]/) AND time >= now() - {range} GROUP BY time(5s)"#
        }
        Shape::HundredMean => {
            r#"SELECT mean("value") FROM "randomint-1" WHERE ("worker" =~ /1[0-9]{2}/ AND "node" = 'lg1') AND time >= now() - {range} GROUP BY time(5s)"#
        }
        Shape::FourHundredMean => {
            r#"SELECT mean("value") FROM "randomint-1" WHERE ("worker" =~ /1[0-9]{2}/ AND "node" =~ /lg[0-4]/) AND time >= now() - {range} GROUP BY time(5s)"#
        }
    }
}

fn sql(shape: Shape) -> &'static str {
    match shape {
        Shape::MetricCount => {
            r#"SELECT $__timeGroupAlias("time",$__interval), count(value) AS "value" FROM "randomint1" WHERE $__timeFilter("time") AND worker = '1' GROUP BY time ORDER BY time"#
        }
        Shape::OneSeries => {
            r#"SELECT $__timeGroupAlias("time",$__interval), sum(value) AS "value", worker AS "metric" FROM "randomint1" WHERE $__timeFilter("time") AND worker = '1' GROUP BY worker, time ORDER BY time"#
        }
        Shape::HundredSeries => {
            r#"SELECT $__timeGroupAlias("time",$__interval), sum(value) AS "value", worker AS "metric" FROM "randomint1" WHERE $__timeFilter("time") AND worker SIMILAR TO '1[0-9][0-9]' GROUP BY worker, time ORDER BY time"#
        }
        Shape::FourHundredSeries => {
            r#"SELECT $__timeGroupAlias("time",$__interval), sum(value) AS "value", worker AS "metric" FROM "randomint1" WHERE $__timeFilter("time") AND worker SIMILAR TO '[1-4][0-9][0-9]' GROUP BY worker, time ORDER BY time"#
        }
        Shape::HundredP99 => {
            r#"SELECT $__timeGroupAlias("time",$__interval), percentile_cont(0.99) WITHIN GROUP (ORDER BY value) AS "value" FROM "randomint1" WHERE $__timeFilter("time") AND worker SIMILAR TO '1[0-9][0-9]' GROUP BY time ORDER BY time"#
        }
        Shape::FourHundredP99 => {
            r#"SELECT $__timeGroupAlias("time",$__interval), percentile_cont(0.99) WITHIN GROUP (ORDER BY value) AS "value" FROM "randomint1" WHERE $__timeFilter("time") AND worker SIMILAR TO '[1-4][0-9][0-9]' GROUP BY time ORDER BY time"#
        }
        Shape::HundredMean => {
            r#"SELECT $__timeGroupAlias("time",$__interval), avg(value) AS "value" FROM "randomint1" WHERE $__timeFilter("time") AND worker SIMILAR TO '1[0-9][0-9]' GROUP BY time ORDER BY time"#
        }
        Shape::FourHundredMean => {
            r#"SELECT $__timeGroupAlias("time",$__interval), avg(value) AS "value" FROM "randomint1" WHERE $__timeFilter("time") AND worker SIMILAR TO '[1-4][0-9][0-9]' GROUP BY time ORDER BY time"#
        }
    }
}

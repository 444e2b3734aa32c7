use clickhouse::{Client, Row};
use serde::Deserialize;

use crate::analytics;
use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::models::query::{BucketInterval, CountRow, StringValueRow, TimeWindow};
use crate::models::score::{
    ComparisonMetrics, DistributionBin, HeatmapCell, ScoreFilter, ScoreRow, ScoreStatistics,
    ScoreSummary, ScoreTimeBucket, SourceDailyCount,
};
use crate::query_builder::{self, SortEntity};

/// Column list in `ScoreRow` field order.
const SCORE_COLUMNS: &str = "score_id, project_id, organization_id, trace_id, span_id, name, \
     value, string_value, score_type, source, reason, metadata, experiment_id, \
     experiment_item_id, timestamp";

/// Cap on sampled pairs for the in-code Spearman computation.
const SPEARMAN_SAMPLE_LIMIT: u64 = 100_000;

/// Append-only score store with statistical and comparative analytics
/// (§4.6). Updates re-append; deletes are asynchronous column-store
/// mutations.
#[derive(Clone)]
pub struct ScoreStore {
    ch: Client,
}

impl ScoreStore {
    pub fn new(ch: Client) -> Self {
        Self { ch }
    }

    // ── Writes ──

    pub async fn create(&self, row: &ScoreRow) -> CoreResult<()> {
        self.create_batch(std::slice::from_ref(row)).await
    }

    pub async fn create_batch(&self, rows: &[ScoreRow]) -> CoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut insert = self.ch.insert::<ScoreRow>("scores")?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }

    /// Update is a re-append under the same score id; reads keep the most
    /// recent row.
    pub async fn update(&self, row: &ScoreRow) -> CoreResult<()> {
        self.create(row).await
    }

    /// Asynchronous delete mutation by score id.
    pub async fn delete(&self, score_id: &str) -> CoreResult<()> {
        let sql = format!(
            "ALTER TABLE scores DELETE WHERE score_id = {}",
            query_builder::quote(score_id),
        );
        self.ch.query(&sql).execute().await?;
        Ok(())
    }

    // ── Reads ──

    pub async fn get_by_id(&self, score_id: &str) -> CoreResult<ScoreRow> {
        let sql = format!(
            "SELECT {SCORE_COLUMNS} FROM scores WHERE score_id = ? \
             ORDER BY timestamp DESC LIMIT 1"
        );
        let row = self
            .ch
            .query(&sql)
            .bind(score_id)
            .fetch_optional::<ScoreRow>()
            .await?;
        row.ok_or(CoreError::NotFound("score"))
    }

    pub async fn get_by_trace_id(&self, project_id: &str, trace_id: &str) -> CoreResult<Vec<ScoreRow>> {
        ids::validate_trace_id(trace_id)?;
        let sql = format!(
            "SELECT {SCORE_COLUMNS} FROM scores \
             WHERE project_id = ? AND trace_id = ? \
             ORDER BY timestamp ASC, score_id ASC"
        );
        Ok(self
            .ch
            .query(&sql)
            .bind(project_id)
            .bind(trace_id.to_ascii_lowercase())
            .fetch_all::<ScoreRow>()
            .await?)
    }

    pub async fn get_by_span_id(&self, project_id: &str, span_id: &str) -> CoreResult<Vec<ScoreRow>> {
        ids::validate_span_id(span_id)?;
        let sql = format!(
            "SELECT {SCORE_COLUMNS} FROM scores \
             WHERE project_id = ? AND span_id = ? \
             ORDER BY timestamp ASC, score_id ASC"
        );
        Ok(self
            .ch
            .query(&sql)
            .bind(project_id)
            .bind(span_id.to_ascii_lowercase())
            .fetch_all::<ScoreRow>()
            .await?)
    }

    fn filter_conditions(filter: &ScoreFilter) -> CoreResult<Vec<String>> {
        if filter.project_id.is_empty() {
            return Err(CoreError::Validation("project_id is required".to_string()));
        }
        let mut conditions = vec![format!(
            "project_id = {}",
            query_builder::quote(&filter.project_id)
        )];
        if let Some(name) = &filter.name {
            conditions.push(format!("name = {}", query_builder::quote(name)));
        }
        if let Some(trace_id) = &filter.trace_id {
            ids::validate_trace_id(trace_id)?;
            conditions.push(format!(
                "trace_id = {}",
                query_builder::quote(&trace_id.to_ascii_lowercase())
            ));
        }
        if let Some(span_id) = &filter.span_id {
            ids::validate_span_id(span_id)?;
            conditions.push(format!(
                "span_id = {}",
                query_builder::quote(&span_id.to_ascii_lowercase())
            ));
        }
        if let Some(source) = &filter.source {
            conditions.push(format!("source = {}", query_builder::quote(source)));
        }
        if let Some(score_type) = &filter.score_type {
            conditions.push(format!("score_type = {}", query_builder::quote(score_type)));
        }
        if let Some(experiment_id) = &filter.experiment_id {
            conditions.push(format!(
                "experiment_id = {}",
                query_builder::quote(experiment_id)
            ));
        }
        if let Some(from) = &filter.timestamp_from {
            conditions.push(format!("timestamp >= {}", query_builder::time_literal(from)?));
        }
        if let Some(to) = &filter.timestamp_to {
            conditions.push(format!("timestamp <= {}", query_builder::time_literal(to)?));
        }
        Ok(conditions)
    }

    pub async fn get_by_filter(
        &self,
        filter: &ScoreFilter,
        page_size: u64,
    ) -> CoreResult<Vec<ScoreRow>> {
        let conditions = Self::filter_conditions(filter)?;
        let order = query_builder::order_by(
            SortEntity::Score,
            filter.sort_by.as_deref(),
            filter.sort_dir.as_deref(),
        )?;
        let sql = format!(
            "SELECT {SCORE_COLUMNS} FROM scores WHERE {} {order} LIMIT {page_size} OFFSET {}",
            conditions.join(" AND "),
            filter.offset,
        );
        Ok(self.ch.query(&sql).fetch_all::<ScoreRow>().await?)
    }

    pub async fn count(&self, filter: &ScoreFilter) -> CoreResult<u64> {
        let conditions = Self::filter_conditions(filter)?;
        let sql = format!(
            "SELECT count() AS count FROM scores WHERE {}",
            conditions.join(" AND "),
        );
        let row = self.ch.query(&sql).fetch_one::<CountRow>().await?;
        Ok(row.count)
    }

    // ── Analytics ──

    fn scoped(project_id: &str, name: &str, window: Option<&TimeWindow>) -> CoreResult<String> {
        let mut conditions = vec![
            format!("project_id = {}", query_builder::quote(project_id)),
            format!("name = {}", query_builder::quote(name)),
        ];
        if let Some(window) = window {
            conditions.push(format!(
                "timestamp >= {}",
                query_builder::time_literal(&window.from_rfc3339())?
            ));
            conditions.push(format!(
                "timestamp <= {}",
                query_builder::time_literal(&window.to_rfc3339())?
            ));
        }
        Ok(conditions.join(" AND "))
    }

    /// Count, mean, std-dev, min, max, median over the numeric values, plus
    /// the categorical mode when any string_value is present. NaN from
    /// empty inputs is normalized to 0.
    pub async fn get_statistics(
        &self,
        project_id: &str,
        name: &str,
        window: Option<&TimeWindow>,
    ) -> CoreResult<ScoreStatistics> {
        let scope = Self::scoped(project_id, name, window)?;
        let sql = format!(
            "SELECT count() AS count, avg(value) AS mean, stddevSamp(value) AS std_dev, \
                    min(value) AS min, max(value) AS max, \
                    quantile(0.5)(value) AS median \
             FROM scores WHERE {scope}"
        );
        let row = self
            .ch
            .query(&sql)
            .fetch_one::<StatisticsRow>()
            .await?;

        let mut stats = ScoreStatistics {
            count: row.count,
            mean: analytics::normalize(row.mean.unwrap_or(0.0)),
            std_dev: analytics::normalize(row.std_dev.unwrap_or(0.0)),
            min: analytics::normalize(row.min.unwrap_or(0.0)),
            max: analytics::normalize(row.max.unwrap_or(0.0)),
            median: analytics::normalize(row.median.unwrap_or(0.0)),
            mode: None,
            mode_percentage: None,
        };

        let mode_sql = format!(
            "SELECT string_value AS val, count() AS cnt, \
                    (SELECT count() FROM scores WHERE {scope} AND string_value IS NOT NULL) AS total \
             FROM scores WHERE {scope} AND string_value IS NOT NULL \
             GROUP BY string_value ORDER BY cnt DESC, val ASC LIMIT 1"
        );
        if let Some(mode) = self
            .ch
            .query(&mode_sql)
            .fetch_optional::<ModeRow>()
            .await?
        {
            stats.mode_percentage = Some(if mode.total == 0 {
                0.0
            } else {
                mode.cnt as f64 / mode.total as f64 * 100.0
            });
            stats.mode = mode.val;
        }
        Ok(stats)
    }

    /// Time-bucketed average and count, `hour | day | week`.
    pub async fn get_time_series(
        &self,
        project_id: &str,
        name: &str,
        interval: BucketInterval,
        window: Option<&TimeWindow>,
    ) -> CoreResult<Vec<ScoreTimeBucket>> {
        let scope = Self::scoped(project_id, name, window)?;
        let bucket = format!(
            "toInt64(toUnixTimestamp(toDateTime({})))",
            interval.truncate_fn("timestamp"),
        );
        let sql = format!(
            "SELECT {bucket} AS bucket, \
                    avg(ifNull(value, 0)) AS avg_value, \
                    count() AS count \
             FROM scores WHERE {scope} \
             GROUP BY bucket ORDER BY bucket ASC"
        );
        Ok(self.ch.query(&sql).fetch_all::<ScoreTimeBucket>().await?)
    }

    /// Histogram over the numeric values: the range is read once, the store
    /// groups by bin index, and empty bins are filled in so exactly `bins`
    /// rows come back.
    pub async fn get_distribution(
        &self,
        project_id: &str,
        name: &str,
        bins: usize,
        window: Option<&TimeWindow>,
    ) -> CoreResult<Vec<DistributionBin>> {
        if bins == 0 {
            return Err(CoreError::Validation("bins must be positive".to_string()));
        }
        let scope = Self::scoped(project_id, name, window)?;
        let range_sql = format!(
            "SELECT min(value) AS min, max(value) AS max, count() AS count \
             FROM scores WHERE {scope} AND value IS NOT NULL"
        );
        let range = self.ch.query(&range_sql).fetch_one::<RangeRow>().await?;
        if range.count == 0 {
            return Ok(Vec::new());
        }
        let (min, max) = (range.min.unwrap_or(0.0), range.max.unwrap_or(0.0));

        let mut counts = vec![0u64; bins];
        if max > min {
            let width = (max - min) / bins as f64;
            let sql = format!(
                "SELECT least(greatest(toInt64(floor((assumeNotNull(value) - {min}) / {width})), 0), {}) AS bin, \
                        count() AS count \
                 FROM scores WHERE {scope} AND value IS NOT NULL \
                 GROUP BY bin",
                bins as i64 - 1,
            );
            for row in self.ch.query(&sql).fetch_all::<BinRow>().await? {
                counts[row.bin.clamp(0, bins as i64 - 1) as usize] += row.count;
            }
        } else {
            // a single distinct value lands entirely in the first bin
            counts[0] = range.count;
        }

        Ok(analytics::bin_edges(min, max, bins)
            .into_iter()
            .zip(counts)
            .map(|((lower, upper), count)| DistributionBin {
                lower,
                upper,
                count,
            })
            .collect())
    }

    /// The self-joined numeric pair set for two score names on the same
    /// trace.
    fn pair_set(
        project_id: &str,
        name: &str,
        compare: &str,
        window: Option<&TimeWindow>,
    ) -> CoreResult<String> {
        let mut conditions = vec![
            format!("a.project_id = {}", query_builder::quote(project_id)),
            format!("a.name = {}", query_builder::quote(name)),
            format!("b.name = {}", query_builder::quote(compare)),
            "a.value IS NOT NULL".to_string(),
            "b.value IS NOT NULL".to_string(),
        ];
        if let Some(window) = window {
            conditions.push(format!(
                "a.timestamp >= {}",
                query_builder::time_literal(&window.from_rfc3339())?
            ));
            conditions.push(format!(
                "a.timestamp <= {}",
                query_builder::time_literal(&window.to_rfc3339())?
            ));
        }
        Ok(format!(
            "(SELECT assumeNotNull(a.value) AS v1, assumeNotNull(b.value) AS v2 \
              FROM scores AS a \
              INNER JOIN scores AS b \
                ON a.trace_id = b.trace_id AND a.project_id = b.project_id \
              WHERE {})",
            conditions.join(" AND "),
        ))
    }

    /// Two-dimensional histogram over a score pair; both axes are binned
    /// independently.
    pub async fn get_heatmap(
        &self,
        project_id: &str,
        name: &str,
        compare: &str,
        bins: usize,
        window: Option<&TimeWindow>,
    ) -> CoreResult<Vec<HeatmapCell>> {
        if bins == 0 {
            return Err(CoreError::Validation("bins must be positive".to_string()));
        }
        let pairs = Self::pair_set(project_id, name, compare, window)?;
        let range_sql = format!(
            "SELECT min(v1) AS x_min, max(v1) AS x_max, min(v2) AS y_min, max(v2) AS y_max, \
                    count() AS count \
             FROM {pairs}"
        );
        let range = self
            .ch
            .query(&range_sql)
            .fetch_one::<PairRangeRow>()
            .await?;
        if range.count == 0 {
            return Ok(Vec::new());
        }
        let bin_expr = |col: &str, min: f64, max: f64| {
            if max > min {
                let width = (max - min) / bins as f64;
                format!(
                    "least(greatest(toInt64(floor(({col} - {min}) / {width})), 0), {})",
                    bins as i64 - 1,
                )
            } else {
                "toInt64(0)".to_string()
            }
        };
        let sql = format!(
            "SELECT {} AS x_bin, {} AS y_bin, count() AS count \
             FROM {pairs} GROUP BY x_bin, y_bin ORDER BY x_bin, y_bin",
            bin_expr("v1", range.x_min, range.x_max),
            bin_expr("v2", range.y_min, range.y_max),
        );
        let rows = self.ch.query(&sql).fetch_all::<HeatmapRow>().await?;
        Ok(rows
            .into_iter()
            .map(|row| HeatmapCell {
                x_bin: row.x_bin.clamp(0, bins as i64 - 1) as usize,
                y_bin: row.y_bin.clamp(0, bins as i64 - 1) as usize,
                count: row.count,
            })
            .collect())
    }

    /// Pair count, Pearson (store-native `corr`), MAE, RMSE, and a sampled
    /// in-code Spearman with average-rank ties. Zero-variance NaN results
    /// are substituted with 0.
    pub async fn get_comparison_metrics(
        &self,
        project_id: &str,
        name: &str,
        compare: &str,
        window: Option<&TimeWindow>,
    ) -> CoreResult<ComparisonMetrics> {
        let pairs = Self::pair_set(project_id, name, compare, window)?;
        let sql = format!(
            "SELECT count() AS count, corr(v1, v2) AS pearson, \
                    avg(abs(v1 - v2)) AS mae, sqrt(avg((v1 - v2) * (v1 - v2))) AS rmse \
             FROM {pairs}"
        );
        let row = self.ch.query(&sql).fetch_one::<ComparisonRow>().await?;

        let sample_sql = format!("SELECT v1, v2 FROM {pairs} LIMIT {SPEARMAN_SAMPLE_LIMIT}");
        let sample = self.ch.query(&sample_sql).fetch_all::<PairRow>().await?;
        let pairs: Vec<(f64, f64)> = sample.into_iter().map(|p| (p.v1, p.v2)).collect();

        Ok(ComparisonMetrics {
            count: row.count,
            pearson: analytics::normalize(row.pearson),
            spearman: analytics::spearman(&pairs),
            mae: analytics::normalize(row.mae),
            rmse: analytics::normalize(row.rmse),
        })
    }

    pub async fn get_distinct_names(&self, project_id: &str) -> CoreResult<Vec<String>> {
        let sql = "SELECT DISTINCT name AS val FROM scores WHERE project_id = ? \
                   ORDER BY val LIMIT 1000";
        let rows = self
            .ch
            .query(sql)
            .bind(project_id)
            .fetch_all::<StringValueRow>()
            .await?;
        Ok(rows.into_iter().map(|r| r.val).collect())
    }

    // ── Materialized-view summaries ──
    // The views hold aggregate state; reads merge it and averages are
    // computed in code as sum / count.

    pub async fn experiment_summaries(
        &self,
        project_id: &str,
        experiment_id: Option<&str>,
    ) -> CoreResult<Vec<ScoreSummary>> {
        let mut conditions = vec![format!(
            "project_id = {}",
            query_builder::quote(project_id)
        )];
        if let Some(experiment_id) = experiment_id {
            conditions.push(format!(
                "experiment_id = {}",
                query_builder::quote(experiment_id)
            ));
        }
        let sql = format!(
            "SELECT experiment_id AS key, name, countMerge(count_state) AS count, \
                    sumMerge(sum_state) AS sum, minMerge(min_state) AS min, \
                    maxMerge(max_state) AS max \
             FROM scores_experiment_summary WHERE {} \
             GROUP BY experiment_id, name ORDER BY experiment_id, name",
            conditions.join(" AND "),
        );
        let rows = self.ch.query(&sql).fetch_all::<SummaryRow>().await?;
        Ok(rows.into_iter().map(SummaryRow::into_summary).collect())
    }

    pub async fn daily_summaries(
        &self,
        project_id: &str,
        name: Option<&str>,
    ) -> CoreResult<Vec<ScoreSummary>> {
        let mut conditions = vec![format!(
            "project_id = {}",
            query_builder::quote(project_id)
        )];
        if let Some(name) = name {
            conditions.push(format!("name = {}", query_builder::quote(name)));
        }
        let sql = format!(
            "SELECT toString(day) AS key, name, countMerge(count_state) AS count, \
                    sumMerge(sum_state) AS sum, minMerge(min_state) AS min, \
                    maxMerge(max_state) AS max \
             FROM scores_daily_summary WHERE {} \
             GROUP BY day, name ORDER BY day, name",
            conditions.join(" AND "),
        );
        let rows = self.ch.query(&sql).fetch_all::<SummaryRow>().await?;
        Ok(rows.into_iter().map(SummaryRow::into_summary).collect())
    }

    pub async fn source_daily_counts(
        &self,
        project_id: &str,
    ) -> CoreResult<Vec<SourceDailyCount>> {
        let sql = "SELECT source, toString(day) AS day, countMerge(count_state) AS count \
                   FROM scores_source_daily WHERE project_id = ? \
                   GROUP BY source, day ORDER BY day, source";
        let rows = self
            .ch
            .query(sql)
            .bind(project_id)
            .fetch_all::<SourceDailyRow>()
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| SourceDailyCount {
                source: row.source,
                day: row.day,
                count: row.count,
            })
            .collect())
    }
}

// ── ClickHouse row shapes ──

#[derive(Debug, Deserialize, Row)]
struct StatisticsRow {
    count: u64,
    mean: Option<f64>,
    std_dev: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
    median: Option<f64>,
}

#[derive(Debug, Deserialize, Row)]
struct ModeRow {
    val: Option<String>,
    cnt: u64,
    total: u64,
}

#[derive(Debug, Deserialize, Row)]
struct RangeRow {
    min: Option<f64>,
    max: Option<f64>,
    count: u64,
}

#[derive(Debug, Deserialize, Row)]
struct BinRow {
    bin: i64,
    count: u64,
}

#[derive(Debug, Deserialize, Row)]
struct PairRangeRow {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    count: u64,
}

#[derive(Debug, Deserialize, Row)]
struct HeatmapRow {
    x_bin: i64,
    y_bin: i64,
    count: u64,
}

#[derive(Debug, Deserialize, Row)]
struct ComparisonRow {
    count: u64,
    pearson: f64,
    mae: f64,
    rmse: f64,
}

#[derive(Debug, Deserialize, Row)]
struct PairRow {
    v1: f64,
    v2: f64,
}

#[derive(Debug, Deserialize, Row)]
struct SummaryRow {
    key: String,
    name: String,
    count: u64,
    sum: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
}

#[derive(Debug, Deserialize, Row)]
struct SourceDailyRow {
    source: String,
    day: String,
    count: u64,
}

impl SummaryRow {
    fn into_summary(self) -> ScoreSummary {
        let sum = self.sum.unwrap_or(0.0);
        ScoreSummary {
            avg: if self.count == 0 {
                0.0
            } else {
                sum / self.count as f64
            },
            key: self.key,
            name: self.name,
            count: self.count,
            sum,
            min: self.min.unwrap_or(0.0),
            max: self.max.unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_requires_project() {
        assert!(ScoreStore::filter_conditions(&ScoreFilter::default()).is_err());
    }

    #[test]
    fn test_filter_conditions_escape() {
        let filter = ScoreFilter {
            project_id: "p1".to_string(),
            name: Some("it's".to_string()),
            ..Default::default()
        };
        let conditions = ScoreStore::filter_conditions(&filter).unwrap();
        assert!(conditions.contains(&"name = 'it\\'s'".to_string()));
    }

    #[test]
    fn test_pair_set_joins_on_trace_and_project() {
        let sql = ScoreStore::pair_set("p1", "helpfulness", "accuracy", None).unwrap();
        assert!(sql.contains("a.trace_id = b.trace_id"));
        assert!(sql.contains("a.project_id = b.project_id"));
        assert!(sql.contains("a.name = 'helpfulness'"));
        assert!(sql.contains("b.name = 'accuracy'"));
        assert!(sql.contains("a.value IS NOT NULL"));
    }

    #[test]
    fn test_summary_avg_in_code() {
        let summary = SummaryRow {
            key: "exp-1".to_string(),
            name: "helpfulness".to_string(),
            count: 4,
            sum: Some(2.0),
            min: Some(0.1),
            max: Some(0.9),
        }
        .into_summary();
        assert_eq!(summary.avg, 0.5);

        let empty = SummaryRow {
            key: "exp-2".to_string(),
            name: "x".to_string(),
            count: 0,
            sum: None,
            min: None,
            max: None,
        }
        .into_summary();
        assert_eq!(empty.avg, 0.0);
    }
}

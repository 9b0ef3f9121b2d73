//! Sampled time-series reads.

use fleetd_core::Identifier;
use fleetd_core::time::lookback_cutoff;
use futures::TryStreamExt;

use super::db::{Database, DatabaseError};
use crate::sampler::{SampledSeries, Sampler, SeriesBuilder};

/// Parameters for [`Database::sampled_time_series`].
#[derive(Debug, Clone)]
pub struct TimeSeriesQuery {
    pub experiment: String,
    /// Table holding the series. Interpolated into SQL, hence validated.
    pub table: Identifier,
    /// Value column. Interpolated into SQL, hence validated.
    pub column: Identifier,
    pub filter_mod_n: f64,
    pub lookback_hours: f64,
    /// Decimal places kept on each value.
    pub precision: u8,
}

impl TimeSeriesQuery {
    pub fn new(experiment: impl Into<String>, table: Identifier, column: Identifier) -> Self {
        Self {
            experiment: experiment.into(),
            table,
            column,
            filter_mod_n: 100.0,
            lookback_hours: 4.0,
            precision: 7,
        }
    }
}

impl Database {
    /// Stream one experiment's rows from a series table and sample them.
    ///
    /// Rows are grouped by unit. Null values and rows older than the lookback
    /// window are skipped.
    pub async fn sampled_time_series(
        &self,
        query: &TimeSeriesQuery,
    ) -> Result<SampledSeries, DatabaseError> {
        let sql = format!(
            "SELECT rowid, pioreactor_unit, timestamp, CAST({column} AS REAL) \
             FROM {table} \
             WHERE experiment = ? AND timestamp > ? AND {column} IS NOT NULL \
             ORDER BY rowid",
            column = query.column,
            table = query.table,
        );

        let sampler = Sampler::new(query.filter_mod_n);
        let mut builder = SeriesBuilder::new(query.precision);
        let mut rows = sqlx::query_as::<_, (i64, String, String, f64)>(&sql)
            .bind(&query.experiment)
            .bind(lookback_cutoff(query.lookback_hours))
            .fetch(self.pool());

        while let Some((rowid, unit, timestamp, value)) = rows.try_next().await? {
            if sampler.keep(rowid) {
                builder.push(&unit, timestamp, value);
            }
        }

        Ok(builder.finish())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    #[allow(clippy::cast_precision_loss)]
    async fn seeded(rows: usize) -> Database {
        let db = Database::open_in_memory().await.unwrap();
        let recent = (Utc::now() - Duration::minutes(30))
            .format("%Y-%m-%dT%H:%M:%S%.6fZ")
            .to_string();
        for i in 0..rows {
            let unit = if i % 2 == 0 { "unit1" } else { "unit2" };
            sqlx::query(
                "INSERT INTO growth_rates (experiment, pioreactor_unit, timestamp, rate) VALUES (?, ?, ?, ?)",
            )
            .bind("exp1")
            .bind(unit)
            .bind(&recent)
            .bind(i as f64 / 3.0)
            .execute(db.pool())
            .await
            .unwrap();
        }
        db
    }

    fn growth_rates() -> TimeSeriesQuery {
        TimeSeriesQuery::new(
            "exp1",
            Identifier::parse("growth_rates").unwrap(),
            Identifier::parse("rate").unwrap(),
        )
    }

    #[tokio::test]
    async fn unsampled_query_returns_every_row() {
        let db = seeded(20).await;
        let query = TimeSeriesQuery {
            filter_mod_n: 1.0,
            precision: 5,
            ..growth_rates()
        };
        let series = db.sampled_time_series(&query).await.unwrap();
        assert_eq!(series.series, vec!["unit1", "unit2"]);
        assert_eq!(series.data.iter().map(Vec::len).sum::<usize>(), 20);
        assert_eq!(series.points("unit2").unwrap()[0].y, 0.33333);
    }

    #[tokio::test]
    async fn sampling_thins_rows() {
        let db = seeded(1_000).await;
        let series = db.sampled_time_series(&growth_rates()).await.unwrap();
        let kept: usize = series.data.iter().map(Vec::len).sum();
        assert!((5..=15).contains(&kept), "kept {kept}");
    }

    #[tokio::test]
    async fn old_rows_and_other_experiments_are_excluded() {
        let db = seeded(4).await;
        sqlx::query(
            "INSERT INTO growth_rates (experiment, pioreactor_unit, timestamp, rate) VALUES ('exp1', 'unit3', '2001-01-01T00:00:00.000000Z', 1.0), ('exp2', 'unit4', '2999-01-01T00:00:00.000000Z', 1.0)",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let query = TimeSeriesQuery {
            filter_mod_n: 1.0,
            ..growth_rates()
        };
        let series = db.sampled_time_series(&query).await.unwrap();
        assert_eq!(series.series, vec!["unit1", "unit2"]);
    }

    #[tokio::test]
    async fn unknown_table_is_query_error() {
        let db = Database::open_in_memory().await.unwrap();
        let query = TimeSeriesQuery::new(
            "exp1",
            Identifier::parse("no_such_table").unwrap(),
            Identifier::parse("value").unwrap(),
        );
        assert!(matches!(
            db.sampled_time_series(&query).await.unwrap_err(),
            DatabaseError::Query(_)
        ));
    }
}

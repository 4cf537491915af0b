//! Repository for the `raw_inputs` table.

use sqlx::PgPool;

use cryoflow_core::types::MeasurementDay;

use crate::models::raw_input::{NewRawInput, RawInput};

/// Column list for `raw_inputs` queries.
const COLUMNS: &str = "\
    id, input_id, input_path, raster_type_fk_id, tile, measurement_day, \
    start_date, publishing_date, harvest_date, relative_orbit, is_partial";

/// Provides access to harvested inputs.
pub struct RawInputRepo;

impl RawInputRepo {
    /// Insert a harvested input.
    ///
    /// Harvesters deliver at least once, so a duplicate `input_id` is not an
    /// error: the insert is skipped and `None` is returned.
    pub async fn insert(
        pool: &PgPool,
        input: &NewRawInput,
    ) -> Result<Option<RawInput>, sqlx::Error> {
        let query = format!(
            "INSERT INTO raw_inputs \
                 (input_id, input_path, raster_type_fk_id, tile, measurement_day, start_date, publishing_date, relative_orbit, is_partial) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (input_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RawInput>(&query)
            .bind(&input.input_id)
            .bind(&input.input_path)
            .bind(input.raster_type_fk_id)
            .bind(&input.tile)
            .bind(input.measurement_day)
            .bind(input.start_date)
            .bind(input.publishing_date)
            .bind(input.relative_orbit)
            .bind(input.is_partial)
            .fetch_optional(pool)
            .await
    }

    /// Fetch inputs by their database row ids.
    pub async fn find_by_ids(
        pool: &PgPool,
        row_ids: &[i64],
    ) -> Result<Vec<RawInput>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM raw_inputs WHERE id = ANY($1) ORDER BY id");
        sqlx::query_as::<_, RawInput>(&query)
            .bind(row_ids)
            .fetch_all(pool)
            .await
    }

    /// Inputs of one raster type not yet validated under the given
    /// condition, harvested inside the scan window. These are the
    /// evaluator's candidates; the window keeps permanently rejected
    /// inputs from being rescanned forever.
    pub async fn candidates_for_condition(
        pool: &PgPool,
        raster_type_id: i16,
        condition_id: i16,
        harvested_within_days: i32,
    ) -> Result<Vec<RawInput>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM raw_inputs ri \
             WHERE ri.raster_type_fk_id = $1 \
               AND ri.harvest_date > NOW() - MAKE_INTERVAL(days => $3) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM raw2valid rv \
                   WHERE rv.raw_input_fk_id = ri.id \
                     AND rv.triggering_condition_fk_id = $2 \
               ) \
             ORDER BY ri.harvest_date"
        );
        sqlx::query_as::<_, RawInput>(&query)
            .bind(raster_type_id)
            .bind(condition_id)
            .bind(harvested_within_days)
            .fetch_all(pool)
            .await
    }

    /// Inputs of one raster type sharing a tile and measurement day.
    ///
    /// Feeds the co-occurrence predicate with companion rows.
    pub async fn companions(
        pool: &PgPool,
        raster_type_id: i16,
        tile: &str,
        measurement_day: MeasurementDay,
    ) -> Result<Vec<RawInput>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM raw_inputs \
             WHERE raster_type_fk_id = $1 AND tile = $2 AND measurement_day = $3"
        );
        sqlx::query_as::<_, RawInput>(&query)
            .bind(raster_type_id)
            .bind(tile)
            .bind(measurement_day)
            .fetch_all(pool)
            .await
    }

    /// Inputs of one raster type sharing a tile, measurement day and orbit.
    ///
    /// Feeds the chain-continuity predicate with the candidate's group.
    pub async fn chain_group(
        pool: &PgPool,
        raster_type_id: i16,
        tile: &str,
        measurement_day: MeasurementDay,
        relative_orbit: i32,
    ) -> Result<Vec<RawInput>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM raw_inputs \
             WHERE raster_type_fk_id = $1 AND tile = $2 \
               AND measurement_day = $3 AND relative_orbit = $4 \
             ORDER BY input_path"
        );
        sqlx::query_as::<_, RawInput>(&query)
            .bind(raster_type_id)
            .bind(tile)
            .bind(measurement_day)
            .bind(relative_orbit)
            .fetch_all(pool)
            .await
    }

    /// Most recent input of one raster type on a tile measured strictly
    /// before `before_day` and no more than `lookback_days` earlier.
    ///
    /// Resolves the predecessor for routines that consume their own prior
    /// output.
    pub async fn latest_prior(
        pool: &PgPool,
        raster_type_id: i16,
        tile: &str,
        before_day: MeasurementDay,
        lookback_days: i32,
    ) -> Result<Option<RawInput>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM raw_inputs \
             WHERE raster_type_fk_id = $1 AND tile = $2 \
               AND measurement_day < $3 \
               AND TO_DATE(measurement_day::TEXT, 'YYYYMMDD') \
                   >= TO_DATE($3::TEXT, 'YYYYMMDD') - $4 \
             ORDER BY measurement_day DESC, harvest_date DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, RawInput>(&query)
            .bind(raster_type_id)
            .bind(tile)
            .bind(before_day)
            .bind(lookback_days)
            .fetch_optional(pool)
            .await
    }
}

//! Repository for the `products` table.

use sqlx::PgPool;

use cryoflow_core::types::DbId;

use crate::models::catalog::Product;
use crate::models::status::ProcessingStatus;

/// Column list for `products` queries.
const COLUMNS: &str = "id, processing_task_fk_id, product_path, creation_date";

/// Provides access to cataloged output products.
pub struct ProductRepo;

impl ProductRepo {
    /// Catalog the product of a finished task.
    ///
    /// One product per task, enforced by the unique constraint; a replay
    /// returns `None`.
    pub async fn insert(
        pool: &PgPool,
        task_id: DbId,
        product_path: &str,
    ) -> Result<Option<Product>, sqlx::Error> {
        let query = format!(
            "INSERT INTO products (processing_task_fk_id, product_path) \
             VALUES ($1, $2) \
             ON CONFLICT (processing_task_fk_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Product>(&query)
            .bind(task_id)
            .bind(product_path)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_for_task(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Option<Product>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM products WHERE processing_task_fk_id = $1");
        sqlx::query_as::<_, Product>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Tasks whose latest status is `processed` but that have no product
    /// row yet. The tracker catalogs these and closes the task.
    pub async fn processed_tasks_without_product(pool: &PgPool) -> Result<Vec<DbId>, sqlx::Error> {
        let rows: Vec<(DbId,)> = sqlx::query_as(
            "WITH latest AS ( \
                 SELECT DISTINCT ON (t2n.processing_task_fk_id) \
                        t2n.processing_task_fk_id AS task_id, \
                        psw.processing_status_fk_id AS status_id \
                 FROM processingtask2nomad t2n \
                 JOIN processing_status_workflow psw \
                   ON psw.nomad_job_dispatch_fk_id = t2n.nomad_job_dispatch_fk_id \
                 ORDER BY t2n.processing_task_fk_id, psw.date DESC, psw.id DESC \
             ) \
             SELECT l.task_id FROM latest l \
             WHERE l.status_id = $1 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM products p WHERE p.processing_task_fk_id = l.task_id \
               ) \
             ORDER BY l.task_id",
        )
        .bind(ProcessingStatus::Processed.id())
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

use serde_json::json;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;

use crate::cache::{CacheHandle, CacheLookup};
use crate::database::StoreError;
use crate::logging::logger;

use super::models::{Station, StationFilter};

#[derive(Debug, Error)]
pub enum ListError {
    #[error("page number must be 1 or greater")]
    InvalidPage,
    #[error("limit must be 1 or greater")]
    InvalidLimit,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Equality constraints applied to the unioned station set. The `page` slot
/// is shared: each filter that is applied writes it, so with both filters
/// present the genre value (applied last) is the one that sticks while the
/// language equality stays in force.
#[derive(Debug, Default, Clone, PartialEq)]
struct MatchCriteria {
    language: Option<String>,
    genre: Option<String>,
    page: Option<String>,
}

impl MatchCriteria {
    fn from_filter(filter: &StationFilter) -> Self {
        let mut criteria = Self::default();
        if let Some(language) = filter.language() {
            criteria.language = Some(language.to_string());
            criteria.page = Some(language.to_string());
        }
        if let Some(genre) = filter.genre() {
            criteria.genre = Some(genre.to_string());
            criteria.page = Some(genre.to_string());
        }
        criteria
    }
}

const PROJECTED_FIELDS: &str = "id, name, logo_url, stream_url, language, genre, page";

/// Projects both tables into the normalized seven-field shape, unions them
/// without deduplication, applies the match criteria, then skips and limits.
/// No sort stage: row order is whatever the union yields.
fn build_listing_query(
    criteria: &MatchCriteria,
    skip: i64,
    limit: i64,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT {PROJECTED_FIELDS} FROM (\
         SELECT {PROJECTED_FIELDS} FROM stations \
         UNION ALL \
         SELECT {PROJECTED_FIELDS} FROM partner_channels\
         ) AS united"
    ));

    let mut prefix = " WHERE ";
    if let Some(language) = &criteria.language {
        builder.push(prefix);
        builder.push("language = ");
        builder.push_bind(language.clone());
        prefix = " AND ";
    }
    if let Some(genre) = &criteria.genre {
        builder.push(prefix);
        builder.push("genre = ");
        builder.push_bind(genre.clone());
        prefix = " AND ";
    }
    if let Some(page) = &criteria.page {
        builder.push(prefix);
        builder.push("page = ");
        builder.push_bind(page.clone());
    }

    builder.push(" OFFSET ");
    builder.push_bind(skip);
    builder.push(" LIMIT ");
    builder.push_bind(limit);
    builder
}

/// Runs the union listing against the document store and owns the
/// cache-aside policy for the single cacheable query shape.
#[derive(Clone)]
pub struct StationQueryEngine {
    pool: PgPool,
    cache: CacheHandle,
    cache_key: String,
    cache_ttl_seconds: u64,
}

impl StationQueryEngine {
    pub fn new(pool: PgPool, cache: CacheHandle, cache_key: String, cache_ttl_seconds: u64) -> Self {
        Self {
            pool,
            cache,
            cache_key,
            cache_ttl_seconds,
        }
    }

    pub async fn list(&self, filter: &StationFilter) -> Result<Vec<Station>, ListError> {
        if filter.page < 1 {
            return Err(ListError::InvalidPage);
        }
        if filter.limit < 1 {
            return Err(ListError::InvalidLimit);
        }

        let cacheable = filter.is_cacheable();
        if cacheable {
            if let CacheLookup::Hit(raw) = self.cache.get(&self.cache_key).await {
                match serde_json::from_str::<Vec<Station>>(&raw) {
                    Ok(stations) => {
                        logger().info(
                            "stations.cache_hit",
                            json!({ "key": &self.cache_key, "count": stations.len() }),
                        );
                        return Ok(stations);
                    }
                    Err(error) => {
                        logger().warn(
                            "stations.cache_decode_error",
                            json!({ "key": &self.cache_key, "error": error.to_string() }),
                        );
                    }
                }
            }
        }

        let criteria = MatchCriteria::from_filter(filter);
        let skip = (filter.page - 1) * filter.limit;
        let mut query = build_listing_query(&criteria, skip, filter.limit);
        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        let stations = rows
            .into_iter()
            .map(row_to_station)
            .collect::<Result<Vec<_>, StoreError>>()?;

        if cacheable {
            match serde_json::to_string(&stations) {
                Ok(body) => {
                    logger().info(
                        "stations.cache_store",
                        json!({ "key": &self.cache_key, "ttlSeconds": self.cache_ttl_seconds }),
                    );
                    self.cache
                        .put(&self.cache_key, &body, self.cache_ttl_seconds)
                        .await;
                }
                Err(error) => {
                    logger().warn(
                        "stations.cache_encode_error",
                        json!({ "key": &self.cache_key, "error": error.to_string() }),
                    );
                }
            }
        }

        Ok(stations)
    }
}

fn row_to_station(row: PgRow) -> Result<Station, StoreError> {
    Ok(Station {
        id: row.try_get::<Option<String>, _>("id")?.unwrap_or_default(),
        name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
        logo_url: row.try_get("logo_url")?,
        // A missing stream URL is a data defect in the source row; it is
        // passed through rather than rejected at query time.
        stream_url: row
            .try_get::<Option<String>, _>("stream_url")?
            .unwrap_or_default(),
        language: row.try_get("language")?,
        genre: row.try_get("genre")?,
        page: row.try_get("page")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(language: Option<&str>, genre: Option<&str>, page: i64, limit: i64) -> StationFilter {
        StationFilter {
            language: language.map(str::to_string),
            genre: genre.map(str::to_string),
            page,
            limit,
        }
    }

    #[test]
    fn no_filters_yields_empty_criteria() {
        let criteria = MatchCriteria::from_filter(&filter(None, None, 1, 50));
        assert_eq!(criteria, MatchCriteria::default());
    }

    #[test]
    fn language_filter_also_constrains_the_page_slug() {
        let criteria = MatchCriteria::from_filter(&filter(Some("english"), None, 1, 50));
        assert_eq!(criteria.language.as_deref(), Some("english"));
        assert_eq!(criteria.page.as_deref(), Some("english"));
        assert!(criteria.genre.is_none());
    }

    #[test]
    fn genre_filter_also_constrains_the_page_slug() {
        let criteria = MatchCriteria::from_filter(&filter(None, Some("pop"), 3, 20));
        assert_eq!(criteria.genre.as_deref(), Some("pop"));
        assert_eq!(criteria.page.as_deref(), Some("pop"));
        assert!(criteria.language.is_none());
    }

    #[test]
    fn genre_overwrites_the_page_slug_when_both_filters_are_set() {
        let criteria = MatchCriteria::from_filter(&filter(Some("english"), Some("pop"), 1, 50));
        assert_eq!(criteria.language.as_deref(), Some("english"));
        assert_eq!(criteria.genre.as_deref(), Some("pop"));
        // Last write wins: the page constraint tracks the genre, while the
        // language equality is still enforced on its own.
        assert_eq!(criteria.page.as_deref(), Some("pop"));
    }

    #[test]
    fn listing_query_unions_both_tables_once() {
        let builder = build_listing_query(&MatchCriteria::default(), 0, 50);
        let sql = builder.sql();
        assert_eq!(sql.matches("UNION ALL").count(), 1);
        assert!(sql.contains("FROM stations"));
        assert!(sql.contains("FROM partner_channels"));
        assert!(!sql.contains("country"));
        assert!(!sql.contains("ORDER BY"));
        assert!(sql.contains("OFFSET"));
        assert!(sql.contains("LIMIT"));
    }

    #[test]
    fn listing_query_binds_all_three_constraints() {
        let criteria = MatchCriteria {
            language: Some("english".into()),
            genre: Some("pop".into()),
            page: Some("pop".into()),
        };
        let builder = build_listing_query(&criteria, 10, 10);
        let sql = builder.sql();
        assert!(sql.contains("language = $1"));
        assert!(sql.contains("genre = $2"));
        assert!(sql.contains("page = $3"));
        assert!(sql.contains("OFFSET $4"));
        assert!(sql.contains("LIMIT $5"));
    }

    #[test]
    fn unfiltered_query_has_no_where_clause() {
        let builder = build_listing_query(&MatchCriteria::default(), 50, 50);
        let sql = builder.sql();
        assert!(!sql.contains("WHERE"));
        assert!(sql.contains("OFFSET $1"));
        assert!(sql.contains("LIMIT $2"));
    }

    #[test]
    fn skip_count_follows_page_and_limit() {
        let filter = filter(None, None, 2, 10);
        assert_eq!((filter.page - 1) * filter.limit, 10);
        let filter = super::super::models::StationFilter::default();
        assert_eq!((filter.page - 1) * filter.limit, 0);
    }
}

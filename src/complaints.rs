use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::database::StoreError;

/// Intake status stamped on every new complaint.
const PENDING_STATUS: &str = "P";
const REFERENCE_PREFIX: &str = "GR-";

#[derive(Debug, Clone, Deserialize)]
pub struct NewComplaint {
    pub name: String,
    pub subject: String,
    pub email: String,
    pub contact: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Complaint {
    pub reference_no: String,
    pub name: String,
    pub subject: String,
    pub email: String,
    pub contact: String,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ComplaintStore {
    pool: PgPool,
}

impl ComplaintStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn submit(&self, complaint: &NewComplaint) -> Result<String, StoreError> {
        let reference_no = build_reference_no();
        sqlx::query(
            r#"
            INSERT INTO complaints (reference_no, name, subject, email, contact, description, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&reference_no)
        .bind(&complaint.name)
        .bind(&complaint.subject)
        .bind(&complaint.email)
        .bind(&complaint.contact)
        .bind(&complaint.description)
        .bind(PENDING_STATUS)
        .execute(&self.pool)
        .await?;
        Ok(reference_no)
    }

    pub async fn find(&self, reference_no: &str) -> Result<Option<Complaint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT reference_no, name, subject, email, contact, description, status, created_at
            FROM complaints
            WHERE reference_no = $1
            "#,
        )
        .bind(reference_no)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_complaint).transpose()
    }
}

fn row_to_complaint(row: PgRow) -> Result<Complaint, StoreError> {
    Ok(Complaint {
        reference_no: row.try_get("reference_no")?,
        name: row.try_get("name")?,
        subject: row.try_get("subject")?,
        email: row.try_get("email")?,
        contact: row.try_get("contact")?,
        description: row.try_get("description")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
    })
}

fn build_reference_no() -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!("{REFERENCE_PREFIX}{}", token[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_numbers_carry_the_prefix_and_eight_hex_chars() {
        let reference = build_reference_no();
        assert!(reference.starts_with("GR-"));
        assert_eq!(reference.len(), 11);
        assert!(reference[3..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn reference_numbers_are_distinct() {
        assert_ne!(build_reference_no(), build_reference_no());
    }
}

//! Family records behind residents and inquiries.

use sqlx::{Sqlite, Transaction};

use crate::error::{AppResult, OptionExt};
use crate::types::{Role, UserStatus};

/// Contact details used when a family has to be created on the fly.
#[derive(Debug, Clone, Default)]
pub struct FamilyContact {
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

/// Returns the family to attach a record to.
///
/// An explicit `family_id` must exist (404 otherwise). Without one, a family
/// whose user has the contact email is reused; failing that, a PENDING family
/// user is created as a placeholder.
pub async fn resolve_or_create(
    tx: &mut Transaction<'_, Sqlite>,
    family_id: Option<&str>,
    contact: &FamilyContact,
) -> AppResult<String> {
    if let Some(family_id) = family_id {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM families WHERE id = ?1")
            .bind(family_id)
            .fetch_optional(&mut **tx)
            .await?;
        return id.ok_or_not_found("family");
    }

    let email = contact.email.as_deref().map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty());
    let mut user_email = None;
    if let Some(email) = &email {
        let existing: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT u.id, f.id FROM users u LEFT JOIN families f ON f.user_id = u.id WHERE u.email = ?1",
        )
        .bind(email)
        .fetch_optional(&mut **tx)
        .await?;
        match existing {
            Some((_, Some(family_id))) => return Ok(family_id),
            // Email belongs to a non-family account; keep it off the placeholder.
            Some((_, None)) => {}
            None => user_email = Some(email.clone()),
        }
    }

    let user_id = uuid::Uuid::new_v4().to_string();
    let email = user_email.unwrap_or_else(|| format!("placeholder+{}@families.invalid", user_id));
    sqlx::query(
        "INSERT INTO users (id, email, first_name, last_name, phone, role, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&user_id)
    .bind(&email)
    .bind(contact.first_name.trim())
    .bind(contact.last_name.trim())
    .bind(&contact.phone)
    .bind(Role::Family.as_str())
    .bind(UserStatus::Pending.as_str())
    .execute(&mut **tx)
    .await?;

    let family_id = uuid::Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO families (id, user_id) VALUES (?1, ?2)")
        .bind(&family_id)
        .bind(&user_id)
        .execute(&mut **tx)
        .await?;
    tracing::info!(%family_id, %user_id, "placeholder family created");
    Ok(family_id)
}

/// Splits a contact name into first and last name; a single word is both.
pub fn split_name(full: &str) -> (String, String) {
    let full = full.trim();
    match full.rsplit_once(char::is_whitespace) {
        Some((first, last)) => (first.trim().to_string(), last.to_string()),
        None => (full.to_string(), full.to_string()),
    }
}

use crate::categories::{BrowserData, LocationData, PersonalInfo};
use crate::consent::DataType;
use crate::storage::{self, NewUser};
use chrono::Utc;
use miette::{IntoDiagnostic, Result};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::fs;

/// User definition from JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefinition {
    /// Login email (unique identifier)
    pub email: String,
    pub name: String,
    /// Plain text password (will be hashed); only used when creating
    pub password: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub personal_info: Option<PersonalInfo>,
    #[serde(default)]
    pub location_data: Option<LocationData>,
    #[serde(default)]
    pub browser_data: Option<BrowserData>,
}

fn default_true() -> bool {
    true
}

/// Root structure of the users JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersFile {
    pub users: Vec<UserDefinition>,
}

/// Sync users from a JSON file to the database (idempotent)
pub async fn sync_users_from_file(db: &DatabaseConnection, file_path: &str) -> Result<()> {
    tracing::info!("Loading users from {}", file_path);

    let content = fs::read_to_string(file_path)
        .into_diagnostic()
        .map_err(|e| miette::miette!("Failed to read users file at '{}': {}", file_path, e))?;

    let users_file: UsersFile = serde_json::from_str(&content)
        .into_diagnostic()
        .map_err(|e| {
            miette::miette!(
                "Failed to parse users JSON file: {}\n\nExpected format:\n{{\n  \"users\": [\n    {{\n      \"email\": \"alice@example.com\",\n      \"name\": \"Alice\",\n      \"password\": \"secure-password\",\n      \"isAdmin\": false,\n      \"personalInfo\": {{ \"firstName\": \"Alice\", \"lastName\": \"Smith\" }}\n    }}\n  ]\n}}",
                e
            )
        })?;

    tracing::info!("Found {} user(s) in file", users_file.users.len());

    let mut created = 0;
    let mut updated = 0;
    let mut unchanged = 0;

    for user_def in users_file.users {
        match sync_user(db, &user_def).await? {
            SyncResult::Created => created += 1,
            SyncResult::Updated => updated += 1,
            SyncResult::Unchanged => unchanged += 1,
        }
    }

    tracing::info!(
        "User sync complete: {} created, {} updated, {} unchanged",
        created,
        updated,
        unchanged
    );

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum SyncResult {
    Created,
    Updated,
    Unchanged,
}

/// Sync a single user (idempotent)
async fn sync_user(db: &DatabaseConnection, user_def: &UserDefinition) -> Result<SyncResult> {
    let now = Utc::now().timestamp();
    let existing = storage::get_user_by_email(db, &user_def.email)
        .await
        .into_diagnostic()?;

    let (subject, mut result) = match existing {
        None => {
            tracing::info!("Creating user: {}", user_def.email);
            let user = storage::create_user(
                db,
                &NewUser {
                    name: user_def.name.clone(),
                    email: user_def.email.clone(),
                    password: user_def.password.clone(),
                    is_admin: user_def.is_admin,
                },
                now,
            )
            .await
            .into_diagnostic()?;

            if !user_def.enabled {
                storage::update_user(db, &user.subject, &user.name, user_def.is_admin, false)
                    .await
                    .into_diagnostic()?;
            }
            (user.subject, SyncResult::Created)
        }
        Some(existing_user) => {
            let matches = existing_user.name == user_def.name
                && (existing_user.is_admin == 1) == user_def.is_admin
                && (existing_user.enabled == 1) == user_def.enabled;

            if matches {
                (existing_user.subject, SyncResult::Unchanged)
            } else {
                tracing::info!("Updating user: {}", user_def.email);
                storage::update_user(
                    db,
                    &existing_user.subject,
                    &user_def.name,
                    user_def.is_admin,
                    user_def.enabled,
                )
                .await
                .into_diagnostic()?;
                (existing_user.subject, SyncResult::Updated)
            }
        }
    };

    // Sync category documents
    let documents = [
        (
            DataType::PersonalInfo,
            user_def.personal_info.as_ref().map(serde_json::to_value),
        ),
        (
            DataType::LocationData,
            user_def.location_data.as_ref().map(serde_json::to_value),
        ),
        (
            DataType::BrowserData,
            user_def.browser_data.as_ref().map(serde_json::to_value),
        ),
    ];
    for (data_type, doc) in documents {
        let Some(doc) = doc else { continue };
        let doc = doc.into_diagnostic()?;
        let stored = storage::get_attribute(db, &subject, data_type)
            .await
            .into_diagnostic()?;
        if stored.as_ref() == Some(&doc) {
            continue;
        }

        storage::set_attribute(db, &subject, data_type, &doc, now)
            .await
            .into_diagnostic()?;
        tracing::debug!("Synced {} for user {}", data_type, user_def.email);
        if result == SyncResult::Unchanged {
            result = SyncResult::Updated;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let db_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_url = format!("sqlite://{}?mode=rwc", db_file.path().display());
        let db = Database::connect(&db_url).await.expect("Failed to connect");
        migration::Migrator::up(&db, None)
            .await
            .expect("Failed to run migrations");

        let users_file = NamedTempFile::new().expect("Failed to create temp file");
        fs::write(
            users_file.path(),
            r#"{
  "users": [
    {
      "email": "Alice@Example.com",
      "name": "Alice",
      "password": "pw",
      "isAdmin": true,
      "personalInfo": { "firstName": "Alice", "lastName": "Smith" },
      "browserData": { "language": "en", "recentWebsites": ["/a"] }
    }
  ]
}"#,
        )
        .expect("Failed to write users file");
        let path = users_file.path().to_str().expect("Invalid path");

        sync_users_from_file(&db, path).await.expect("First sync failed");
        sync_users_from_file(&db, path).await.expect("Second sync failed");

        let user = storage::get_user_by_email(&db, "alice@example.com")
            .await
            .expect("Query failed")
            .expect("User missing");
        assert_eq!(user.is_admin, 1);

        let browser = storage::get_attribute(&db, &user.subject, DataType::BrowserData)
            .await
            .expect("Query failed")
            .expect("Browser data missing");
        assert_eq!(browser["language"], "en");

        let def = UserDefinition {
            email: "alice@example.com".to_string(),
            name: "Alice".to_string(),
            password: "ignored".to_string(),
            enabled: true,
            is_admin: true,
            personal_info: None,
            location_data: None,
            browser_data: None,
        };
        assert_eq!(sync_user(&db, &def).await.unwrap(), SyncResult::Unchanged);

        let demoted = UserDefinition {
            is_admin: false,
            ..def
        };
        assert_eq!(sync_user(&db, &demoted).await.unwrap(), SyncResult::Updated);

        let with_location = UserDefinition {
            location_data: Some(LocationData {
                home_address: Some("1 Main St".to_string()),
                ..Default::default()
            }),
            ..demoted
        };
        assert_eq!(
            sync_user(&db, &with_location).await.unwrap(),
            SyncResult::Updated
        );
        assert_eq!(
            sync_user(&db, &with_location).await.unwrap(),
            SyncResult::Unchanged
        );

        let location = storage::get_attribute(&db, &user.subject, DataType::LocationData)
            .await
            .expect("Query failed")
            .expect("Location data missing");
        assert_eq!(location["homeAddress"], "1 Main St");
    }
}

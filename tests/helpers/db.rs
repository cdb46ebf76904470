use super::builders::UserBuilder;
use super::clock::ManualClock;
use custodian::auth::Caller;
use custodian::lifecycle::ConsentService;
use custodian::settings::Settings;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// A consent service over a fresh database and a manual clock.
pub struct TestApp {
    pub db: TestDb,
    pub clock: Arc<ManualClock>,
    pub service: ConsentService,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_settings(Settings::default()).await
    }

    pub async fn with_settings(settings: Settings) -> Self {
        let db = TestDb::new().await;
        let clock = ManualClock::new(ManualClock::starting_point());
        let service = ConsentService::new(db.connection().clone(), clock.clone(), &settings);
        Self { db, clock, service }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.connection()
    }

    pub fn now(&self) -> i64 {
        use custodian::clock::Clock;
        self.clock.now().timestamp()
    }

    /// Creates a plain user and returns it as a caller.
    pub async fn caller(&self, email: &str) -> Caller {
        let user = UserBuilder::new(email).create(self.connection()).await;
        Caller {
            subject: user.subject,
            is_admin: user.is_admin == 1,
        }
    }
}

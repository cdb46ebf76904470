use clap::Parser;
use custodian::lifecycle::ConsentService;
use custodian::settings::{Admin, Settings};
use custodian::storage::{self, NewUser};
use custodian::{clock, jobs, user_sync, web};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "custodian",
    version,
    about = "Consent lifecycle service with an append-only audit trail"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Sync users from a JSON file before starting
    #[arg(long)]
    sync_users: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database, migrations applied)
    let db = storage::init(&settings.database).await?;

    if let Some(path) = &cli.sync_users {
        user_sync::sync_users_from_file(&db, path).await?;
    }

    ensure_admin(&db, &settings.admin).await?;

    // keep the scheduler handle alive for the lifetime of the server
    let _scheduler = jobs::init_scheduler(db.clone(), &settings.consent).await?;

    let service = ConsentService::new(db, clock::system(), &settings);
    web::serve(settings, service).await?;
    Ok(())
}

async fn ensure_admin(db: &sea_orm::DatabaseConnection, admin: &Admin) -> Result<()> {
    let (Some(email), Some(password)) = (&admin.email, &admin.password) else {
        return Ok(());
    };

    match storage::get_user_by_email(db, email).await.into_diagnostic()? {
        Some(user) if user.is_admin == 1 => {}
        Some(user) => {
            storage::update_user(db, &user.subject, &user.name, true, user.enabled == 1)
                .await
                .into_diagnostic()?;
            tracing::info!(%email, "Promoted existing user to administrator");
        }
        None => {
            storage::create_user(
                db,
                &NewUser {
                    name: "Administrator".to_string(),
                    email: email.clone(),
                    password: password.clone(),
                    is_admin: true,
                },
                chrono::Utc::now().timestamp(),
            )
            .await
            .into_diagnostic()?;
            tracing::info!(%email, "Created bootstrap administrator");
        }
    }
    Ok(())
}

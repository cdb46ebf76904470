use crate::entities;
use crate::errors::CustodianError;
use crate::settings::Consent as ConsentCfg;
use crate::{storage, sweeper};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub const SWEEP_EXPIRED_CONSENTS: &str = "sweep_expired_consents";
pub const CLEANUP_EXPIRED_ACCESS_TOKENS: &str = "cleanup_expired_access_tokens";

pub const JOB_NAMES: [&str; 2] = [SWEEP_EXPIRED_CONSENTS, CLEANUP_EXPIRED_ACCESS_TOKENS];

pub type JobExecution = entities::job_execution::Model;

const STATUS_RUNNING: &str = "running";
const STATUS_SUCCEEDED: &str = "succeeded";
const STATUS_FAILED: &str = "failed";

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(
    db: DatabaseConnection,
    consent: &ConsentCfg,
) -> Result<JobScheduler, CustodianError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| CustodianError::Other(format!("Failed to create job scheduler: {}", e)))?;

    let mut scheduled = 0;

    if consent.background_sweep {
        add_job(&sched, &db, &consent.sweep_schedule, SWEEP_EXPIRED_CONSENTS).await?;
        scheduled += 1;
    } else {
        info!("Background consent sweep disabled; relying on read-path sweeps");
    }

    // Hourly, on the hour
    add_job(&sched, &db, "0 0 * * * *", CLEANUP_EXPIRED_ACCESS_TOKENS).await?;
    scheduled += 1;

    sched
        .start()
        .await
        .map_err(|e| CustodianError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!("Job scheduler started with {} jobs", scheduled);

    Ok(sched)
}

async fn add_job(
    sched: &JobScheduler,
    db: &DatabaseConnection,
    schedule: &str,
    job_name: &'static str,
) -> Result<(), CustodianError> {
    let db = db.clone();
    let job = Job::new_async(schedule, move |_uuid, _l| {
        let db = db.clone();
        Box::pin(async move {
            info!("Running {} job", job_name);
            if let Err(e) = run_recorded(&db, job_name).await {
                error!("Job {} could not be recorded: {}", job_name, e);
            }
        })
    })
    .map_err(|e| CustodianError::Other(format!("Failed to create {} job: {}", job_name, e)))?;

    sched
        .add(job)
        .await
        .map_err(|e| CustodianError::Other(format!("Failed to add {} job: {}", job_name, e)))?;
    Ok(())
}

async fn run_job(db: &DatabaseConnection, job_name: &str) -> Result<u64, CustodianError> {
    let now = Utc::now().timestamp();
    match job_name {
        SWEEP_EXPIRED_CONSENTS => sweeper::sweep_expired_consents(db, now).await,
        CLEANUP_EXPIRED_ACCESS_TOKENS => storage::cleanup_expired_access_tokens(db, now).await,
        _ => Err(CustodianError::NotFound(format!("Unknown job name: {}", job_name))),
    }
}

/// Runs a job between a start and a completion record. The job's own
/// failure ends up on the execution row; only bookkeeping errors propagate.
async fn run_recorded(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<JobExecution, CustodianError> {
    let execution_id = start_job_execution(db, job_name).await?;

    match run_job(db, job_name).await {
        Ok(count) => {
            info!("Job {} completed: {} records", job_name, count);
            complete_job_execution(db, execution_id, true, None, Some(count as i64)).await
        }
        Err(e) => {
            error!("Job {} failed: {}", job_name, e);
            complete_job_execution(db, execution_id, false, Some(e.to_string()), None).await
        }
    }
}

/// Record the start of a job execution
pub async fn start_job_execution(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<i64, CustodianError> {
    use entities::job_execution;

    let now = Utc::now().timestamp();

    let execution = job_execution::ActiveModel {
        job_name: Set(job_name.to_string()),
        started_at: Set(now),
        completed_at: Set(None),
        status: Set(STATUS_RUNNING.to_string()),
        error_message: Set(None),
        records_processed: Set(None),
        ..Default::default()
    };

    let result = execution.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job execution
pub async fn complete_job_execution(
    db: &DatabaseConnection,
    execution_id: i64,
    success: bool,
    error_message: Option<String>,
    records_processed: Option<i64>,
) -> Result<JobExecution, CustodianError> {
    use entities::job_execution::{Column, Entity};

    let now = Utc::now().timestamp();

    let execution = Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
        .ok_or_else(|| {
            CustodianError::NotFound(format!("Job execution not found: {}", execution_id))
        })?;

    let mut active: entities::job_execution::ActiveModel = execution.into_active_model();
    active.completed_at = Set(Some(now));
    active.status = Set(if success { STATUS_SUCCEEDED } else { STATUS_FAILED }.to_string());
    active.error_message = Set(error_message);
    active.records_processed = Set(records_processed);
    Ok(active.update(db).await?)
}

/// Manually trigger a job by name (admin API)
pub async fn trigger_job_manually(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<JobExecution, CustodianError> {
    if !JOB_NAMES.contains(&job_name) {
        return Err(CustodianError::NotFound(format!(
            "Unknown job name: {}",
            job_name
        )));
    }
    info!("Manually triggering job: {}", job_name);
    run_recorded(db, job_name).await
}

/// Most recent executions first
pub async fn list_job_executions(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<JobExecution>, CustodianError> {
    use entities::job_execution::{Column, Entity};

    Ok(Entity::find()
        .order_by_desc(Column::StartedAt)
        .order_by_desc(Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}

//! Status command implementation

use crate::error::Result;
use crate::meta::{JobRecord, MetaDb};

/// Fetch one job by id.
pub async fn cmd_job_status(meta: &MetaDb, job_id: &str) -> Result<JobRecord> {
    meta.get_job(job_id).await
}

/// List all jobs, newest first.
pub async fn cmd_list_jobs(meta: &MetaDb) -> Result<Vec<JobRecord>> {
    meta.list_jobs().await
}

/// Print one job's state.
pub fn print_job_status(job: &JobRecord) {
    println!("Job {}", job.id);
    println!("  Video:    {}", job.video_id);
    println!("  Status:   {}", job.status);
    println!("  Progress: {}%", job.progress);
    if let Some(message) = &job.message {
        println!("  Stage:    {message}");
    }
    if let Some(error) = &job.error {
        println!("  Error:    {error}");
    }
    println!("  Updated:  {}", job.updated_at);
}

/// Print the job listing.
pub fn print_job_list(jobs: &[JobRecord]) {
    if jobs.is_empty() {
        println!("No indexing jobs.");
        return;
    }
    for job in jobs {
        println!(
            "{}  {:<10} {:>3}%  {}",
            job.id, job.status, job.progress, job.video_id
        );
    }
}

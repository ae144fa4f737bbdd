//! Index command implementation

use crate::error::Result;
use crate::index::IndexingPipeline;
use crate::meta::{JobRecord, MetaDb};
use crate::progress::add_job_bar;
use std::path::Path;
use std::time::Duration;

/// Submit and run an indexing job in-process, driving a progress bar from the
/// job row while the pipeline works.
pub async fn cmd_index(
    pipeline: &IndexingPipeline,
    meta: &MetaDb,
    source: &Path,
    show_bar: bool,
) -> Result<JobRecord> {
    let job = pipeline.submit(source).await?;

    let bar_task = show_bar.then(|| {
        let meta = meta.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            let bar = add_job_bar(100);
            loop {
                match meta.get_job(&job_id).await {
                    Ok(row) => {
                        bar.set_position(row.progress.clamp(0, 100) as u64);
                        if let Some(message) = &row.message {
                            bar.set_message(message.clone());
                        }
                        if row.get_status().map(|s| s.is_terminal()).unwrap_or(true) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            bar.finish_and_clear();
        })
    });

    let run_result = pipeline.run(&job.id).await;

    if let Some(task) = bar_task {
        let _ = task.await;
    }
    run_result?;

    meta.get_job(&job.id).await
}

/// Print the terminal job summary.
pub fn print_index_result(job: &JobRecord) {
    match job.status.as_str() {
        "completed" => {
            println!("✓ Indexed video '{}' (job {})", job.video_id, job.id);
        }
        _ => {
            println!("✗ Indexing job {} ended in '{}'", job.id, job.status);
            if let Some(error) = &job.error {
                println!("  Error: {error}");
            }
        }
    }
}

//! Submits a handful of grouped tasks and prints their results.
//!
//! Usage: `group_demo [config.yaml]`

use anyhow::Result;
use group_executor::{ExecutorConfig, Task, TaskExecutor, TaskGroup, TaskId, TaskKind};
use std::time::{Duration, Instant};
use tracing::info;

fn sleeping_task(group: TaskGroup, kind: TaskKind, sleep_ms: u64, value: i32) -> Task<i32> {
    Task::blocking(TaskId::random(), group, kind, move || {
        std::thread::sleep(Duration::from_millis(sleep_ms));
        Ok(value)
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ExecutorConfig::from_yaml_file(path)?,
        None => ExecutorConfig::new(5),
    };
    let executor = TaskExecutor::with_config(config)?;

    let group1 = TaskGroup::random();
    let group2 = TaskGroup::random();
    info!(group1 = %group1.id(), group2 = %group2.id(), "Submitting tasks");

    let started = Instant::now();
    let handles = vec![
        executor.submit_task(sleeping_task(group1, TaskKind::Read, 2000, 1))?,
        executor.submit_task(sleeping_task(group1, TaskKind::Write, 1000, 2))?,
        executor.submit_task(sleeping_task(group2, TaskKind::Read, 500, 3))?,
        executor.submit_task(sleeping_task(group1, TaskKind::Write, 1000, 4))?,
        executor.submit_task(sleeping_task(group2, TaskKind::Read, 500, 5))?,
    ];

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await?;
        println!(
            "Task {} result: {} (after {} ms)",
            i + 1,
            result,
            started.elapsed().as_millis()
        );
    }

    let status = executor.shutdown_gracefully().await;
    info!(%status, "Executor shut down");
    Ok(())
}

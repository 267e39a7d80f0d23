use crate::output;
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use colored::Colorize;
use resflow_container::ReconcileReport;
use tokio::sync::{mpsc, watch};

/// Reconcile every container on its timer until Ctrl-C
///
/// The state snapshot is written after each pass that reached the channel.
pub async fn handle(runtime: Runtime) -> Result<()> {
    if runtime.served.is_empty() {
        println!("{}", "No containers configured".yellow());
        return runtime.close().await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (pass_tx, mut pass_rx) = mpsc::channel::<(String, Vec<ReconcileReport>)>(16);

    let mut loops = Vec::with_capacity(runtime.served.len());
    for served in &runtime.served {
        let container = served.container.clone();
        let name = container.container_info().name.clone();
        let (tx, mut rx) = mpsc::channel(4);
        let forward = pass_tx.clone();
        loops.push(tokio::spawn(
            container.run_reconcile_loop(shutdown_rx.clone(), Some(tx)),
        ));
        // tag each pass with its container before it reaches the writer
        tokio::spawn(async move {
            while let Some(reports) = rx.recv().await {
                if forward.send((name.clone(), reports)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(pass_tx);

    println!(
        "{} {} container(s), Ctrl-C to stop",
        "Reconciling".green().bold(),
        runtime.served.len()
    );

    loop {
        tokio::select! {
            Some((name, reports)) = pass_rx.recv() => {
                if reports.iter().any(|r| !r.is_clean()) {
                    output::print_reports(&name, &reports);
                }
                if let Err(e) = runtime.save().await {
                    tracing::error!(error = %e, "Failed to save state");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                println!("{}", "Shutting down...".yellow());
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    for handle in loops {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Reconcile loop aborted");
        }
    }

    runtime.close().await?;
    println!("{}", "State saved".green());
    Ok(())
}

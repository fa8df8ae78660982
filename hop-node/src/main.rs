//! Hopping Radio Net Node
//!
//! Runs every member of a half-duplex hopping radio net over a simulated
//! air until the configured run time expires or Ctrl-C is pressed.
//!
//! ```text
//! hopnode [settings.json]
//! hopnode --write-settings <settings.json>
//! ```

mod app;
mod runner;
mod settings;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use app::{AppManager, AppReport};
use settings::Settings;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hopnode=info,hop_plan=info,hop_link=info,hop_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args_os().skip(1);
    let settings = match args.next() {
        Some(flag) if flag == "--write-settings" => {
            let path = PathBuf::from(args.next().context("--write-settings needs a path")?);
            Settings::default().save(&path)?;
            info!("Default settings written to {}", path.display());
            return Ok(());
        }
        Some(path) => Settings::load(&PathBuf::from(path))?,
        None => Settings::default(),
    };

    let app = AppManager::new(Duration::from_secs(settings.run_time));
    app.report(AppReport::Started);
    info!(
        "Net {:?} (basestation {}), run time {}s",
        settings.net.node_ids,
        settings.net.basestation_id,
        app.run_time().as_secs()
    );

    let signal_app = app.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, draining");
            signal_app.terminate();
        }
    });

    let summaries = runner::run_net(&settings, &app).await?;
    for summary in &summaries {
        app.report(AppReport::ScheduleCount {
            node: summary.node_id,
            schedules: summary.epochs,
        });
        info!("{}", summary);
    }
    app.report(AppReport::FinalizationDone);
    Ok(())
}

use std::sync::Arc;

use tracing::info;

use crate::{
    cache::AddressCache,
    dns::aliyun::AliyunConnector,
    intake::Intake,
    server::{auth::PasswordGate, App},
    settings::{LogFormat, Settings},
};

mod cache;
mod dns;
mod intake;
mod reconciler;
mod server;
mod settings;
mod target;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Settings::new()?;

    match cfg.log_format {
        LogFormat::Text => {
            let subscriber = tracing_subscriber::FmtSubscriber::new();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::fmt().json().finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    run(cfg).await
}

async fn run(cfg: Settings) -> Result<(), Box<dyn std::error::Error>> {
    match &cfg.source {
        Some(path) => info!(path = %path.display(), "loaded configuration"),
        None => info!("no configuration file found, using defaults"),
    }

    let targets = cfg.targets();
    if targets.is_empty() {
        info!("no aliyun hosts configured, addresses are cached only");
    } else {
        info!(hosts = targets.len(), "loaded aliyun hosts");
    }

    let cache = Arc::new(AddressCache::new(cfg.freshness_window()?));
    let connector = AliyunConnector::new(cfg.provider_timeout()?);
    let intake = Intake::new(Arc::clone(&cache), Arc::new(targets), Arc::new(connector));

    let gate = PasswordGate::new(cfg.password.clone(), cfg.source.clone());
    let app = Arc::new(App::new(intake, cache, gate, cfg.trust_forwarded_headers));

    Ok(server::serve(cfg.listen, app).await?)
}

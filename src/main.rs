use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use feedforge::config::{AppConfig, ConfigOverrides};
use feedforge::logging::init_logging;
use feedforge::{api, FeedForge};

#[actix_web::main]
async fn main() -> Result<()> {
    let mut config = AppConfig::load().await?;
    ConfigOverrides::apply(&mut config);

    init_logging(&config.logging)?;
    info!("FeedForge {} starting", env!("CARGO_PKG_VERSION"));

    config.ensure_directories().await?;

    let core = Arc::new(FeedForge::new(config.clone()).await?);
    let bind_addr = (config.api.host.clone(), config.api.port);
    info!("API listening on {}:{}", bind_addr.0, bind_addr.1);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(Arc::clone(&core)))
            .configure(api::configure_routes)
    })
    .bind(bind_addr)?
    .run()
    .await?;

    Ok(())
}

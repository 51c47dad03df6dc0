//! actix-web server wiring.

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use tracing::info;

use super::handlers;
use crate::util::env::{env_opt, env_parse, init_env};

pub struct ApiServer {
    pub host: String,
    pub port: u16,
}

impl ApiServer {
    pub fn from_env() -> Result<Self> {
        init_env();
        let host = env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = env_parse("PORT", 8080);
        Ok(Self { host, port })
    }

    pub async fn run(self) -> Result<()> {
        info!(host = %self.host, port = self.port, "starting http server");
        HttpServer::new(|| {
            App::new()
                .route("/", web::post().to(handlers::run_pipeline))
                .route("/", web::get().to(handlers::health_check))
                .route("/health", web::get().to(handlers::health_check))
        })
        .bind((self.host.as_str(), self.port))
        .context("binding http listener")?
        .run()
        .await
        .context("running http server")
    }
}

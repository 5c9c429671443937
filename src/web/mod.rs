use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use secrecy::SecretString;
use tracing::{info, warn};

use crate::config::Config;
use crate::voice::VoiceCore;

pub mod handlers;
pub mod metrics;
pub mod middleware;

use self::middleware::auth::create_router;

pub struct WebState {
    pub voice: Arc<VoiceCore>,
    pub admin_token: Option<SecretString>,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> &'static WebState {
    WEB_STATE
        .get()
        .expect("web state is not initialized before handler execution")
}

#[derive(Clone)]
pub struct WebServer {
    config: Arc<Config>,
}

impl WebServer {
    pub async fn new(config: Arc<Config>, voice: Arc<VoiceCore>) -> Result<Self> {
        let admin_token = config
            .web
            .admin_token
            .clone()
            .filter(|token| !token.is_empty())
            .map(SecretString::from);
        if admin_token.is_none() {
            warn!("web.admin_token is not set, the admin API is unauthenticated");
        }

        let _ = WEB_STATE.set(WebState {
            voice,
            admin_token,
            started_at: Instant::now(),
        });

        Ok(Self { config })
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.web.bind_address, self.config.web.port);
        info!("Starting web server on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(create_router()).await;

        Ok(())
    }
}

/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

mod directory;
mod signaling;

use signaling::{AppState, Relay};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    fn parse(raw: &str) -> Self {
        let list = raw
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if list.is_empty() || list.iter().any(|s| s == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(list)
        }
    }

    /// Clients without an `Origin` header (native ones) are always admitted.
    pub(crate) fn admits(&self, origin: Option<&str>) -> bool {
        match (self, origin) {
            (AllowedOrigins::Any, _) | (_, None) => true,
            (AllowedOrigins::List(list), Some(origin)) => {
                let origin = origin.trim_end_matches('/');
                list.iter().any(|o| o.eq_ignore_ascii_case(origin))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RelayConfig {
    pub bind: SocketAddr,
    pub allowed_origins: AllowedOrigins,
    pub outbound_queue: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cfg = load_config();
    let addr = cfg.bind;
    let state = AppState {
        relay: Arc::new(Relay::new(cfg.outbound_queue)),
        cfg: Arc::new(cfg),
    };
    let app = signaling::router(state);

    info!("roomdrop_relay listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

fn load_config() -> RelayConfig {
    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.trim().parse::<u16>().ok())
        .unwrap_or(3000);
    let bind = std::env::var("ROOMDROP_RELAY_BIND")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("0.0.0.0:{port}"));
    let bind: SocketAddr = bind.parse().expect("ROOMDROP_RELAY_BIND invalid");
    let allowed_origins = std::env::var("ROOMDROP_RELAY_ALLOWED_ORIGINS")
        .map(|v| AllowedOrigins::parse(&v))
        .unwrap_or(AllowedOrigins::Any);
    let outbound_queue = std::env::var("ROOMDROP_RELAY_OUTBOUND_QUEUE")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(256)
        .clamp(16, 4096);
    RelayConfig {
        bind,
        allowed_origins,
        outbound_queue,
    }
}

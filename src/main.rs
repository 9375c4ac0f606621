//! CLI for stanlisten
//!
//! Subcommands:
//! - `listen`: connect and run the ticket-created listener until interrupted
//! - `publish`: publish a single ticket-created event
//! - `demo`: run a publisher and a listener against an in-process server
//! - `serve`: expose an in-memory streaming server over WebSocket

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use stanlisten::broker::InMemoryStreamingServer;
use stanlisten::client::Connection;
use stanlisten::config::{Settings, load_config};
use stanlisten::events::TicketCreatedData;
use stanlisten::listener::{ListenerExt, TicketCreatedListener};
use stanlisten::publisher::{Publisher, TicketCreatedPublisher};
use stanlisten::transport::start_websocket_server;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "stanlisten")]
enum Command {
    /// Run the ticket-created listener
    Listen {
        /// Streaming server URL (overrides configuration)
        #[arg(long)]
        url: Option<String>,
    },
    /// Publish one ticket-created event
    Publish {
        /// Streaming server URL (overrides configuration)
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value = "123")]
        id: String,
        #[arg(long, default_value = "concert")]
        title: String,
        #[arg(long, default_value_t = 20.0)]
        price: f64,
    },
    /// Publish and listen against an in-process server
    Demo,
    /// Serve an in-memory streaming server over WebSocket
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:4222")]
        addr: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cmd = Command::parse();
    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            stanlisten::utils::logging::init("info");
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    stanlisten::utils::logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Listen { url } => run_listener(with_url(settings, url)).await,
        Command::Publish {
            url,
            id,
            title,
            price,
        } => run_publisher(with_url(settings, url), TicketCreatedData { id, title, price }).await,
        Command::Demo => run_demo(settings).await,
        Command::Serve { addr } => run_server(settings, &addr).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

fn with_url(mut settings: Settings, url: Option<String>) -> Settings {
    if let Some(url) = url {
        settings.nats.url = url;
    }
    settings
}

fn ticket_listener(settings: &Settings) -> Arc<TicketCreatedListener> {
    Arc::new(
        TicketCreatedListener::new()
            .with_ack_wait(Duration::from_millis(settings.listener.ack_wait_ms))
            .with_max_in_flight(settings.listener.max_in_flight),
    )
}

async fn run_listener(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let conn = Connection::connect(&settings.nats).await?;
    info!("Listener connected to NATS");

    ticket_listener(&settings).listen(&conn).await?;
    serve_until_shutdown(&conn).await
}

async fn run_publisher(
    settings: Settings,
    ticket: TicketCreatedData,
) -> Result<(), Box<dyn std::error::Error>> {
    let conn = Connection::connect(&settings.nats).await?;
    info!("Publisher connected to NATS");

    TicketCreatedPublisher.publish(&conn, &ticket).await?;
    conn.close().await?;
    Ok(())
}

async fn run_demo(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let server = InMemoryStreamingServer::new(settings.nats.cluster_id.clone());
    tokio::spawn(
        server
            .clone()
            .run_redelivery_loop(InMemoryStreamingServer::REDELIVERY_INTERVAL),
    );

    let conn = Connection::connect_in_memory(&server, settings.nats.client_id.clone())?;
    info!("Listener connected to in-process server");
    ticket_listener(&settings).listen(&conn).await?;

    let ticket = TicketCreatedData {
        id: "123".to_string(),
        title: "concert".to_string(),
        price: 20.0,
    };
    TicketCreatedPublisher.publish(&conn, &ticket).await?;

    serve_until_shutdown(&conn).await
}

async fn run_server(settings: Settings, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let server = InMemoryStreamingServer::new(settings.nats.cluster_id);
    tokio::spawn(
        server
            .clone()
            .run_redelivery_loop(InMemoryStreamingServer::REDELIVERY_INTERVAL),
    );

    tokio::select! {
        result = start_websocket_server(addr, server) => result?,
        _ = shutdown_signal() => info!("Shutdown signal received. Stopping server."),
    }
    Ok(())
}

/// Run until a shutdown signal arrives or the server drops the connection.
async fn serve_until_shutdown(conn: &Connection) -> Result<(), Box<dyn std::error::Error>> {
    tokio::select! {
        _ = conn.closed() => {
            info!("NATS connection closed");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received. Closing connection.");
            conn.close().await?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for interrupt: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for terminate: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

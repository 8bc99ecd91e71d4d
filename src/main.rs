mod bookings;
mod clients;
mod config;
mod dispatcher;
mod error;
mod lifecycle;
mod messaging;
mod models;
mod retry;
mod runner;
mod store;
mod templates;
#[cfg(test)]
mod testing;
mod timeout;
mod window;

use crate::bookings::PgBookingStore;
use crate::clients::{setup_db_pool, setup_http_client};
use crate::config::Config;
use crate::dispatcher::BookingReminderDispatcher;
use crate::error::StoreError;
use crate::lifecycle::{BookingAdminService, StatusTransitionNotifier};
use crate::messaging::{HttpEmailSink, Mailer, NotificationSink};
use crate::models::{Booking, RunSummary};
use crate::runner::DispatchRunner;
use crate::store::BookingStore;
use crate::window::ReminderWindowCalculator;

use std::sync::Arc;
use std::time::Duration;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, post, put, web};
use chrono::Utc;
use serde::Serialize;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("OK")
}

/// Runs a reminder pass on demand, outside the regular schedule.
#[post("/reminders/run")]
async fn run_reminders(runner: web::Data<DispatchRunner>) -> impl Responder {
    match runner.run(Utc::now()).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => HttpResponse::InternalServerError().json(RunSummary::aborted(e.to_string())),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingUpdateResponse {
    booking: Booking,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_warning: Option<String>,
}

#[put("/bookings/{id}")]
async fn update_booking(
    admin: web::Data<BookingAdminService>,
    path: web::Path<Uuid>,
    body: web::Json<Booking>,
) -> impl Responder {
    let booking = body.into_inner();
    if booking.id != path.into_inner() {
        return HttpResponse::BadRequest().body("Booking id does not match the path.");
    }

    match admin.update_booking(booking).await {
        Ok(outcome) => {
            let message = outcome.operator_message();
            HttpResponse::Ok().json(BookingUpdateResponse {
                message,
                notification_warning: outcome.notification.err().map(|w| w.to_string()),
                booking: outcome.booking,
            })
        }
        Err(StoreError::NotFound(id)) => HttpResponse::NotFound().body(format!("Booking {id} not found.")),
        Err(e) => {
            error!("Failed to update booking: {}", e);
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}

// Graceful shutdown signal future
async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate()).expect("Failed to install SIGTERM handler");
    #[cfg(unix)]
    let terminate = term_signal.recv();
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received. Exiting dispatch loop.");
}

/// Fires a reminder run on every tick. Runs are awaited in place, so a slow
/// run delays the next tick instead of overlapping it.
async fn run_dispatch_loop(runner: Arc<DispatchRunner>, interval_ms: u64) {
    info!(interval_ms, "Starting reminder dispatch timer...");
    let mut interval = time::interval(Duration::from_millis(interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match runner.run(Utc::now()).await {
                    Ok(summary) if summary.failed > 0 => {
                        warn!(failed = summary.failed, total = summary.total, "Some reminders were not completed.");
                    }
                    Ok(_) => {}
                    Err(e) => error!("Error during reminder run: {}", e),
                }
            },
            _ = &mut shutdown => {
                break;
            }
        }
    }
    info!("Dispatcher shutting down.");
}

fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // --- Configuration ---
    let config = Config::load()?;

    let _sentry = init_sentry(&config);
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();
    info!("Configuration loaded.");
    // --- End Configuration ---

    // 1. Connect to the Database
    info!("Connecting to database...");
    let db_pool = setup_db_pool(&config).await?;
    info!("Database connection established.");
    let store: Arc<dyn BookingStore> = Arc::new(PgBookingStore::new(db_pool));

    // 2. Setup the email transport
    let sink: Arc<dyn NotificationSink> = Arc::new(HttpEmailSink::new(
        setup_http_client(&config)?,
        config.email_api_url.clone(),
        config.email_api_key.clone(),
        config.email_from.clone(),
        config.email_enabled,
    ));
    if !config.email_enabled {
        warn!("Email transport disabled; notifications will not leave this process.");
    }
    let mailer = Arc::new(Mailer::new(
        sink,
        config.retry_policy(),
        config.default_timeout_ms,
        config.email_reply_to.clone(),
    ));

    // 3. Wire the reminder and lifecycle paths
    let offset = config.clinic_offset().ok_or("invalid clinic UTC offset")?;
    let runner = Arc::new(DispatchRunner::new(
        store.clone(),
        BookingReminderDispatcher::new(store.clone(), mailer.clone()),
        ReminderWindowCalculator::new(offset),
    ));
    let admin = Arc::new(BookingAdminService::new(
        store,
        StatusTransitionNotifier::new(mailer),
    ));

    let dispatch_handle = tokio::spawn(run_dispatch_loop(runner.clone(), config.dispatch_interval_ms));

    let runner_data = web::Data::from(runner);
    let admin_data = web::Data::from(admin);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(runner_data.clone())
            .app_data(admin_data.clone())
            .service(health_check)
            .service(run_reminders)
            .service(update_booking)
    })
    .bind(("0.0.0.0", config.http_port))?
    .run();

    info!(port = config.http_port, "HTTP server running.");

    // This will error out if either the server or the dispatch task fails
    let _ = tokio::try_join!(
        async { server.await },
        async { dispatch_handle.await.map_err(std::io::Error::other) }
    )?;

    Ok(())
}

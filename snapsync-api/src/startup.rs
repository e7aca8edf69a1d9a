use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{
    App, HttpResponse, HttpServer, dev::Server, error::InternalError, http::header::ContentType,
    web,
};
use actix_web_httpauth::middleware::HttpAuthentication;
use snapsync::concurrency::rate_limit::RateLimiter;
use snapsync::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use snapsync::concurrency::single_flight::SingleFlightGuard;
use snapsync::service::SyncService;
use tracing::info;
use tracing_actix_web::TracingLogger;

use crate::{
    authentication::auth_validator,
    config::ServerConfig,
    notifier::CallbackNotifier,
    routes::{
        ErrorMessage, health_check::health_check, rate_limit::rate_limit_stats,
        sync::trigger_sync,
    },
    trigger::{PostgresPipelineFactory, SyncTrigger},
};

pub struct Application {
    port: u16,
    server: Server,
    shutdown_tx: ShutdownTx,
}

impl Application {
    pub async fn build(config: ServerConfig) -> Result<Self, anyhow::Error> {
        config.validate()?;

        let address = format!("{}:{}", config.application.host, config.application.port);
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();

        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        limiter.clone().spawn_cleanup(shutdown_rx);

        let notifier = CallbackNotifier::new(config.callback_url.as_deref())?;
        if let Some(endpoint) = notifier.endpoint() {
            info!(endpoint, "completion callbacks enabled");
        }

        let service = SyncService::new(
            PostgresPipelineFactory::new(config.pipeline.clone(), config.destination.clone()),
            notifier,
            limiter,
            Arc::new(SingleFlightGuard::new()),
            Duration::from_secs(config.pipeline.load.run_timeout_secs),
        );

        let server = run(config, listener, Arc::new(service)).await?;

        Ok(Self {
            port,
            server,
            shutdown_tx,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        let result = self.server.await;
        self.shutdown_tx.shutdown();

        result
    }
}

pub async fn run(
    config: ServerConfig,
    listener: TcpListener,
    service: Arc<dyn SyncTrigger>,
) -> Result<Server, anyhow::Error> {
    let config = web::Data::new(config);
    let service: web::Data<dyn SyncTrigger> = web::Data::from(service);

    let server = HttpServer::new(move || {
        let authentication = HttpAuthentication::bearer(auth_validator);
        let json_config = web::JsonConfig::default().error_handler(|err, _req| {
            let body = ErrorMessage {
                error: err.to_string(),
            };
            let response = HttpResponse::BadRequest()
                .insert_header(ContentType::json())
                .json(body);
            InternalError::from_response(err, response).into()
        });

        App::new()
            .wrap(
                sentry::integrations::actix::Sentry::builder()
                    .capture_server_errors(true)
                    .start_transaction(true)
                    .finish(),
            )
            .wrap(TracingLogger::default())
            .service(health_check)
            .service(
                web::scope("v1")
                    .wrap(authentication)
                    .service(trigger_sync)
                    .service(rate_limit_stats),
            )
            .app_data(json_config)
            .app_data(config.clone())
            .app_data(service.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

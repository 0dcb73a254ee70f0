use actix::prelude::*;
use actix_session::storage::CookieSessionStore;
use actix_session::SessionMiddleware;
use actix_web::cookie::Key;
use actix_web::dev::Service;
use actix_web::http::header::{self, HeaderValue};
use actix_web::middleware::{NormalizePath, TrailingSlash};
use actix_web::{web::Data, App, HttpServer};
use anyhow::Context as AnyhowContext;
use mpstats_client::wb_card::WbCardClient;
use mpstats_client::MpstatsClient;
use rand::{distributions, Rng};
use std::env;
use std::io::Write;
use std::sync::Arc;
use tokio_rusqlite::Connection;
use wb_analytics::{
    access::repository::SqliteUserCredentialsRepository,
    ai::OpenAiClient,
    config::AppConfig,
    control, http_client,
    operation::{OperationRepository, SqliteOperationRepository},
    supply::SupplyPlanningService,
};
use wb_types::access::repository::UserCredentialsRepository;
use wb_types::access::service::UserCredentialsService;

fn load_env_file() -> Result<(), anyhow::Error> {
    match std::fs::File::open(".env") {
        Ok(_) => envmnt::load_file(".env")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            std::fs::File::create(".env")?;
            envmnt::load_file(".env")?;
        }
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to open .env file: {err}"));
        }
    }
    Ok(())
}

fn session_key(config: &AppConfig) -> Result<Key, anyhow::Error> {
    let secret = match &config.session_secret {
        Some(s) => s.clone(),
        None => {
            log::warn!("SESSION_SECRET is not set, generating a new one into .env");
            let key = rand::thread_rng()
                .sample_iter(distributions::Alphanumeric)
                .take(64)
                .map(char::from)
                .collect::<String>();
            let mut f = std::fs::File::options().append(true).open(".env")?;
            f.write_all(format!("\nSESSION_SECRET={key}\n").as_bytes())?;
            key
        }
    };
    Key::try_from(secret.as_bytes())
        .map_err(|err| anyhow::anyhow!("SESSION_SECRET must be at least 64 bytes: {err}"))
}

#[actix_web::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    load_env_file()?;
    let config = AppConfig::from_env()?;

    if let Some(dir) = std::path::Path::new(&config.database_path)
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Unable to create {}", dir.display()))?;
    }
    // Each repository owns its connection.
    let conn = Connection::open(&config.database_path).await?;
    let user_credentials_repository: Arc<dyn UserCredentialsRepository> =
        Arc::new(SqliteUserCredentialsRepository::init(conn).await?);
    let conn = Connection::open(&config.database_path).await?;
    let operation_repository: Arc<dyn OperationRepository> =
        Arc::new(SqliteOperationRepository::init(conn).await?);
    let user_credentials_service =
        UserCredentialsService::new(user_credentials_repository).start();

    let mpstats = Arc::new(MpstatsClient::new(
        config.mpstats.clone(),
        http_client(Some(config.mpstats_rpm))?,
    ));
    let cards = Arc::new(WbCardClient::new(
        config.wb_card_base_url.clone(),
        http_client(None)?,
    ));
    let planning = Data::new(SupplyPlanningService::new(mpstats, Some(cards)));
    let ai = Data::new(OpenAiClient::new(config.openai.clone(), http_client(None)?));

    let secret_key = session_key(&config)?;
    let allowed_origins = Arc::new(config.allowed_origins.clone());
    let bind = (config.bind_addr.clone(), config.port);
    log::info!("Listening on {}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        let allowed_origins = allowed_origins.clone();
        App::new()
            .wrap(control::SessionMiddlewareFactory {})
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), secret_key.clone())
                    .cookie_http_only(false)
                    .cookie_secure(false)
                    .build(),
            )
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .wrap_fn(move |req, srv| {
                let origin = req
                    .headers()
                    .get(header::ORIGIN)
                    .and_then(|o| o.to_str().ok())
                    .filter(|o| allowed_origins.iter().any(|a| a == o))
                    .and_then(|o| HeaderValue::from_str(o).ok());
                let fut = srv.call(req);
                async move {
                    let mut res = fut.await?;
                    if let Some(origin) = origin {
                        let headers = res.headers_mut();
                        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
                        headers.insert(
                            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                            HeaderValue::from_static("true"),
                        );
                        headers.insert(
                            header::ACCESS_CONTROL_ALLOW_METHODS,
                            HeaderValue::from_static("GET, POST, OPTIONS"),
                        );
                        headers.insert(
                            header::ACCESS_CONTROL_ALLOW_HEADERS,
                            HeaderValue::from_static("Content-Type, Authorization"),
                        );
                        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
                    }
                    Ok(res)
                }
            })
            .app_data(Data::new(user_credentials_service.clone()))
            .app_data(Data::new(operation_repository.clone()))
            .app_data(planning.clone())
            .app_data(ai.clone())
            .configure(control::routes)
    })
    .bind(bind.clone())
    .with_context(|| format!("Failed to bind server to {}:{}", bind.0, bind.1))?
    .run()
    .await?;
    Ok(())
}

use std::{future::IntoFuture, process, sync::Arc};

use threadline::{
    application::{
        activity::ActivityService,
        error::AppError,
        identity::{AuthService, IdentityVerifier},
        notifications::NotificationService,
        realtime::RealtimeHub,
        repos::{
            LikesRepo, LikesWriteRepo, NotificationsRepo, NotificationsWriteRepo, ThreadsRepo,
            ThreadsWriteRepo, UsersRepo, UsersWriteRepo,
        },
        threads::ThreadService,
        users::UserService,
    },
    config::{self, IdentityKey, IdentitySettings},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ApiRateLimiter, HttpState},
        telemetry,
        uploads::UploadStorage,
    },
};
use tokio::{signal, sync::oneshot};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    info!(
        target = "threadline::migrate",
        pool_size = repositories.pool().size(),
        "migrations applied"
    );
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let verifier = build_identity_verifier(&settings.identity).await?;
    let repositories = init_repositories(&settings).await?;
    let state = build_http_state(repositories, verifier, &settings)?;

    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "threadline::serve",
        addr = %settings.server.addr,
        "listening"
    );

    let grace = settings.server.graceful_shutdown;
    let (draining_tx, draining_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!(
                target = "threadline::serve",
                grace_seconds = grace.as_secs(),
                "draining connections"
            );
            let _ = draining_tx.send(());
        })
        .into_future();

    let deadline = async move {
        if draining_rx.await.is_ok() {
            tokio::time::sleep(grace).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = deadline => {
            warn!(
                target = "threadline::serve",
                "graceful shutdown deadline elapsed; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::migration(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn build_identity_verifier(
    identity: &IdentitySettings,
) -> Result<IdentityVerifier, AppError> {
    let key = identity.key.as_ref().ok_or_else(|| {
        AppError::from(InfraError::configuration(
            "identity.jwt_secret or identity.public_key_path must be set",
        ))
    })?;

    let verifier = match key {
        IdentityKey::SharedSecret(secret) => IdentityVerifier::hs256(secret),
        IdentityKey::PublicKeyPem(path) => {
            let pem = tokio::fs::read(path)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            IdentityVerifier::rs256_pem(&pem)
        }
    }
    .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    let mut verifier = verifier.with_leeway(identity.leeway_seconds);
    if let Some(issuer) = identity.issuer.as_deref() {
        verifier = verifier.with_issuer(issuer);
    }
    if let Some(audience) = identity.audience.as_deref() {
        verifier = verifier.with_audience(audience);
    }
    Ok(verifier)
}

fn build_http_state(
    repositories: Arc<PostgresRepositories>,
    verifier: IdentityVerifier,
    settings: &config::Settings,
) -> Result<HttpState, AppError> {
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let users_write_repo: Arc<dyn UsersWriteRepo> = repositories.clone();
    let threads_repo: Arc<dyn ThreadsRepo> = repositories.clone();
    let threads_write_repo: Arc<dyn ThreadsWriteRepo> = repositories.clone();
    let likes_repo: Arc<dyn LikesRepo> = repositories.clone();
    let likes_write_repo: Arc<dyn LikesWriteRepo> = repositories.clone();
    let notifications_repo: Arc<dyn NotificationsRepo> = repositories.clone();
    let notifications_write_repo: Arc<dyn NotificationsWriteRepo> = repositories.clone();

    let users = Arc::new(UserService::new(users_repo, users_write_repo));
    let notifications = Arc::new(
        NotificationService::new(
            notifications_repo.clone(),
            notifications_write_repo,
            threads_repo.clone(),
            users.clone(),
        )
        .with_dedup_window(settings.notifications.dedup_window),
    );
    let realtime = RealtimeHub::new(settings.realtime.capacity);
    let threads = Arc::new(ThreadService::new(
        threads_repo.clone(),
        threads_write_repo,
        likes_repo.clone(),
        likes_write_repo,
        users.clone(),
        notifications.clone(),
        realtime.clone(),
    ));
    let activity = Arc::new(ActivityService::new(
        threads_repo,
        likes_repo,
        notifications_repo,
        users.clone(),
    ));
    let auth = Arc::new(AuthService::new(Arc::new(verifier), users.clone()));

    let uploads = UploadStorage::new(
        settings.uploads.directory.clone(),
        settings.uploads.max_request_bytes.get(),
    )
    .map_err(|err| AppError::from(InfraError::from(err)))?;

    let rate_limiter = ApiRateLimiter::new(
        std::time::Duration::from_secs(u64::from(settings.rate_limit.window_seconds.get())),
        settings.rate_limit.max_requests.get(),
    );

    Ok(HttpState {
        threads,
        users,
        notifications,
        activity,
        auth,
        realtime,
        uploads: Arc::new(uploads),
        db: repositories,
        rate_limiter: Arc::new(rate_limiter),
        session_cookie: Arc::from(settings.identity.session_cookie.as_str()),
        feed_page_size: settings.feed.page_size.get(),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

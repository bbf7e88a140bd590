use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fxdash_core::alarms::{AlarmError, CheckReport};
use fxdash_core::analysis::analyze;
use fxdash_core::convert::{ConversionOutcome, ConversionRequest, ConvertError};
use fxdash_core::domain::alarm::{AlarmCondition, RateAlarm};
use fxdash_core::domain::conversion::ConversionRecord;
use fxdash_core::domain::currency::{Currency, CurrencyPair};
use fxdash_core::domain::rates::{RateAnalysis, RateHistory};
use fxdash_core::error::{FetchError, ValidationError};
use fxdash_core::forex::{ForexBar, DEFAULT_BAR_LIMIT};
use fxdash_core::news::{NewsCategory, NewsItem, SortOrder, DEFAULT_MAX_RESULTS};
use fxdash_core::rates::Granularity;
use fxdash_core::session::Session;
use fxdash_core::storage::favorites::{FavoritePair, DEFAULT_RECENT_LIMIT};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = fxdash_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    if let Err(e) = settings.require_exchange_rate_api_key() {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %e, "conversions disabled until the rate API key is set");
    }

    let session = Arc::new(Session::from_settings(&settings)?);
    let alarm_loop = session.start_alarm_loop().await;

    let state = AppState { session };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/currencies", get(list_currencies))
        .route("/convert", post(convert))
        .route("/conversions", get(list_conversions).delete(clear_conversions))
        .route("/rates/:from/:to/history", get(rate_history))
        .route("/alarms", get(list_alarms).post(create_alarm))
        .route("/alarms/check", post(check_alarms))
        .route("/alarms/:id", delete(delete_alarm))
        .route("/alarms/:id/toggle", post(toggle_alarm))
        .route("/favorites/pairs", get(list_favorite_pairs).post(add_favorite_pair))
        .route("/favorites/pairs/:from/:to", delete(remove_favorite_pair))
        .route("/news", get(search_news))
        .route("/news/headlines", get(top_headlines))
        .route(
            "/news/favorites",
            get(list_favorite_news)
                .post(add_favorite_news)
                .delete(remove_favorite_news),
        )
        .route("/forex/:from/:to", get(forex_daily))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    alarm_loop.shutdown().await;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    session: Arc<Session>,
}

/// JSON error body `{ "error": msg }` with a status picked from the failure kind.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, err.to_string())
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        let status = match &err {
            FetchError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            FetchError::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            FetchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FetchError::Auth
            | FetchError::Network(_)
            | FetchError::MissingRate(_)
            | FetchError::Malformed(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.user_message())
    }
}

impl From<ConvertError> for ApiError {
    fn from(err: ConvertError) -> Self {
        match err {
            ConvertError::Validation(err) => err.into(),
            ConvertError::Fetch(err) => err.into(),
        }
    }
}

impl From<AlarmError> for ApiError {
    fn from(err: AlarmError) -> Self {
        let status = match err {
            AlarmError::InvalidTarget(_) | AlarmError::SameCurrency(_) => StatusCode::BAD_REQUEST,
            AlarmError::Duplicate { .. } => StatusCode::CONFLICT,
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
struct CurrencyInfo {
    code: Currency,
}

async fn list_currencies() -> Json<Vec<CurrencyInfo>> {
    Json(Currency::ALL.iter().map(|&code| CurrencyInfo { code }).collect())
}

async fn convert(
    State(state): State<AppState>,
    Json(req): Json<ConversionRequest>,
) -> ApiResult<ConversionOutcome> {
    let outcome = state.session.converter.convert(req).await?;
    Ok(Json(outcome))
}

async fn list_conversions(State(state): State<AppState>) -> Json<Vec<ConversionRecord>> {
    Json((*state.session.conversions.snapshot()).clone())
}

async fn clear_conversions(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.session.conversions.clear()?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    monthly: bool,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    pair: CurrencyPair,
    history: RateHistory,
    analysis: Option<RateAnalysis>,
    analysis_error: Option<String>,
}

async fn rate_history(
    State(state): State<AppState>,
    Path((from, to)): Path<(String, String)>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<HistoryResponse> {
    let pair = CurrencyPair::parse(&from, &to)?;
    let granularity = if q.monthly {
        Granularity::Monthly
    } else {
        Granularity::Daily
    };

    let history = state.session.rates.history(pair, granularity).await?;
    let (analysis, analysis_error) = match analyze(history.points()) {
        Ok(analysis) => (Some(analysis), None),
        Err(err) => (None, Some(err.to_string())),
    };

    Ok(Json(HistoryResponse {
        pair,
        history,
        analysis,
        analysis_error,
    }))
}

async fn list_alarms(State(state): State<AppState>) -> Json<Vec<RateAlarm>> {
    Json((*state.session.alarms.list()).clone())
}

#[derive(Debug, Deserialize)]
struct CreateAlarm {
    from: String,
    to: String,
    target_rate: f64,
    condition: AlarmCondition,
}

async fn create_alarm(
    State(state): State<AppState>,
    Json(body): Json<CreateAlarm>,
) -> Result<(StatusCode, Json<RateAlarm>), ApiError> {
    let pair = CurrencyPair::parse(&body.from, &body.to)?;
    let alarm = state
        .session
        .alarms
        .add(pair, body.target_rate, body.condition)?;
    Ok((StatusCode::CREATED, Json(alarm)))
}

async fn delete_alarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.session.alarms.delete(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("alarm"))
    }
}

async fn toggle_alarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RateAlarm> {
    state
        .session
        .alarms
        .toggle(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("alarm"))
}

async fn check_alarms(State(state): State<AppState>) -> Json<CheckReport> {
    Json(state.session.alarms.check_all().await)
}

#[derive(Debug, Deserialize)]
struct PairBody {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn list_favorite_pairs(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Json<Vec<FavoritePair>> {
    let limit = q.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    Json(state.session.favorite_pairs.recent(limit))
}

async fn add_favorite_pair(
    State(state): State<AppState>,
    Json(body): Json<PairBody>,
) -> Result<StatusCode, ApiError> {
    let pair = CurrencyPair::parse(&body.from, &body.to)?;
    state.session.favorite_pairs.add(pair)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_favorite_pair(
    State(state): State<AppState>,
    Path((from, to)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let pair = CurrencyPair::parse(&from, &to)?;
    if state.session.favorite_pairs.remove(pair)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("favorite pair"))
    }
}

#[derive(Debug, Deserialize)]
struct NewsQuery {
    currency: Option<String>,
    category: Option<String>,
    sort: Option<String>,
    max: Option<u32>,
}

fn parse_category(raw: Option<&str>) -> Result<NewsCategory, ApiError> {
    raw.map(str::parse::<NewsCategory>)
        .transpose()
        .map(Option::unwrap_or_default)
        .map_err(|msg| ApiError::new(StatusCode::BAD_REQUEST, msg))
}

async fn search_news(
    State(state): State<AppState>,
    Query(q): Query<NewsQuery>,
) -> ApiResult<Vec<NewsItem>> {
    let currency = match q.currency.as_deref() {
        Some(code) => code.parse::<Currency>()?,
        None => Currency::Usd,
    };
    let category = parse_category(q.category.as_deref())?;
    let sort = q
        .sort
        .as_deref()
        .map(str::parse::<SortOrder>)
        .transpose()
        .map_err(|msg| ApiError::new(StatusCode::BAD_REQUEST, msg))?
        .unwrap_or_default();

    let items = state
        .session
        .news
        .search(currency, category, sort, q.max.unwrap_or(DEFAULT_MAX_RESULTS))
        .await?;
    Ok(Json(items))
}

async fn top_headlines(
    State(state): State<AppState>,
    Query(q): Query<NewsQuery>,
) -> ApiResult<Vec<NewsItem>> {
    let category = parse_category(q.category.as_deref())?;
    let items = state
        .session
        .news
        .top_headlines(category, q.max.unwrap_or(DEFAULT_MAX_RESULTS))
        .await?;
    Ok(Json(items))
}

async fn list_favorite_news(State(state): State<AppState>) -> Json<Vec<NewsItem>> {
    Json((*state.session.favorite_news.list()).clone())
}

async fn add_favorite_news(
    State(state): State<AppState>,
    Json(item): Json<NewsItem>,
) -> Result<StatusCode, ApiError> {
    let added = state.session.favorite_news.add(item)?;
    Ok(if added {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    })
}

#[derive(Debug, Deserialize)]
struct NewsIdQuery {
    id: String,
}

async fn remove_favorite_news(
    State(state): State<AppState>,
    Query(q): Query<NewsIdQuery>,
) -> Result<StatusCode, ApiError> {
    if state.session.favorite_news.remove(&q.id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("favorite article"))
    }
}

#[derive(Debug, Deserialize)]
struct ForexQuery {
    limit: Option<usize>,
}

async fn forex_daily(
    State(state): State<AppState>,
    Path((from, to)): Path<(String, String)>,
    Query(q): Query<ForexQuery>,
) -> ApiResult<Vec<ForexBar>> {
    let pair = CurrencyPair::parse(&from, &to)?;
    let bars = state
        .session
        .forex
        .daily(pair, q.limit.unwrap_or(DEFAULT_BAR_LIMIT))
        .await?;
    Ok(Json(bars))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &fxdash_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fetch_errors_map_to_statuses() {
        let status = |e: FetchError| ApiError::from(e).status;
        assert_eq!(status(FetchError::Configuration("X")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(FetchError::RateLimit), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            status(FetchError::Timeout(Duration::from_secs(5))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(status(FetchError::Network("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(status(FetchError::MissingRate(Currency::Jpy)), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn validation_and_alarm_errors_map_to_client_statuses() {
        assert_eq!(
            ApiError::from(ConvertError::Validation(ValidationError::NotPositive)).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(AlarmError::InvalidTarget(-1.0)).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::not_found("alarm").status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn bad_category_is_a_bad_request() {
        assert_eq!(
            parse_category(Some("sports")).unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(parse_category(None).unwrap(), NewsCategory::All);
    }
}

use crate::alpr::{self, Recognize};
use crate::config::Config;
use crate::error::Error;
use crate::fetch::{self, Fetcher};
use crate::intake::{self, Submission};
use crate::scratch::ScratchFile;
use crate::select::select_best;
use crate::types::PlateReading;
use bytes::Buf;
use futures::Stream;
use log::{debug, error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::{Filter, Rejection, Reply};

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub recognizer: Arc<dyn Recognize>,
    pub fetcher: Fetcher,
}

impl Context {
    pub fn new(config: Config, recognizer: Arc<dyn Recognize>) -> Context {
        let fetcher = Fetcher::new(&config);
        Context {
            config: Arc::new(config),
            recognizer,
            fetcher,
        }
    }

    /// The requested region followed by the configured fallbacks, aliased
    /// and without repeats.
    fn regions(&self, requested: Option<&str>) -> Vec<String> {
        let mut regions = vec![self.config.resolve_region(requested)];
        for fallback in &self.config.fallback_regions {
            let region = self.config.resolve_region(Some(fallback));
            if !regions.contains(&region) {
                regions.push(region);
            }
        }
        regions
    }
}

pub async fn run(ctx: Context) {
    let addr = ([0, 0, 0, 0], ctx.config.port);
    info!("Listening on port {}", ctx.config.port);
    warp::serve(routes(ctx)).run(addr).await;
}

pub fn routes(ctx: Context) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let limit = ctx.config.max_upload_bytes;
    let with_ctx = warp::any().map(move || ctx.clone());

    let root = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "status": "ok" })));

    // `/api/health` is what the browser capture client polls.
    let health = warp::path!("health")
        .or(warp::path!("api" / "health"))
        .unify()
        .and(warp::get())
        .and(with_ctx.clone())
        .map(|ctx: Context| {
            warp::reply::json(&json!({
                "status": "ok",
                "region": ctx.config.default_region,
                "version": env!("CARGO_PKG_VERSION"),
            }))
        });

    let multipart = warp::multipart::form()
        .max_length(limit)
        .and_then(|form: FormData| async move {
            Ok::<_, Rejection>(Submission::from_form(form).await)
        });
    // Streamed so that bodies without a Content-Length still reach intake.
    let raw = warp::header::optional::<String>("content-type")
        .and(warp::body::stream())
        .and_then(move |content_type, body| raw_submission(content_type, body, limit));

    let read = warp::path!("read-plate")
        .or(warp::path!("api" / "recognize"))
        .unify()
        .and(warp::post())
        .and(warp::query::<HashMap<String, String>>())
        .and(multipart.or(raw).unify())
        .and(with_ctx.clone())
        .and_then(
            |query: HashMap<String, String>, submission: Submission, ctx: Context| async move {
                let region = query.get("region").map(String::as_str);
                read_plate(&ctx, region, submission)
                    .await
                    .map(|reading| warp::reply::json(&reading))
                    .map_err(warp::reject::custom)
            },
        );

    let read_url = warp::path!("api" / "recognize-url")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_ctx)
        .and_then(|query: HashMap<String, String>, ctx: Context| async move {
            read_plate_from_url(
                &ctx,
                query.get("url").map(String::as_str),
                query.get("region").map(String::as_str),
            )
            .await
            .map(|reading| warp::reply::json(&reading))
            .map_err(warp::reject::custom)
        });

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type", "authorization"]);

    root.or(health)
        .or(read)
        .or(read_url)
        .with(cors)
        .recover(handle_rejection)
        .with(warp::log("plate_reader"))
}

async fn raw_submission<S, B>(
    content_type: Option<String>,
    body: S,
    limit: u64,
) -> Result<Submission, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    let body = intake::read_capped(body, limit)
        .await
        .map_err(warp::reject::custom)?;
    Ok(Submission::raw(content_type, body))
}

/// Acquire the uploaded image, then recognize it.
pub async fn read_plate(
    ctx: &Context,
    query_region: Option<&str>,
    submission: Submission,
) -> Result<PlateReading, Error> {
    let image = intake::acquire(submission).map_err(|e| {
        warn!("Rejecting request: {}", e);
        e
    })?;
    let region = query_region.map(str::to_string).or(image.region);
    recognize_image(ctx, image.bytes, region.as_deref()).await
}

/// Download the image at `url`, then recognize it.
pub async fn read_plate_from_url(
    ctx: &Context,
    url: Option<&str>,
    region: Option<&str>,
) -> Result<PlateReading, Error> {
    let url = fetch::parse_url(url).map_err(|e| {
        warn!("Rejecting request: {}", e);
        e
    })?;
    let bytes = ctx.fetcher.fetch(url).await.map_err(|e| {
        error!("{}", e);
        e
    })?;
    recognize_image(ctx, bytes, region).await
}

/// Store, recognize, select. The scratch file is gone by the time this
/// returns, whatever the outcome.
async fn recognize_image(
    ctx: &Context,
    bytes: Vec<u8>,
    requested_region: Option<&str>,
) -> Result<PlateReading, Error> {
    let regions = ctx.regions(requested_region);

    let scratch = ScratchFile::save(&ctx.config.scratch_dir, &bytes)
        .await
        .map_err(|e| {
            error!("{}", e);
            e
        })?;
    drop(bytes);

    let outcome = alpr::recognize_any(ctx.recognizer.as_ref(), scratch.path(), &regions).await;
    scratch.release();

    let (region, result) = outcome.map_err(|e| {
        error!("Recognition failed: {}", e);
        e
    })?;
    let best = select_best(&result);
    info!(
        "Read plate {:?} at {:.1} from {} detections (region {})",
        best.plate,
        best.confidence,
        result.results.len(),
        region
    );
    Ok(PlateReading {
        results: result.results,
        plate: best.plate,
        confidence: best.confidence,
        region,
        raw: result.raw,
    })
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, body) = if let Some(e) = err.find::<Error>() {
        let mut body = json!({ "error": e.code() });
        if let Some(detail) = e.detail() {
            body["detail"] = json!(detail);
        }
        (e.status(), body)
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, json!({ "error": "not_found" }))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            json!({ "error": "payload_too_large" }),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            json!({ "error": "method_not_allowed" }),
        )
    } else {
        debug!("Unhandled rejection: {:?}", err);
        (StatusCode::BAD_REQUEST, json!({ "error": "bad_request" }))
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}

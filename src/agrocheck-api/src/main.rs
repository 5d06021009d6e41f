use std::convert::Infallible;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{error, info};
use serde_json::json;

use agrocheck_serve::{ClassLabels, ImageClassifier, Model, ModelArtifact, ModelCache, SavedModel};

struct App<M> {
    cache: ModelCache<ImageClassifier<M>>,
}

async fn route<M>(req: Request<Body>, app: Arc<App<M>>) -> Result<Response<Body>, Infallible>
where
    M: Model + Send + Sync + 'static,
{
    let response = match (req.method(), req.uri().path()) {
        // CORS preflight short-circuit.
        (&Method::OPTIONS, "/predict") => preflight(),
        (&Method::POST, "/predict") => predict(req, &app).await,
        (&Method::GET, "/ping") => {
            json_response(StatusCode::OK, json!({ "message": "Hello, I am alive" }))
        }
        _ => json_response(StatusCode::NOT_FOUND, json!({ "error": "Not found" })),
    };

    Ok(response)
}

async fn predict<M>(req: Request<Body>, app: &App<M>) -> Response<Body>
where
    M: Model + Send + Sync + 'static,
{
    // Ensure the model is loaded before touching the upload. Fetch/load
    // failures never reach clients verbatim; they name buckets and paths.
    let classifier = match app.cache.ensure_loaded() {
        Ok(classifier) => classifier,
        Err(err) => {
            error!("model load failed: {}", err);
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "model unavailable" }),
            );
        }
    };

    let data = match file_field(req).await {
        Some(data) => data,
        None => {
            return json_response(
                StatusCode::BAD_REQUEST,
                json!({ "error": "No file uploaded" }),
            )
        }
    };

    match classifier.classify_from_raw(&data) {
        Ok(prediction) => json_response(
            StatusCode::OK,
            json!({ "class": prediction.label, "confidence": prediction.confidence }),
        ),
        Err(err) => {
            error!("classification failed: {}", err);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": err.to_string() }),
            )
        }
    }
}

/// Extract the bytes of the multipart `file` field. A missing boundary,
/// malformed multipart stream, or absent field all come back as `None`.
async fn file_field(req: Request<Body>) -> Option<Bytes> {
    let boundary = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|content_type| multer::parse_boundary(content_type).ok())?;

    let mut multipart = multer::Multipart::new(req.into_body(), boundary);
    while let Some(field) = multipart.next_field().await.ok()? {
        if field.name() == Some("file") {
            return field.bytes().await.ok();
        }
    }

    None
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    add_cors_headers(response)
}

fn preflight() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;

    add_cors_headers(response)
}

fn add_cors_headers(mut response: Response<Body>) -> Response<Body> {
    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type"),
    );

    response
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cache = ModelCache::for_artifact(ModelArtifact::new(), ClassLabels::default());
    let app: Arc<App<SavedModel>> = Arc::new(App { cache });

    let make_service = make_service_fn(move |_conn: &AddrStream| {
        let app = Arc::clone(&app);
        let service = service_fn(move |req| route(req, app.clone()));

        async move { Ok::<_, Infallible>(service) }
    });

    let port = env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8080u16);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on http://{}", addr);

    let server = Server::bind(&addr).serve(make_service);

    if let Err(e) = server.await {
        eprintln!("server error: {}", e);
    }
}

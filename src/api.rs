//! REST API for chance-constrained packing.
//!
//! Exposes the best-fit packer, the conic model assembler and instance construction
//! over HTTP. Uses Axum as the web framework and supports CORS.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{OpenApi, ToSchema};

use crate::assembler::{
    AssemblyOptions, AssignmentRule, ConicModel, Constraint, LinearTerm, Sense, VarId, VarKind,
    Variable, VariableLayout, WarmStart, WarmStartEntry, assemble_with_options,
};
use crate::config::{ApiConfig, PackingSettings};
use crate::error::ChancePackError;
use crate::generator::{GeneratorSettings, RawItem, build_instance};
use crate::model::Instance;
use crate::optimizer::{
    BinDiagnostics, PackEvent, PackingConfig, PackingResult, PackingStrategy, PackingSummary,
    pack_with_config, pack_with_progress,
};
use crate::reader::format_instance;
use crate::uncertainty::{ItemParams, UncertaintyCase};

#[derive(Clone)]
struct ApiState {
    packing: PackingSettings,
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes verified against https://unpkg.com/swagger-ui-dist@5.17.14/ on 2025-10-29.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>chance-pack API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"
            integrity="sha384-2YH8WDRaj7V2OqU/trsmzSagmk/E2SutiCsGkdgoQwC9pNUJV1u/141DHB6jgs8t"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                const ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                    presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
                    layout: "StandaloneLayout",
                });
                window.ui = ui;
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// Request structure for the packing endpoints.
///
/// `mu` and `b` are parallel: nominal demand and spread of each item.
#[derive(Deserialize, Clone, ToSchema)]
#[schema(
    example = json!({
        "descriptor": "g 10 3 0.9",
        "capacity": 10.0,
        "dalpha": 1.0,
        "mu": [4.0, 4.0, 4.0],
        "b": [1.0, 1.0, 1.0]
    })
)]
pub struct PackRequest {
    #[serde(default)]
    #[schema(nullable = true)]
    pub descriptor: Option<String>,
    pub capacity: f64,
    pub dalpha: f64,
    pub mu: Vec<f64>,
    pub b: Vec<f64>,
    /// `best-fit` or `first-fit`; overrides the configured strategy.
    #[serde(default)]
    #[schema(nullable = true)]
    pub strategy: Option<String>,
}

/// Request for the model endpoint.
#[derive(Deserialize, Clone, ToSchema)]
pub struct ModelRequest {
    #[serde(flatten)]
    pub instance: PackRequest,
    /// State the assignment rows as `= 1` instead of `>= 1`.
    #[serde(default)]
    pub exact_assignment: bool,
}

#[derive(Debug)]
struct ValidatedPackRequest {
    instance: Instance,
    strategy: Option<PackingStrategy>,
}

#[derive(Debug)]
enum PackRequestValidationError {
    InvalidStrategy(String),
    InvalidInstance(ChancePackError),
}

impl PackRequest {
    fn into_validated(self) -> Result<ValidatedPackRequest, PackRequestValidationError> {
        let strategy = self
            .strategy
            .as_deref()
            .map(str::parse::<PackingStrategy>)
            .transpose()
            .map_err(PackRequestValidationError::InvalidStrategy)?;

        let descriptor = self
            .descriptor
            .unwrap_or_else(|| format!("api {} {} -", self.capacity, self.mu.len()));
        let instance = Instance::new(descriptor, self.capacity, self.dalpha, self.mu, self.b)
            .map_err(PackRequestValidationError::InvalidInstance)?;

        Ok(ValidatedPackRequest { instance, strategy })
    }
}

impl ValidatedPackRequest {
    fn packing_config(&self, base: PackingConfig) -> PackingConfig {
        let mut config = base;
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        config
    }
}

/// Request for building an instance from raw item parameters.
#[derive(Deserialize, ToSchema)]
#[schema(
    example = json!({
        "case": "gaussian",
        "alpha": 0.9,
        "capacity": 72.0,
        "items": [
            { "base": 4.0, "a_lb": 0.4, "a_ub": 0.8, "mu_factor": 0.5, "sigma": 0.2 }
        ]
    })
)]
pub struct GenerateRequest {
    pub case: UncertaintyCase,
    pub alpha: f64,
    pub capacity: f64,
    #[serde(default)]
    #[schema(nullable = true)]
    pub headroom: Option<f64>,
    pub items: Vec<RawItem>,
}

/// Response with all bins of the reference packing.
#[derive(Serialize, ToSchema)]
pub struct PackResponse {
    pub descriptor: String,
    pub bin_count: usize,
    pub bins: Vec<PackedBin>,
    pub summary: PackingSummary,
}

/// Single bin with its items (ascending indices) and load figures.
#[derive(Serialize, ToSchema)]
pub struct PackedBin {
    pub id: usize,
    pub items: Vec<usize>,
    pub diagnostics: BinDiagnostics,
}

#[derive(Serialize, ToSchema)]
pub struct ModelResponse {
    /// Bin count of the reference packing, the model's slot count.
    pub reference_bins: usize,
    pub model: ConicModel,
    pub warm_start: WarmStart,
}

#[derive(Serialize, ToSchema)]
pub struct GenerateResponse {
    pub descriptor: String,
    pub capacity: f64,
    pub dalpha: f64,
    pub mu: Vec<f64>,
    pub b: Vec<f64>,
    /// The instance in file format.
    pub text: String,
}

impl GenerateResponse {
    fn from_instance(instance: &Instance) -> Self {
        Self {
            descriptor: instance.descriptor().to_string(),
            capacity: instance.capacity(),
            dalpha: instance.dalpha(),
            mu: instance.items().iter().map(|item| item.mu).collect(),
            b: instance.items().iter().map(|item| item.b).collect(),
            text: format_instance(instance),
        }
    }
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid input data",
        details,
    )
}

fn instance_error(err: &ChancePackError) -> Response {
    let title = match err {
        ChancePackError::InfeasibleItem { .. } => "Unpackable item",
        ChancePackError::NumericDomain(_) => "Invalid numeric input",
        _ => "Invalid instance",
    };
    error_response(StatusCode::UNPROCESSABLE_ENTITY, title, err.to_string())
}

fn internal_error(err: &ChancePackError) -> Response {
    tracing::error!(error = %err, "request failed");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Packing failed",
        err.to_string(),
    )
}

fn parse_pack_request(
    payload: Result<Json<PackRequest>, JsonRejection>,
) -> Result<ValidatedPackRequest, Response> {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(err) => return Err(json_deserialize_error(err)),
    };
    validate_pack_request(payload)
}

fn validate_pack_request(payload: PackRequest) -> Result<ValidatedPackRequest, Response> {
    match payload.into_validated() {
        Ok(validated) => Ok(validated),
        Err(PackRequestValidationError::InvalidStrategy(details)) => {
            Err(validation_error(details))
        }
        Err(PackRequestValidationError::InvalidInstance(err)) => Err(instance_error(&err)),
    }
}

impl PackResponse {
    pub fn from_packing_result(descriptor: &str, result: PackingResult) -> Self {
        let PackingResult {
            packing,
            diagnostics,
            summary,
        } = result;

        Self {
            descriptor: descriptor.to_string(),
            bin_count: packing.bin_count(),
            bins: packing
                .bins
                .into_iter()
                .zip(diagnostics)
                .enumerate()
                .map(|(i, (bin, diagnostics))| PackedBin {
                    id: i,
                    items: bin.items,
                    diagnostics,
                })
                .collect(),
            summary,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(handle_pack, handle_pack_stream, handle_model, handle_generate),
    components(
        schemas(
            PackRequest,
            ModelRequest,
            GenerateRequest,
            PackResponse,
            PackedBin,
            ModelResponse,
            GenerateResponse,
            ErrorResponse,
            BinDiagnostics,
            PackingSummary,
            PackEvent,
            ConicModel,
            Variable,
            VarId,
            VarKind,
            Constraint,
            LinearTerm,
            Sense,
            VariableLayout,
            WarmStart,
            WarmStartEntry,
            UncertaintyCase,
            RawItem,
            ItemParams
        )
    ),
    tags((name = "packing", description = "Endpoints for chance-constrained packing"))
)]
struct ApiDoc;

fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/pack", post(handle_pack))
        .route("/pack_stream", post(handle_pack_stream))
        .route("/model", post(handle_model))
        .route("/generate", post(handle_generate))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(cors)
        .with_state(state)
}

/// Starts the API server and blocks until it terminates.
pub async fn start_api_server(config: ApiConfig, packing: PackingSettings) -> std::io::Result<()> {
    let app = router(ApiState { packing });

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        "Server running on http://{}:{}",
        config.display_host(),
        config.port()
    );
    if config.binds_to_all_interfaces() {
        tracing::info!("Local access: http://localhost:{}", config.port());
    }
    tracing::info!("Endpoints: POST /pack, POST /pack_stream, POST /model, POST /generate");
    tracing::info!("Documentation: GET /docs, GET /docs/openapi.json");

    axum::serve(listener, app).await
}

/// Handler for POST /pack endpoint.
///
/// Packs the items with the configured heuristic and returns bins with diagnostics.
#[utoipa::path(
    post,
    path = "/pack",
    request_body = PackRequest,
    responses(
        (status = 200, description = "Successfully packed items", body = PackResponse),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request or unpackable item",
            body = ErrorResponse
        )
    ),
    tag = "packing"
)]
async fn handle_pack(
    State(state): State<ApiState>,
    payload: Result<Json<PackRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match parse_pack_request(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    tracing::info!(items = request.instance.len(), "pack request");
    let config = request.packing_config(state.packing.packing_config());
    match pack_with_config(&request.instance, config) {
        Ok(result) => {
            tracing::info!(bins = result.bin_count(), "pack request finished");
            let response = PackResponse::from_packing_result(request.instance.descriptor(), result);
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => internal_error(&err),
    }
}

/// Handler for POST /pack_stream endpoint (SSE).
///
/// Streams pack events as Server-Sent Events while the packer runs.
#[utoipa::path(
    post,
    path = "/pack_stream",
    request_body = PackRequest,
    responses(
        (
            status = 200,
            description = "Streams pack events in real-time",
            content_type = "text/event-stream",
            body = String
        ),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request or unpackable item",
            body = ErrorResponse
        )
    ),
    tag = "packing"
)]
async fn handle_pack_stream(
    State(state): State<ApiState>,
    payload: Result<Json<PackRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match parse_pack_request(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let config = request.packing_config(state.packing.packing_config());
    let (tx, rx) = mpsc::channel::<String>(32);

    tokio::task::spawn_blocking(move || {
        let mut receiver_open = true;
        let outcome = pack_with_progress(&request.instance, config, |evt| {
            if !receiver_open {
                return;
            }
            if let Ok(json) = serde_json::to_string(evt) {
                // A closed receiver discards the remaining events.
                receiver_open = tx.blocking_send(json).is_ok();
            }
        });
        if let Err(err) = outcome {
            tracing::warn!(error = %err, "streamed packing failed");
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<_, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Handler for POST /model endpoint.
///
/// Builds the reference packing and returns the conic model with its warm start.
#[utoipa::path(
    post,
    path = "/model",
    request_body = ModelRequest,
    responses(
        (status = 200, description = "Assembled model and warm start", body = ModelResponse),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request or unpackable item",
            body = ErrorResponse
        )
    ),
    tag = "packing"
)]
async fn handle_model(
    State(state): State<ApiState>,
    payload: Result<Json<ModelRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };
    let options = AssemblyOptions {
        assignment: if payload.exact_assignment {
            AssignmentRule::ExactlyOne
        } else {
            AssignmentRule::AtLeastOne
        },
    };
    let request = match validate_pack_request(payload.instance) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let config = request.packing_config(state.packing.packing_config());
    let assembled = pack_with_config(&request.instance, config).and_then(|result| {
        assemble_with_options(&request.instance, &result.packing, options)
    });
    match assembled {
        Ok(assembled) => {
            let response = ModelResponse {
                reference_bins: assembled.upper_bound(),
                model: assembled.model,
                warm_start: assembled.warm_start,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => internal_error(&err),
    }
}

/// Handler for POST /generate endpoint.
///
/// Turns raw item parameters into a validated instance.
#[utoipa::path(
    post,
    path = "/generate",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Generated instance", body = GenerateResponse),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid parameters or unpackable item",
            body = ErrorResponse
        )
    ),
    tag = "packing"
)]
async fn handle_generate(payload: Result<Json<GenerateRequest>, JsonRejection>) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };

    let mut settings = GeneratorSettings::new(payload.case, payload.alpha, payload.capacity);
    if let Some(headroom) = payload.headroom {
        settings = settings.with_headroom(headroom);
    }
    match build_instance(&settings, &payload.items) {
        Ok(instance) => {
            (StatusCode::OK, Json(GenerateResponse::from_instance(&instance))).into_response()
        }
        Err(err) => instance_error(&err),
    }
}

async fn serve_openapi_json(State(_state): State<ApiState>) -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui(State(_state): State<ApiState>) -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}

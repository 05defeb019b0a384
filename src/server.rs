// HTTP surface for the rendering side: JSON views of the live board.

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::board::{LiveBoard, RouteSnapshot, current_timestamp, format_timestamp_full};
use crate::config::AppConfig;
use crate::error::Result;
use crate::fetch::{BusApi, HttpFetcher, TransitFetcher};
use crate::poller::{CycleOutcome, PollScheduler};
use crate::reconcile::{Placement, Reconciler};

pub struct AppState<F> {
    pub board: LiveBoard,
    pub scheduler: PollScheduler<F>,
}

impl<F> Clone for AppState<F> {
    fn clone(&self) -> Self {
        AppState {
            board: self.board.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: current_timestamp(),
        }
    }

    pub fn error(message: String) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: current_timestamp(),
        }
    }
}

/// What a stop's bus badge shows.
#[derive(Debug, Serialize)]
pub struct VehicleView {
    pub stop_index: usize,
    pub stop_name: String,
    pub vehicle_id: String,
    pub low_floor: String,
    pub congestion: String,
    pub vehicle_class: Option<String>,
    pub featured: bool,
}

impl From<&Placement> for VehicleView {
    fn from(placement: &Placement) -> Self {
        VehicleView {
            stop_index: placement.stop_index,
            stop_name: placement.stop_name.clone(),
            vehicle_id: placement.vehicle.vehicle_id.clone(),
            low_floor: placement.vehicle.low_floor_label().to_string(),
            congestion: placement.vehicle.congestion_label().to_string(),
            vehicle_class: placement.vehicle.vehicle_class.clone(),
            featured: placement.vehicle.featured,
        }
    }
}

/// One station row of the board with the buses currently at it.
#[derive(Debug, Serialize)]
pub struct StopView {
    pub index: usize,
    pub name: String,
    pub sequence: String,
    pub vehicles: Vec<VehicleView>,
}

fn stop_views(snapshot: &RouteSnapshot) -> Vec<StopView> {
    snapshot
        .stops
        .iter()
        .enumerate()
        .map(|(index, stop)| StopView {
            index,
            name: stop.name.clone(),
            sequence: stop.sequence.clone(),
            vehicles: snapshot.vehicles_at(index).map(VehicleView::from).collect(),
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct RouteStatus {
    pub route_id: String,
    pub has_snapshot: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "Seoul Bus Position Board",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": current_timestamp(),
    }))
}

async fn get_routes<F: TransitFetcher + 'static>(state: web::Data<AppState<F>>) -> HttpResponse {
    let shown = state.board.routes();
    let routes: Vec<_> = state
        .scheduler
        .routes()
        .iter()
        .map(|route_id| RouteStatus {
            route_id: route_id.clone(),
            has_snapshot: shown.contains(route_id),
        })
        .collect();
    HttpResponse::Ok().json(ApiResponse::success(routes))
}

fn route_not_found<T: Serialize>(route_id: &str) -> HttpResponse {
    warn!("⚠️  No snapshot for route {}", route_id);
    HttpResponse::NotFound().json(ApiResponse::<T>::error(format!(
        "No data for route '{}' yet",
        route_id
    )))
}

async fn get_route<F: TransitFetcher + 'static>(
    state: web::Data<AppState<F>>,
    path: web::Path<String>,
) -> HttpResponse {
    let route_id = path.into_inner();
    match state.board.snapshot(&route_id) {
        Some(snapshot) => HttpResponse::Ok().json(ApiResponse::success(snapshot)),
        None => route_not_found::<String>(&route_id),
    }
}

async fn get_route_stops<F: TransitFetcher + 'static>(
    state: web::Data<AppState<F>>,
    path: web::Path<String>,
) -> HttpResponse {
    let route_id = path.into_inner();
    match state.board.snapshot(&route_id) {
        Some(snapshot) => HttpResponse::Ok().json(ApiResponse::success(stop_views(&snapshot))),
        None => route_not_found::<String>(&route_id),
    }
}

async fn get_route_vehicles<F: TransitFetcher + 'static>(
    state: web::Data<AppState<F>>,
    path: web::Path<String>,
) -> HttpResponse {
    let route_id = path.into_inner();
    match state.board.snapshot(&route_id) {
        Some(snapshot) => {
            let vehicles: Vec<VehicleView> = snapshot.placements.iter().map(VehicleView::from).collect();
            HttpResponse::Ok().json(ApiResponse::success(vehicles))
        }
        None => route_not_found::<String>(&route_id),
    }
}

async fn get_stats<F: TransitFetcher + 'static>(state: web::Data<AppState<F>>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(state.board.stats()))
}

async fn force_refresh<F: TransitFetcher + 'static>(state: web::Data<AppState<F>>) -> HttpResponse {
    info!("🔄 Manual refresh requested...");

    match state.scheduler.run_once().await {
        CycleOutcome::Completed { cycle, published } => {
            info!("✓ Manual refresh completed (cycle {}, {} route(s) updated)", cycle, published);
            HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
                "cycle": cycle,
                "published": published,
            })))
        }
        CycleOutcome::Skipped => HttpResponse::Conflict().json(ApiResponse::<String>::error(
            "A poll cycle is already running".to_string(),
        )),
        CycleOutcome::Cancelled => HttpResponse::ServiceUnavailable().json(
            ApiResponse::<String>::error("Polling has been stopped".to_string()),
        ),
    }
}

pub fn configure<F: TransitFetcher + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check)).service(
        web::scope("/api/bus")
            .route("/routes", web::get().to(get_routes::<F>))
            .route("/route/{id}", web::get().to(get_route::<F>))
            .route("/route/{id}/stops", web::get().to(get_route_stops::<F>))
            .route("/route/{id}/vehicles", web::get().to(get_route_vehicles::<F>))
            .route("/stats", web::get().to(get_stats::<F>))
            .route("/refresh", web::post().to(force_refresh::<F>)),
    );
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_state(config: &AppConfig) -> Result<AppState<HttpFetcher>> {
    let fetcher = HttpFetcher::new(config.request_timeout())?;
    let api = BusApi::new(fetcher, config.base_url.clone(), config.service_key.clone());
    let reconciler = Reconciler::new(config.reconcile_options(), config.load_class_table()?);
    let board = LiveBoard::new();
    let scheduler = PollScheduler::new(
        api,
        reconciler,
        board.clone(),
        config.routes.clone(),
        config.poll_interval(),
    );

    Ok(AppState { board, scheduler })
}

pub async fn run_server(config: AppConfig, state: AppState<HttpFetcher>) -> std::io::Result<()> {
    let handle = state.scheduler.start();

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║   🚌 Seoul Bus Position Board                              ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");
    println!("🌐 Server running on: http://{}:{}", config.bind, config.port);
    println!("🚏 Routes: {}", config.routes.join(", "));
    println!("🔄 Auto-refresh: Every {} seconds", config.poll_interval_secs);
    println!("🕘 Started at: {}\n", format_timestamp_full(current_timestamp()));

    let app_state = state.clone();
    let result = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(configure::<HttpFetcher>)
    })
    .bind((config.bind.as_str(), config.port))?
    .run()
    .await;

    handle.stop();
    handle.join().await;

    if let Err(e) = &result {
        error!("❌ Server stopped with error: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VehicleClassTable;
    use crate::fetch::tests::CannedFetcher;
    use crate::reconcile::ReconcileOptions;
    use actix_web::{http::StatusCode, test};
    use std::time::Duration;

    const STATIONS: &str = "<ServiceResult><msgBody>\
        <itemList><stationNm>서울역</stationNm><seq>1</seq></itemList>\
        <itemList><stationNm>시청</stationNm><seq>2</seq></itemList>\
        </msgBody></ServiceResult>";

    const POSITIONS: &str = "<ServiceResult><msgBody>\
        <itemList><plainNo>8027</plainNo><sectOrd>2</sectOrd><busType>1</busType><congetion>5</congetion></itemList>\
        <itemList><plainNo>서울74사1234</plainNo><sectOrd>2</sectOrd><busType>0</busType><congetion>3</congetion></itemList>\
        </msgBody></ServiceResult>";

    fn state() -> AppState<CannedFetcher> {
        let fetcher = CannedFetcher::default()
            .with("getStaionByRoute", STATIONS)
            .with("getBusPosByRtid", POSITIONS);
        let board = LiveBoard::new();
        let scheduler = PollScheduler::new(
            BusApi::new(fetcher, "http://example.test/api/rest", "key"),
            Reconciler::new(ReconcileOptions::default(), VehicleClassTable::builtin()),
            board.clone(),
            vec!["114900001".to_string()],
            Duration::from_secs(5),
        );
        AppState { board, scheduler }
    }

    #[actix_web::test]
    async fn health_reports_healthy() {
        let app = test::init_service(App::new().configure(configure::<CannedFetcher>)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;

        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn refresh_then_read_vehicles() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure::<CannedFetcher>),
        )
        .await;

        let missing = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/bus/route/114900001").to_request(),
        )
        .await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let refresh: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post().uri("/api/bus/refresh").to_request(),
        )
        .await;
        assert_eq!(refresh["data"]["published"], 1);

        let vehicles: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/bus/route/114900001/vehicles").to_request(),
        )
        .await;
        assert_eq!(vehicles["success"], true);
        assert_eq!(vehicles["data"][0]["stop_name"], "시청");
        assert_eq!(vehicles["data"][0]["low_floor"], "저상");
        assert_eq!(vehicles["data"][0]["congestion"], "혼잡");
        assert_eq!(vehicles["data"][0]["vehicle_class"], "GREENCITY");
        assert_eq!(vehicles["data"][0]["featured"], true);
        assert_eq!(vehicles["data"][1]["vehicle_class"], serde_json::Value::Null);
        assert_eq!(vehicles["data"][1]["featured"], false);

        let stops: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/bus/route/114900001/stops").to_request(),
        )
        .await;
        assert_eq!(stops["data"][0]["name"], "서울역");
        assert_eq!(stops["data"][0]["vehicles"].as_array().map(Vec::len), Some(0));
        assert_eq!(stops["data"][1]["vehicles"][0]["vehicle_id"], "8027");
        assert_eq!(stops["data"][1]["vehicles"][1]["vehicle_id"], "서울74사1234");

        let routes: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/bus/routes").to_request(),
        )
        .await;
        assert_eq!(routes["data"][0]["has_snapshot"], true);

        let stats: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/bus/stats").to_request(),
        )
        .await;
        assert_eq!(stats["data"]["vehicles"], 2);
    }

    #[actix_web::test]
    async fn refresh_after_stop_is_unavailable() {
        let state = state();
        state.scheduler.stop();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure::<CannedFetcher>),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::post().uri("/api/bus/refresh").to_request()).await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

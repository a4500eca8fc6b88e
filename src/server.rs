//! Native host: actix-web in front of the same router the Spin component uses.

use std::sync::Arc;

use actix_web::{middleware, web, App, HttpRequest, HttpResponse, HttpServer};
use spin_sdk::http::{Method, Request, Response};

use crate::config::Config;
use crate::core::db::KvStore;
use crate::router::handle_request;

pub type SharedStore = Arc<dyn KvStore + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub config: Config,
}

impl AppState {
    pub fn new(store: SharedStore, config: Config) -> Self {
        Self { store, config }
    }
}

pub mod adapter {
    use super::*;

    pub fn actix_to_spin_request(req: &HttpRequest, body: web::Bytes) -> Request {
        let method = match req.method().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            _ => Method::Get,
        };

        let mut builder = Request::builder();
        builder.method(method).uri(req.uri().to_string());
        for (name, value) in req.headers() {
            if let Ok(value) = value.to_str() {
                builder.header(name.as_str(), value);
            }
        }
        builder.body(body.to_vec()).build()
    }

    pub fn spin_to_actix_response(resp: Response) -> HttpResponse {
        let status = actix_web::http::StatusCode::from_u16(*resp.status())
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = HttpResponse::build(status);
        for (name, value) in resp.headers() {
            if let Some(value) = value.as_str() {
                builder.append_header((name, value));
            }
        }
        builder.body(resp.body().to_vec())
    }
}

async fn handle_all(state: web::Data<AppState>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
    let spin_req = adapter::actix_to_spin_request(&req, body);
    let resp = handle_request(&*state.store, &state.config, spin_req);
    adapter::spin_to_actix_response(resp)
}

/// Route table for the native app; used by [`run`] and by the integration tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/{tail:.*}").to(handle_all));
}

pub async fn run(bind: &str, state: AppState) -> std::io::Result<()> {
    log::info!("listening on http://{}", bind);
    let data = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind(bind)?
    .run()
    .await
}

use spin_sdk::http::Request;

use crate::config::Config;
use crate::core::db::KvStore;
use crate::core::errors::ApiError;
use crate::core::query_params::{get_string, parse_query_params};
use crate::models::models::User;

/// Everything a handler may touch for one request. The viewer is resolved once
/// by the router and passed down explicitly.
pub struct Ctx<'a> {
    pub store: &'a dyn KvStore,
    pub config: &'a Config,
    pub viewer: Option<User>,
}

impl<'a> Ctx<'a> {
    pub fn new(store: &'a dyn KvStore, config: &'a Config, viewer: Option<User>) -> Self {
        Self { store, config, viewer }
    }

    pub fn viewer(&self) -> Option<&User> {
        self.viewer.as_ref()
    }

    pub fn require_viewer(&self) -> Result<&User, ApiError> {
        self.viewer.as_ref().ok_or(ApiError::Unauthorized)
    }
}

/// Raw `?page=` value of a request.
pub fn page_param(req: &Request) -> Option<String> {
    get_string(&parse_query_params(req.uri()), "page", None)
}

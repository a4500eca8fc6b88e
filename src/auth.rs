use log::{info, warn};
use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use uuid::Uuid;

use crate::config::*;
use crate::context::Ctx;
use crate::core::db::{JsonStore, KvStore};
use crate::core::errors::{ApiError, FieldErrors};
use crate::core::helpers::{now_iso, redirect, verify_password};
use crate::core::query_params::{parse_cookies, parse_form, parse_query_params, safe_next};
use crate::models::models::{TokenData, User};
use crate::templates::{self, attr};
use crate::users::{find_by_username, get_user};
use crate::views;

// === Tokens ===

pub fn issue_token(store: &dyn KvStore, user_id: &str) -> anyhow::Result<String> {
    let token = Uuid::new_v4().to_string();
    let data = TokenData {
        user_id: user_id.to_string(),
        created_at: now_iso(),
    };
    store.set_json(&token_key(&token), &data)?;
    Ok(token)
}

pub fn revoke_token(store: &dyn KvStore, token: &str) -> anyhow::Result<()> {
    store.delete(&token_key(token))
}

pub fn revoke_user_tokens(store: &dyn KvStore, user_id: &str) -> anyhow::Result<()> {
    for key in store.keys_with_prefix(TOKEN_PREFIX)? {
        if let Some(data) = store.get_json::<TokenData>(&key)? {
            if data.user_id == user_id {
                store.delete(&key)?;
            }
        }
    }
    Ok(())
}

/// The user a token belongs to, if the token is live and the user still exists.
/// Expired tokens are removed on sight.
pub fn token_user(store: &dyn KvStore, config: &Config, token: &str) -> anyhow::Result<Option<User>> {
    let key = token_key(token);
    let Some(data) = store.get_json::<TokenData>(&key)? else {
        return Ok(None);
    };
    // An unreadable timestamp counts as expired.
    let expired = match chrono::DateTime::parse_from_rfc3339(&data.created_at) {
        Ok(created) => (chrono::Utc::now() - created.with_timezone(&chrono::Utc)).num_hours() >= config.token_expiration_hours,
        Err(_) => true,
    };
    if expired {
        store.delete(&key)?;
        return Ok(None);
    }
    get_user(store, &data.user_id)
}

/// `Authorization: Bearer` wins over the session cookie.
pub fn token_from_request(req: &Request) -> Option<String> {
    let bearer = req
        .header("Authorization")
        .and_then(|h| h.as_str())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    bearer.or_else(|| {
        let cookies = req.header("Cookie").and_then(|h| h.as_str())?;
        parse_cookies(cookies).remove(SESSION_COOKIE).filter(|t| !t.is_empty())
    })
}

pub fn current_user(store: &dyn KvStore, config: &Config, req: &Request) -> anyhow::Result<Option<User>> {
    match token_from_request(req) {
        Some(token) => token_user(store, config, &token),
        None => Ok(None),
    }
}

pub fn authenticate(store: &dyn KvStore, username: &str, password: &str) -> anyhow::Result<Option<User>> {
    Ok(find_by_username(store, username.trim())?.filter(|u| verify_password(password, &u.password)))
}

// === Cookies ===

pub fn session_cookie(token: &str, config: &Config) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        config.token_expiration_hours * 3600
    )
}

pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

pub fn redirect_with_cookie(location: &str, cookie: &str) -> Response {
    Response::builder()
        .status(302)
        .header("Location", location)
        .header("Set-Cookie", cookie)
        .body(Vec::new())
        .build()
}

// === HTTP Handlers ===

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

fn render_login(ctx: &Ctx, form: &LoginForm, errors: &FieldErrors, status: u16) -> Result<Response, ApiError> {
    let content = templates::render(
        "login.html",
        &[
            ("username", attr(&form.username)),
            ("next", attr(form.next.as_deref().unwrap_or("/"))),
            ("errors", views::field_errors(errors, "__all__")),
        ],
    )?;
    Ok(templates::page(status, ctx.viewer(), "Log in", content)?)
}

pub fn login_form(ctx: &Ctx, req: &Request) -> Result<Response, ApiError> {
    let next = parse_query_params(req.uri()).remove("next");
    if ctx.viewer().is_some() {
        return Ok(redirect(&safe_next(next)));
    }
    let form = LoginForm {
        next,
        ..LoginForm::default()
    };
    render_login(ctx, &form, &FieldErrors::new(), 200)
}

pub fn handle_login(ctx: &Ctx, req: &Request) -> Result<Response, ApiError> {
    let form: LoginForm = parse_form(req.body())?;
    match authenticate(ctx.store, &form.username, &form.password)? {
        Some(user) => {
            let token = issue_token(ctx.store, &user.id)?;
            info!("{} logged in", user.username);
            Ok(redirect_with_cookie(&safe_next(form.next), &session_cookie(&token, ctx.config)))
        }
        None => {
            warn!("failed login for {:?}", form.username);
            let mut errors = FieldErrors::new();
            errors.add("__all__", "Please enter a correct username and password.");
            render_login(ctx, &form, &errors, 400)
        }
    }
}

pub fn handle_logout(ctx: &Ctx, req: &Request) -> Result<Response, ApiError> {
    if let Some(token) = token_from_request(req) {
        revoke_token(ctx.store, &token)?;
    }
    if let Some(user) = ctx.viewer() {
        info!("{} logged out", user.username);
    }
    Ok(redirect_with_cookie("/", &clear_session_cookie()))
}

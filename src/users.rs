use std::sync::OnceLock;

use log::{info, warn};
use regex::Regex;
use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use uuid::Uuid;

use crate::auth::{clear_session_cookie, issue_token, redirect_with_cookie, revoke_user_tokens, session_cookie};
use crate::comments::delete_comments_by_user;
use crate::config::*;
use crate::context::{page_param, Ctx};
use crate::core::db::{JsonStore, KvStore};
use crate::core::errors::{ApiError, FieldErrors};
use crate::core::helpers::{char_len, hash_password, now, redirect};
use crate::core::query_params::parse_form;
use crate::feed::{list_posts, FeedQuery};
use crate::follow::{all_edges, delete_follow, viewer_follows};
use crate::models::models::{Post, User};
use crate::posts::delete_post_records;
use crate::stats::profile_stats;
use crate::templates::{self, attr};
use crate::views;

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("Regex should compile"))
}

// === Storage ===

/// Writes the user record and its username index entry.
pub fn insert_user(store: &dyn KvStore, user: &User) -> anyhow::Result<()> {
    store.set_json(&user_key(&user.id), user)?;
    store.set(&username_key(&user.username), user.id.as_bytes())
}

pub fn get_user(store: &dyn KvStore, id: &str) -> anyhow::Result<Option<User>> {
    store.get_json(&user_key(id))
}

pub fn find_by_username(store: &dyn KvStore, username: &str) -> anyhow::Result<Option<User>> {
    match store.get(&username_key(username))? {
        Some(id) => get_user(store, &String::from_utf8(id)?),
        None => Ok(None),
    }
}

pub fn require_user_by_username(store: &dyn KvStore, username: &str) -> Result<User, ApiError> {
    find_by_username(store, username)?.ok_or_else(|| ApiError::NotFound(format!("User {} not found", username)))
}

/// Removes the user and everything hanging off them: posts (with their
/// comments), their own comments, follow edges in both directions, tokens.
pub fn delete_user(store: &dyn KvStore, user: &User) -> anyhow::Result<()> {
    let posts: Vec<Post> = store
        .scan_json::<Post>(POST_PREFIX)?
        .into_iter()
        .filter(|p| p.user_id == user.id)
        .collect();
    for post in &posts {
        delete_post_records(store, post)?;
    }
    delete_comments_by_user(store, &user.id)?;
    for (follower, author) in all_edges(store)? {
        if follower == user.id || author == user.id {
            delete_follow(store, &follower, &author)?;
        }
    }
    revoke_user_tokens(store, &user.id)?;
    store.delete(&username_key(&user.username))?;
    store.delete(&user_key(&user.id))?;
    info!("deleted user {} and {} posts", user.username, posts.len());
    Ok(())
}

// === Service ===

#[derive(Debug, Default, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
}

pub fn create_user(store: &dyn KvStore, form: &SignupForm) -> Result<User, ApiError> {
    let username = form.username.trim();
    let mut errors = FieldErrors::new();

    let len = char_len(username);
    if username.is_empty() {
        errors.add("username", "This field is required.");
    } else if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        errors.add(
            "username",
            format!("Usernames are {} to {} characters long.", MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH),
        );
    } else if !username_regex().is_match(username) {
        errors.add("username", "Use only letters, digits and . - _");
    } else if RESERVED_USERNAMES.iter().any(|r| r.eq_ignore_ascii_case(username)) {
        errors.add("username", "This username is reserved.");
    } else if store.exists(&username_key(username))? {
        errors.add("username", "A user with that username already exists.");
    }

    if char_len(&form.password) < MIN_PASSWORD_LENGTH {
        errors.add(
            "password",
            format!("Passwords need at least {} characters.", MIN_PASSWORD_LENGTH),
        );
    } else if form.password != form.password_confirm {
        errors.add("password_confirm", "The two password fields didn't match.");
    }
    errors.into_result()?;

    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        password: hash_password(&form.password)?,
        bio: None,
        created_at: now(),
    };
    insert_user(store, &user)?;
    info!("user {} signed up", user.username);
    Ok(user)
}

// === HTTP Handlers ===

pub fn profile_path(username: &str) -> String {
    format!("/{}/", urlencoding::encode(username))
}

/// The author page: stats, follow controls and their posts. `errors` carries
/// a rejected follow attempt back to the page it came from.
pub fn render_profile(
    ctx: &Ctx,
    req: &Request,
    username: &str,
    errors: Option<&FieldErrors>,
    status: u16,
) -> Result<Response, ApiError> {
    let author = require_user_by_username(ctx.store, username)?;
    let stats = profile_stats(ctx.store, &author.id)?;
    let follows = viewer_follows(ctx.store, ctx.viewer(), &author)?;
    let page = list_posts(ctx.store, ctx.viewer(), &FeedQuery::author(&author.id), page_param(req).as_deref())?;

    let notice = match errors {
        Some(errors) => views::field_errors(errors, "author"),
        None => String::new(),
    };
    let own_profile = ctx.viewer().is_some_and(|v| v.id == author.id);
    let account_actions = if own_profile {
        r#"<form class="inline" method="post" action="/auth/delete/"><button type="submit" class="danger">Delete my account</button></form>"#
            .to_string()
    } else {
        String::new()
    };

    let content = templates::render(
        "profile.html",
        &[
            ("author_card", views::author_card(&author, &stats, follows)),
            ("notice", notice),
            ("account_actions", account_actions),
            ("posts", views::post_list(&page, ctx.viewer(), "No posts yet.")),
            ("paginator", views::paginator(&page, &profile_path(&author.username))),
        ],
    )?;
    Ok(templates::page(status, ctx.viewer(), &author.username, content)?)
}

pub fn profile(ctx: &Ctx, req: &Request, username: &str) -> Result<Response, ApiError> {
    render_profile(ctx, req, username, None, 200)
}

fn render_signup(ctx: &Ctx, form: &SignupForm, errors: &FieldErrors, status: u16) -> Result<Response, ApiError> {
    let content = templates::render(
        "signup.html",
        &[
            ("username", attr(&form.username)),
            ("username_errors", views::field_errors(errors, "username")),
            ("password_errors", views::field_errors(errors, "password")),
            ("password_confirm_errors", views::field_errors(errors, "password_confirm")),
        ],
    )?;
    Ok(templates::page(status, ctx.viewer(), "Sign up", content)?)
}

pub fn signup_form(ctx: &Ctx) -> Result<Response, ApiError> {
    if ctx.viewer().is_some() {
        return Ok(redirect("/"));
    }
    render_signup(ctx, &SignupForm::default(), &FieldErrors::new(), 200)
}

pub fn handle_signup(ctx: &Ctx, req: &Request) -> Result<Response, ApiError> {
    let form: SignupForm = parse_form(req.body())?;
    match create_user(ctx.store, &form) {
        Ok(user) => {
            let token = issue_token(ctx.store, &user.id)?;
            Ok(redirect_with_cookie("/", &session_cookie(&token, ctx.config)))
        }
        Err(ApiError::Validation(errors)) => {
            warn!("rejected signup for {:?}: {}", form.username, errors);
            render_signup(ctx, &form, &errors, 400)
        }
        Err(e) => Err(e),
    }
}

pub fn handle_delete_account(ctx: &Ctx) -> Result<Response, ApiError> {
    let viewer = ctx.require_viewer()?;
    delete_user(ctx.store, viewer)?;
    Ok(redirect_with_cookie("/", &clear_session_cookie()))
}

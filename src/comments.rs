use log::info;
use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use uuid::Uuid;

use crate::config::*;
use crate::context::Ctx;
use crate::core::db::{JsonStore, KvStore};
use crate::core::errors::{ApiError, FieldErrors};
use crate::core::helpers::{char_len, now, redirect, validate_uuid};
use crate::core::query_params::parse_form;
use crate::models::models::{Comment, Post, User};
use crate::permissions::can_edit;
use crate::posts::{post_path, require_post};
use crate::templates::{self, esc};
use crate::users::get_user;
use crate::views;

#[derive(Debug, Clone)]
pub struct CommentEntry {
    pub comment: Comment,
    pub author: User,
}

// === Storage ===

pub fn get_comment(store: &dyn KvStore, post_id: &str, id: &str) -> anyhow::Result<Option<Comment>> {
    if !validate_uuid(id) {
        return Ok(None);
    }
    store.get_json(&comment_key(post_id, id))
}

pub fn save_comment(store: &dyn KvStore, comment: &Comment) -> anyhow::Result<()> {
    store.set_json(&comment_key(&comment.post_id, &comment.id), comment)
}

/// Newest first, with authors resolved. Comments whose author is gone are skipped.
pub fn list_comments(store: &dyn KvStore, post_id: &str) -> anyhow::Result<Vec<CommentEntry>> {
    let mut comments: Vec<Comment> = store.scan_json(&comment_prefix(post_id))?;
    comments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    let mut entries = Vec::with_capacity(comments.len());
    for comment in comments {
        if let Some(author) = get_user(store, &comment.user_id)? {
            entries.push(CommentEntry { comment, author });
        }
    }
    Ok(entries)
}

pub fn delete_comments_of_post(store: &dyn KvStore, post_id: &str) -> anyhow::Result<()> {
    for key in store.keys_with_prefix(&comment_prefix(post_id))? {
        store.delete(&key)?;
    }
    Ok(())
}

pub fn delete_comments_by_user(store: &dyn KvStore, user_id: &str) -> anyhow::Result<()> {
    for comment in store.scan_json::<Comment>(COMMENT_PREFIX)? {
        if comment.user_id == user_id {
            store.delete(&comment_key(&comment.post_id, &comment.id))?;
        }
    }
    Ok(())
}

// === Service ===

#[derive(Debug, Default, Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub text: String,
}

fn validate_text(text: &str) -> Result<String, ApiError> {
    let text = text.trim();
    let mut errors = FieldErrors::new();
    if text.is_empty() {
        errors.add("text", "This field is required.");
    } else if char_len(text) > MAX_COMMENT_LENGTH {
        errors.add("text", format!("Comments are limited to {} characters.", MAX_COMMENT_LENGTH));
    }
    errors.into_result()?;
    Ok(text.to_string())
}

/// Any signed-in user may comment on any post.
pub fn add_comment(store: &dyn KvStore, viewer: Option<&User>, post: &Post, text: &str) -> Result<Comment, ApiError> {
    let viewer = viewer.ok_or(ApiError::Unauthorized)?;
    let text = validate_text(text)?;
    let comment = Comment {
        id: Uuid::new_v4().to_string(),
        post_id: post.id.clone(),
        user_id: viewer.id.clone(),
        text,
        created_at: now(),
        updated_at: None,
    };
    save_comment(store, &comment)?;
    info!("{} commented on post {}", viewer.username, post.id);
    Ok(comment)
}

pub fn update_comment(store: &dyn KvStore, viewer: Option<&User>, mut comment: Comment, text: &str) -> Result<Comment, ApiError> {
    let viewer = viewer.ok_or(ApiError::Unauthorized)?;
    if !can_edit(Some(viewer), &comment) {
        return Err(ApiError::Forbidden);
    }
    comment.text = validate_text(text)?;
    comment.updated_at = Some(now());
    save_comment(store, &comment)?;
    Ok(comment)
}

pub fn delete_comment(store: &dyn KvStore, viewer: Option<&User>, comment: &Comment) -> Result<(), ApiError> {
    let viewer = viewer.ok_or(ApiError::Unauthorized)?;
    if !can_edit(Some(viewer), comment) {
        return Err(ApiError::Forbidden);
    }
    store.delete(&comment_key(&comment.post_id, &comment.id))?;
    Ok(())
}

// === HTTP Handlers ===

fn require_comment(ctx: &Ctx, post: &Post, comment_id: &str) -> Result<Comment, ApiError> {
    get_comment(ctx.store, &post.id, comment_id)?.ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))
}

pub fn handle_add_comment(ctx: &Ctx, req: &Request, username: &str, post_id: &str) -> Result<Response, ApiError> {
    ctx.require_viewer()?;
    let (post, _) = require_post(ctx.store, username, post_id)?;
    let form: CommentForm = parse_form(req.body())?;
    let path = post_path(username, post_id);
    match add_comment(ctx.store, ctx.viewer(), &post, &form.text) {
        Ok(_) => Ok(redirect(&path)),
        Err(ApiError::Validation(errors)) => {
            let content = views::comment_form(&path, &form.text, &errors);
            Ok(templates::page(400, ctx.viewer(), "Add comment", content)?)
        }
        Err(e) => Err(e),
    }
}

fn render_comment_form(ctx: &Ctx, action: &str, text: &str, errors: &FieldErrors, status: u16) -> Result<Response, ApiError> {
    let content = templates::render(
        "comment_form.html",
        &[
            ("action", templates::attr(action)),
            ("text", esc(text)),
            ("text_errors", views::field_errors(errors, "text")),
        ],
    )?;
    Ok(templates::page(status, ctx.viewer(), "Edit comment", content)?)
}

pub fn edit_comment_form(ctx: &Ctx, username: &str, post_id: &str, comment_id: &str) -> Result<Response, ApiError> {
    ctx.require_viewer()?;
    let (post, _) = require_post(ctx.store, username, post_id)?;
    let comment = require_comment(ctx, &post, comment_id)?;
    let path = post_path(username, post_id);
    if !can_edit(ctx.viewer(), &comment) {
        return Ok(redirect(&path));
    }
    let action = format!("{}comment/{}/edit/", path, comment.id);
    render_comment_form(ctx, &action, &comment.text, &FieldErrors::new(), 200)
}

pub fn handle_edit_comment(ctx: &Ctx, req: &Request, username: &str, post_id: &str, comment_id: &str) -> Result<Response, ApiError> {
    ctx.require_viewer()?;
    let (post, _) = require_post(ctx.store, username, post_id)?;
    let comment = require_comment(ctx, &post, comment_id)?;
    let form: CommentForm = parse_form(req.body())?;
    let path = post_path(username, post_id);
    match update_comment(ctx.store, ctx.viewer(), comment, &form.text) {
        Ok(_) | Err(ApiError::Forbidden) => Ok(redirect(&path)),
        Err(ApiError::Validation(errors)) => {
            let action = format!("{}comment/{}/edit/", path, comment_id);
            render_comment_form(ctx, &action, &form.text, &errors, 400)
        }
        Err(e) => Err(e),
    }
}

pub fn handle_delete_comment(ctx: &Ctx, username: &str, post_id: &str, comment_id: &str) -> Result<Response, ApiError> {
    ctx.require_viewer()?;
    let (post, _) = require_post(ctx.store, username, post_id)?;
    let comment = require_comment(ctx, &post, comment_id)?;
    match delete_comment(ctx.store, ctx.viewer(), &comment) {
        Ok(()) | Err(ApiError::Forbidden) => Ok(redirect(&post_path(username, post_id))),
        Err(e) => Err(e),
    }
}

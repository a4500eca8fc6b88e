use log::{info, warn};
use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use uuid::Uuid;

use crate::comments::{delete_comments_of_post, list_comments};
use crate::config::*;
use crate::context::Ctx;
use crate::core::db::{JsonStore, KvStore};
use crate::core::errors::{ApiError, FieldErrors};
use crate::core::helpers::{char_len, now, redirect, validate_uuid};
use crate::core::query_params::parse_form;
use crate::feed::entry_for;
use crate::follow::viewer_follows;
use crate::groups::{get_group, list_groups};
use crate::images::{delete_image, parse_upload, save_image, ImageUpload};
use crate::models::models::{Post, User};
use crate::permissions::can_edit;
use crate::stats::profile_stats;
use crate::templates::{self, attr, esc};
use crate::users::require_user_by_username;
use crate::views;

// === Storage ===

pub fn get_post(store: &dyn KvStore, id: &str) -> anyhow::Result<Option<Post>> {
    if !validate_uuid(id) {
        return Ok(None);
    }
    store.get_json(&post_key(id))
}

pub fn save_post(store: &dyn KvStore, post: &Post) -> anyhow::Result<()> {
    store.set_json(&post_key(&post.id), post)
}

/// Deletes a post together with its comments and its image.
pub fn delete_post_records(store: &dyn KvStore, post: &Post) -> anyhow::Result<()> {
    delete_comments_of_post(store, &post.id)?;
    if let Some(image) = &post.image {
        delete_image(store, image)?;
    }
    store.delete(&post_key(&post.id))
}

/// The post `post_id`, provided it was written by `username`.
pub fn require_post(store: &dyn KvStore, username: &str, post_id: &str) -> Result<(Post, User), ApiError> {
    let author = require_user_by_username(store, username)?;
    match get_post(store, post_id)? {
        Some(post) if post.user_id == author.id => Ok((post, author)),
        _ => Err(ApiError::NotFound("Post not found".to_string())),
    }
}

// === Service ===

#[derive(Debug, Default, Clone, Deserialize)]
pub struct PostForm {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub group: Option<String>,
    /// Base64 data URL of the uploaded file.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub clear_image: Option<String>,
}

impl PostForm {
    fn group_slug(&self) -> Option<&str> {
        self.group.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }

    fn image_payload(&self) -> Option<&str> {
        self.image.as_deref().map(str::trim).filter(|i| !i.is_empty())
    }

    fn wants_clear_image(&self) -> bool {
        self.clear_image.as_deref().is_some_and(|v| !v.is_empty())
    }
}

struct ValidPost {
    text: String,
    group: Option<String>,
    image: Option<ImageUpload>,
}

/// Checks every field before anything is written.
fn validate_post_form(store: &dyn KvStore, form: &PostForm) -> Result<ValidPost, ApiError> {
    let mut errors = FieldErrors::new();
    let text = form.text.trim();
    if text.is_empty() {
        errors.add("text", "This field is required.");
    } else if char_len(text) > MAX_POST_LENGTH {
        errors.add("text", format!("Posts are limited to {} characters.", MAX_POST_LENGTH));
    }

    let group = match form.group_slug() {
        Some(slug) if get_group(store, slug)?.is_none() => {
            errors.add("group", "Select a valid group.");
            None
        }
        other => other.map(str::to_string),
    };

    let image = match form.image_payload().map(parse_upload) {
        Some(Ok(upload)) => Some(upload),
        Some(Err(message)) => {
            errors.add("image", message);
            None
        }
        None => None,
    };

    errors.into_result()?;
    Ok(ValidPost {
        text: text.to_string(),
        group,
        image,
    })
}

pub fn create_post(store: &dyn KvStore, viewer: Option<&User>, form: &PostForm) -> Result<Post, ApiError> {
    let viewer = viewer.ok_or(ApiError::Unauthorized)?;
    let valid = validate_post_form(store, form)?;
    let image = match &valid.image {
        Some(upload) => Some(save_image(store, upload)?),
        None => None,
    };
    let post = Post {
        id: Uuid::new_v4().to_string(),
        user_id: viewer.id.clone(),
        group: valid.group,
        text: valid.text,
        image,
        created_at: now(),
        updated_at: None,
    };
    save_post(store, &post)?;
    info!("{} created post {}", viewer.username, post.id);
    Ok(post)
}

/// Applies an edit by the post's author. Anyone else gets `Forbidden`.
pub fn update_post(store: &dyn KvStore, viewer: Option<&User>, mut post: Post, form: &PostForm) -> Result<Post, ApiError> {
    let viewer = viewer.ok_or(ApiError::Unauthorized)?;
    if !can_edit(Some(viewer), &post) {
        return Err(ApiError::Forbidden);
    }
    let valid = validate_post_form(store, form)?;

    let old_image = post.image.clone();
    if let Some(upload) = &valid.image {
        post.image = Some(save_image(store, upload)?);
    } else if form.wants_clear_image() {
        post.image = None;
    }
    post.text = valid.text;
    post.group = valid.group;
    post.updated_at = Some(now());
    save_post(store, &post)?;

    if let Some(old) = old_image.filter(|old| post.image.as_ref() != Some(old)) {
        delete_image(store, &old)?;
    }
    info!("{} edited post {}", viewer.username, post.id);
    Ok(post)
}

pub fn delete_post(store: &dyn KvStore, viewer: Option<&User>, post: &Post) -> Result<(), ApiError> {
    let viewer = viewer.ok_or(ApiError::Unauthorized)?;
    if !can_edit(Some(viewer), post) {
        return Err(ApiError::Forbidden);
    }
    delete_post_records(store, post)?;
    info!("{} deleted post {}", viewer.username, post.id);
    Ok(())
}

// === HTTP Handlers ===

pub fn post_path(username: &str, post_id: &str) -> String {
    format!("/{}/{}/", urlencoding::encode(username), post_id)
}

fn render_post_form(
    ctx: &Ctx,
    form: &PostForm,
    errors: &FieldErrors,
    editing: Option<&Post>,
    status: u16,
) -> Result<Response, ApiError> {
    let groups = list_groups(ctx.store)?;
    let (heading, action, submit, current_image) = match editing {
        Some(post) => {
            let username = ctx.require_viewer()?.username.clone();
            (
                "Edit post",
                format!("{}edit/", post_path(&username, &post.id)),
                "Save",
                views::current_image(post.image.as_deref()),
            )
        }
        None => ("New post", "/new/".to_string(), "Publish", String::new()),
    };
    let content = templates::render(
        "post_form.html",
        &[
            ("heading", heading.to_string()),
            ("action", attr(&action)),
            ("text", esc(&form.text)),
            ("group_options", views::group_options(&groups, form.group_slug())),
            ("current_image", current_image),
            ("text_errors", views::field_errors(errors, "text")),
            ("group_errors", views::field_errors(errors, "group")),
            ("image_errors", views::field_errors(errors, "image")),
            ("submit", submit.to_string()),
        ],
    )?;
    Ok(templates::page(status, ctx.viewer(), heading, content)?)
}

pub fn new_post_form(ctx: &Ctx) -> Result<Response, ApiError> {
    ctx.require_viewer()?;
    render_post_form(ctx, &PostForm::default(), &FieldErrors::new(), None, 200)
}

pub fn handle_new_post(ctx: &Ctx, req: &Request) -> Result<Response, ApiError> {
    ctx.require_viewer()?;
    let form: PostForm = parse_form(req.body())?;
    match create_post(ctx.store, ctx.viewer(), &form) {
        Ok(_) => Ok(redirect("/")),
        Err(ApiError::Validation(errors)) => {
            warn!("rejected new post: {}", errors);
            render_post_form(ctx, &form, &errors, None, 400)
        }
        Err(e) => Err(e),
    }
}

pub fn post_view(ctx: &Ctx, username: &str, post_id: &str) -> Result<Response, ApiError> {
    let (post, author) = require_post(ctx.store, username, post_id)?;
    let stats = profile_stats(ctx.store, &author.id)?;
    let follows = viewer_follows(ctx.store, ctx.viewer(), &author)?;
    let comments = list_comments(ctx.store, &post.id)?;
    let path = post_path(&author.username, &post.id);
    let comment_form = match ctx.viewer() {
        Some(_) => views::comment_form(&path, "", &FieldErrors::new()),
        None => String::new(),
    };
    let title = author.username.clone();
    let entry = entry_for(ctx.store, post, author)?;

    let content = templates::render(
        "post.html",
        &[
            ("author_card", views::author_card(&entry.author, &stats, follows)),
            ("post", views::post_card(&entry, ctx.viewer(), true)),
            ("comment_form", comment_form),
            ("comments", views::comment_list(&comments, ctx.viewer(), &path)),
        ],
    )?;
    Ok(templates::page(200, ctx.viewer(), &title, content)?)
}

pub fn edit_post_form(ctx: &Ctx, username: &str, post_id: &str) -> Result<Response, ApiError> {
    ctx.require_viewer()?;
    let (post, _) = require_post(ctx.store, username, post_id)?;
    if !can_edit(ctx.viewer(), &post) {
        return Ok(redirect(&post_path(username, post_id)));
    }
    let form = PostForm {
        text: post.text.clone(),
        group: post.group.clone(),
        ..PostForm::default()
    };
    render_post_form(ctx, &form, &FieldErrors::new(), Some(&post), 200)
}

pub fn handle_edit_post(ctx: &Ctx, req: &Request, username: &str, post_id: &str) -> Result<Response, ApiError> {
    ctx.require_viewer()?;
    let (post, _) = require_post(ctx.store, username, post_id)?;
    let form: PostForm = parse_form(req.body())?;
    match update_post(ctx.store, ctx.viewer(), post.clone(), &form) {
        Ok(_) | Err(ApiError::Forbidden) => Ok(redirect(&post_path(username, post_id))),
        Err(ApiError::Validation(errors)) => render_post_form(ctx, &form, &errors, Some(&post), 400),
        Err(e) => Err(e),
    }
}

pub fn handle_delete_post(ctx: &Ctx, username: &str, post_id: &str) -> Result<Response, ApiError> {
    ctx.require_viewer()?;
    let (post, author) = require_post(ctx.store, username, post_id)?;
    match delete_post(ctx.store, ctx.viewer(), &post) {
        Ok(()) => Ok(redirect(&format!("/{}/", urlencoding::encode(&author.username)))),
        Err(ApiError::Forbidden) => Ok(redirect(&post_path(username, post_id))),
        Err(e) => Err(e),
    }
}

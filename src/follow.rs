use log::{info, warn};
use spin_sdk::http::{Request, Response};

use crate::config::*;
use crate::context::Ctx;
use crate::core::db::{JsonStore, KvStore};
use crate::core::errors::ApiError;
use crate::core::helpers::{json, now, redirect};
use crate::models::models::{Follow, User};
use crate::users::{find_by_username, get_user, profile_path, require_user_by_username};

// === Storage ===

/// Writes the `(user, author)` edge. The key is the pair itself, so repeating
/// the insert (or racing it) still leaves exactly one row. A self edge is
/// never written. Returns whether a new row appeared.
pub fn insert_follow(store: &dyn KvStore, user_id: &str, author_id: &str) -> anyhow::Result<bool> {
    if user_id == author_id {
        return Ok(false);
    }
    let key = follow_key(user_id, author_id);
    if store.exists(&key)? {
        return Ok(false);
    }
    store.set_json(
        &key,
        &Follow {
            user_id: user_id.to_string(),
            author_id: author_id.to_string(),
            created_at: now(),
        },
    )?;
    Ok(true)
}

/// Removes the edge if present. Returns whether a row was removed.
pub fn delete_follow(store: &dyn KvStore, user_id: &str, author_id: &str) -> anyhow::Result<bool> {
    let key = follow_key(user_id, author_id);
    if !store.exists(&key)? {
        return Ok(false);
    }
    store.delete(&key)?;
    Ok(true)
}

pub fn is_following(store: &dyn KvStore, user_id: &str, author_id: &str) -> anyhow::Result<bool> {
    store.exists(&follow_key(user_id, author_id))
}

/// Ids of the authors `user_id` follows.
pub fn get_followings(store: &dyn KvStore, user_id: &str) -> anyhow::Result<Vec<String>> {
    let prefix = follow_prefix(user_id);
    Ok(store
        .keys_with_prefix(&prefix)?
        .into_iter()
        .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
        .collect())
}

/// Ids of the users following `author_id`.
pub fn get_followers(store: &dyn KvStore, author_id: &str) -> anyhow::Result<Vec<String>> {
    Ok(all_edges(store)?
        .into_iter()
        .filter(|(_, author)| author == author_id)
        .map(|(user, _)| user)
        .collect())
}

/// Every `(user, author)` pair, parsed from the keys alone.
pub fn all_edges(store: &dyn KvStore) -> anyhow::Result<Vec<(String, String)>> {
    Ok(store
        .keys_with_prefix(FOLLOW_PREFIX)?
        .into_iter()
        .filter_map(|k| {
            let rest = k.strip_prefix(FOLLOW_PREFIX)?;
            let (user, author) = rest.split_once(':')?;
            Some((user.to_string(), author.to_string()))
        })
        .collect())
}

// === Service ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Created,
    AlreadyFollowing,
    Removed,
    NotFollowing,
}

pub fn follow(store: &dyn KvStore, viewer: Option<&User>, target_username: &str) -> Result<FollowOutcome, ApiError> {
    let viewer = viewer.ok_or(ApiError::Unauthorized)?;
    let author = require_user_by_username(store, target_username)?;
    if author.id == viewer.id {
        return Err(ApiError::validation("author", "You cannot follow yourself"));
    }
    if insert_follow(store, &viewer.id, &author.id)? {
        info!("{} now follows {}", viewer.username, author.username);
        Ok(FollowOutcome::Created)
    } else {
        Ok(FollowOutcome::AlreadyFollowing)
    }
}

pub fn unfollow(store: &dyn KvStore, viewer: Option<&User>, target_username: &str) -> Result<FollowOutcome, ApiError> {
    let viewer = viewer.ok_or(ApiError::Unauthorized)?;
    let author = require_user_by_username(store, target_username)?;
    if delete_follow(store, &viewer.id, &author.id)? {
        info!("{} unfollowed {}", viewer.username, author.username);
        Ok(FollowOutcome::Removed)
    } else {
        Ok(FollowOutcome::NotFollowing)
    }
}

/// `None` for anonymous viewers and for the author looking at themselves.
pub fn viewer_follows(store: &dyn KvStore, viewer: Option<&User>, author: &User) -> anyhow::Result<Option<bool>> {
    match viewer {
        Some(v) if v.id != author.id => Ok(Some(is_following(store, &v.id, &author.id)?)),
        _ => Ok(None),
    }
}

// === HTTP Handlers ===

pub fn handle_follow(ctx: &Ctx, req: &Request, username: &str) -> Result<Response, ApiError> {
    match follow(ctx.store, ctx.viewer(), username) {
        Ok(_) => Ok(redirect(&profile_path(username))),
        Err(ApiError::Validation(errors)) => {
            warn!("rejected follow of {} by itself", username);
            crate::users::render_profile(ctx, req, username, Some(&errors), 400)
        }
        Err(e) => Err(e),
    }
}

pub fn handle_unfollow(ctx: &Ctx, username: &str) -> Result<Response, ApiError> {
    unfollow(ctx.store, ctx.viewer(), username)?;
    Ok(redirect(&profile_path(username)))
}

fn usernames(store: &dyn KvStore, ids: Vec<String>) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(user) = get_user(store, &id)? {
            names.push(user.username);
        }
    }
    names.sort();
    Ok(names)
}

pub fn get_followings_list(ctx: &Ctx, username: &str) -> Result<Response, ApiError> {
    let user = find_by_username(ctx.store, username)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    let names = usernames(ctx.store, get_followings(ctx.store, &user.id)?)?;
    Ok(json(200, &names)?)
}

pub fn get_followers_list(ctx: &Ctx, username: &str) -> Result<Response, ApiError> {
    let user = find_by_username(ctx.store, username)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    let names = usernames(ctx.store, get_followers(ctx.store, &user.id)?)?;
    Ok(json(200, &names)?)
}

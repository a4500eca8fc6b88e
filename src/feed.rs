use std::collections::{HashMap, HashSet};

use spin_sdk::http::{Request, Response};

use crate::config::*;
use crate::context::{page_param, Ctx};
use crate::core::db::{JsonStore, KvStore};
use crate::core::errors::ApiError;
use crate::follow::get_followings;
use crate::groups::get_group;
use crate::models::models::{Group, Post, User};
use crate::pagination::{Page, Paginator};
use crate::templates;
use crate::views;

/// Which posts a listing shows. All filters combine with AND.
#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub group: Option<String>,
    pub author: Option<String>,
    /// Restrict to authors the viewer follows; requires a viewer.
    pub followed_by_viewer: bool,
}

impl FeedQuery {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn group(slug: &str) -> Self {
        Self {
            group: Some(slug.to_string()),
            ..Self::default()
        }
    }

    pub fn author(user_id: &str) -> Self {
        Self {
            author: Some(user_id.to_string()),
            ..Self::default()
        }
    }

    pub fn followed() -> Self {
        Self {
            followed_by_viewer: true,
            ..Self::default()
        }
    }
}

/// A post with what a listing needs to render it.
#[derive(Debug, Clone)]
pub struct PostEntry {
    pub post: Post,
    pub author: User,
    pub group: Option<Group>,
    pub comment_count: usize,
}

/// Newest first; equal timestamps fall back to id so pages are stable.
pub fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub fn comment_count(store: &dyn KvStore, post_id: &str) -> anyhow::Result<usize> {
    Ok(store.keys_with_prefix(&comment_prefix(post_id))?.len())
}

pub fn entry_for(store: &dyn KvStore, post: Post, author: User) -> anyhow::Result<PostEntry> {
    let group = match &post.group {
        Some(slug) => get_group(store, slug)?,
        None => None,
    };
    let comment_count = comment_count(store, &post.id)?;
    Ok(PostEntry {
        post,
        author,
        group,
        comment_count,
    })
}

pub fn list_posts(
    store: &dyn KvStore,
    viewer: Option<&User>,
    query: &FeedQuery,
    page: Option<&str>,
) -> Result<Page<PostEntry>, ApiError> {
    let followed: Option<HashSet<String>> = if query.followed_by_viewer {
        let viewer = viewer.ok_or(ApiError::Unauthorized)?;
        Some(get_followings(store, &viewer.id)?.into_iter().collect())
    } else {
        None
    };

    let authors: HashMap<String, User> = store
        .scan_json::<User>(USER_PREFIX)?
        .into_iter()
        .map(|u| (u.id.clone(), u))
        .collect();

    let mut posts: Vec<Post> = store
        .scan_json::<Post>(POST_PREFIX)?
        .into_iter()
        .filter(|p| authors.contains_key(&p.user_id))
        .filter(|p| query.group.as_ref().map_or(true, |g| p.group.as_ref() == Some(g)))
        .filter(|p| query.author.as_ref().map_or(true, |a| &p.user_id == a))
        .filter(|p| followed.as_ref().map_or(true, |f| f.contains(&p.user_id)))
        .collect();
    sort_newest_first(&mut posts);

    let page = Paginator::default().get_page(posts, page);
    let entries = page.try_map(|post| {
        let author = authors[&post.user_id].clone();
        entry_for(store, post, author)
    })?;
    Ok(entries)
}

// === HTTP Handlers ===

pub fn index(ctx: &Ctx, req: &Request) -> Result<Response, ApiError> {
    let page = list_posts(ctx.store, ctx.viewer(), &FeedQuery::global(), page_param(req).as_deref())?;
    let content = templates::render(
        "index.html",
        &[
            ("posts", views::post_list(&page, ctx.viewer(), "No posts yet.")),
            ("paginator", views::paginator(&page, "/")),
        ],
    )?;
    Ok(templates::page(200, ctx.viewer(), "Latest posts", content)?)
}

pub fn follow_index(ctx: &Ctx, req: &Request) -> Result<Response, ApiError> {
    let page = list_posts(ctx.store, ctx.viewer(), &FeedQuery::followed(), page_param(req).as_deref())?;
    let content = templates::render(
        "follow.html",
        &[
            (
                "posts",
                views::post_list(&page, ctx.viewer(), "Authors you follow have not posted anything yet."),
            ),
            ("paginator", views::paginator(&page, "/follow/")),
        ],
    )?;
    Ok(templates::page(200, ctx.viewer(), "Following", content)?)
}

use std::sync::OnceLock;

use log::info;
use regex::Regex;
use serde::Deserialize;
use spin_sdk::http::{Request, Response};

use crate::config::*;
use crate::context::{page_param, Ctx};
use crate::core::db::{JsonStore, KvStore};
use crate::core::errors::{ApiError, FieldErrors};
use crate::core::helpers::{char_len, redirect};
use crate::core::query_params::parse_form;
use crate::feed::{list_posts, FeedQuery};
use crate::models::models::{Group, Post, User};
use crate::permissions::is_admin;
use crate::posts::delete_post_records;
use crate::templates::{self, attr, esc};
use crate::views;

fn slug_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[-a-zA-Z0-9_]+$").expect("Regex should compile"))
}

// === Storage ===

pub fn get_group(store: &dyn KvStore, slug: &str) -> anyhow::Result<Option<Group>> {
    store.get_json(&group_key(slug))
}

pub fn require_group(store: &dyn KvStore, slug: &str) -> Result<Group, ApiError> {
    get_group(store, slug)?.ok_or_else(|| ApiError::NotFound(format!("Group {} not found", slug)))
}

/// All groups ordered by title.
pub fn list_groups(store: &dyn KvStore) -> anyhow::Result<Vec<Group>> {
    let mut groups: Vec<Group> = store.scan_json(GROUP_PREFIX)?;
    groups.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.slug.cmp(&b.slug)));
    Ok(groups)
}

/// Deletes the group and, cascading, every post filed under it.
pub fn delete_group_records(store: &dyn KvStore, slug: &str) -> anyhow::Result<usize> {
    let posts: Vec<Post> = store
        .scan_json::<Post>(POST_PREFIX)?
        .into_iter()
        .filter(|p| p.group.as_deref() == Some(slug))
        .collect();
    for post in &posts {
        delete_post_records(store, post)?;
    }
    store.delete(&group_key(slug))?;
    Ok(posts.len())
}

// === Service ===

#[derive(Debug, Default, Deserialize)]
pub struct GroupForm {
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

pub fn create_group(store: &dyn KvStore, config: &Config, viewer: Option<&User>, form: &GroupForm) -> Result<Group, ApiError> {
    viewer.ok_or(ApiError::Unauthorized)?;
    if !is_admin(config, viewer) {
        return Err(ApiError::Forbidden);
    }

    let slug = form.slug.trim();
    let title = form.title.trim();
    let mut errors = FieldErrors::new();
    if !slug_regex().is_match(slug) {
        errors.add("slug", "Use only letters, digits, '-' and '_'");
    } else if get_group(store, slug)?.is_some() {
        errors.add("slug", "A group with this slug already exists");
    }
    if title.is_empty() {
        errors.add("title", "Title is required");
    } else if char_len(title) > MAX_GROUP_TITLE_LENGTH {
        errors.add("title", format!("Title must be at most {} characters", MAX_GROUP_TITLE_LENGTH));
    }
    errors.into_result()?;

    let group = Group {
        slug: slug.to_string(),
        title: title.to_string(),
        description: form.description.trim().to_string(),
    };
    store.set_json(&group_key(&group.slug), &group)?;
    info!("group {} created", group.slug);
    Ok(group)
}

pub fn delete_group(store: &dyn KvStore, config: &Config, viewer: Option<&User>, slug: &str) -> Result<usize, ApiError> {
    viewer.ok_or(ApiError::Unauthorized)?;
    if !is_admin(config, viewer) {
        return Err(ApiError::Forbidden);
    }
    require_group(store, slug)?;
    let removed = delete_group_records(store, slug)?;
    info!("group {} deleted with {} posts", slug, removed);
    Ok(removed)
}

// === HTTP Handlers ===

pub fn group_path(slug: &str) -> String {
    format!("/group/{}/", urlencoding::encode(slug))
}

pub fn group_posts(ctx: &Ctx, req: &Request, slug: &str) -> Result<Response, ApiError> {
    let group = require_group(ctx.store, slug)?;
    let page = list_posts(ctx.store, ctx.viewer(), &FeedQuery::group(slug), page_param(req).as_deref())?;
    let admin_actions = if is_admin(ctx.config, ctx.viewer()) {
        format!(
            r#"<form class="inline" method="post" action="{}delete/"><button type="submit" class="danger">Delete group</button></form>"#,
            attr(&group_path(slug))
        )
    } else {
        String::new()
    };
    let content = templates::render(
        "group.html",
        &[
            ("group_title", esc(&group.title)),
            ("group_description", esc(&group.description)),
            ("admin_actions", admin_actions),
            ("posts", views::post_list(&page, ctx.viewer(), "No posts in this group yet.")),
            ("paginator", views::paginator(&page, &group_path(slug))),
        ],
    )?;
    Ok(templates::page(200, ctx.viewer(), &group.title, content)?)
}

fn render_group_form(ctx: &Ctx, form: &GroupForm, errors: &FieldErrors, status: u16) -> Result<Response, ApiError> {
    let content = templates::render(
        "group_form.html",
        &[
            ("slug", attr(&form.slug)),
            ("title", attr(&form.title)),
            ("description", esc(&form.description)),
            ("slug_errors", views::field_errors(errors, "slug")),
            ("title_errors", views::field_errors(errors, "title")),
        ],
    )?;
    Ok(templates::page(status, ctx.viewer(), "New group", content)?)
}

pub fn new_group_form(ctx: &Ctx) -> Result<Response, ApiError> {
    ctx.require_viewer()?;
    if !is_admin(ctx.config, ctx.viewer()) {
        return Err(ApiError::Forbidden);
    }
    render_group_form(ctx, &GroupForm::default(), &FieldErrors::new(), 200)
}

pub fn handle_create_group(ctx: &Ctx, req: &Request) -> Result<Response, ApiError> {
    let form: GroupForm = parse_form(req.body())?;
    match create_group(ctx.store, ctx.config, ctx.viewer(), &form) {
        Ok(group) => Ok(redirect(&group_path(&group.slug))),
        Err(ApiError::Validation(errors)) => render_group_form(ctx, &form, &errors, 400),
        Err(e) => Err(e),
    }
}

pub fn handle_delete_group(ctx: &Ctx, slug: &str) -> Result<Response, ApiError> {
    delete_group(ctx.store, ctx.config, ctx.viewer(), slug)?;
    Ok(redirect("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;
    use crate::test_support::{make_group, make_post, make_user};

    fn admin_config() -> Config {
        Config {
            admins: vec!["palpatine".to_string()],
            ..Config::default()
        }
    }

    fn form(slug: &str, title: &str) -> GroupForm {
        GroupForm {
            slug: slug.to_string(),
            title: title.to_string(),
            description: "d".to_string(),
        }
    }

    #[test]
    fn admins_create_groups_with_unique_slugs() {
        let store = MemoryStore::new();
        let admin = make_user(&store, "palpatine");
        let config = admin_config();
        create_group(&store, &config, Some(&admin), &form("sith", "Sith")).unwrap();
        let err = create_group(&store, &config, Some(&admin), &form("sith", "Again")).unwrap_err();
        match err {
            ApiError::Validation(errors) => assert_eq!(errors.get("slug").len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_slug_and_missing_title_are_reported_together() {
        let store = MemoryStore::new();
        let admin = make_user(&store, "palpatine");
        let err = create_group(&store, &admin_config(), Some(&admin), &form("bad slug!", "  ")).unwrap_err();
        match err {
            ApiError::Validation(errors) => {
                assert!(!errors.get("slug").is_empty());
                assert!(!errors.get("title").is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(list_groups(&store).unwrap().is_empty());
    }

    #[test]
    fn non_admins_are_forbidden() {
        let store = MemoryStore::new();
        let user = make_user(&store, "jarjar");
        assert!(matches!(
            create_group(&store, &admin_config(), Some(&user), &form("g", "G")),
            Err(ApiError::Forbidden)
        ));
        assert!(matches!(
            create_group(&store, &admin_config(), None, &form("g", "G")),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn deleting_a_group_cascades_to_its_posts() {
        let store = MemoryStore::new();
        let admin = make_user(&store, "palpatine");
        make_group(&store, "sith", "Sith");
        make_post(&store, &admin, Some("sith"), "in group");
        make_post(&store, &admin, None, "outside");
        assert_eq!(delete_group(&store, &admin_config(), Some(&admin), "sith").unwrap(), 1);
        assert!(get_group(&store, "sith").unwrap().is_none());
        let left: Vec<Post> = store.scan_json(POST_PREFIX).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].text, "outside");
    }

    #[test]
    fn groups_are_listed_by_title() {
        let store = MemoryStore::new();
        make_group(&store, "b", "Beta");
        make_group(&store, "a", "Alpha");
        let titles: Vec<String> = list_groups(&store).unwrap().into_iter().map(|g| g.title).collect();
        assert_eq!(titles, vec!["Alpha", "Beta"]);
    }
}

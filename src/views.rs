use std::borrow::Cow;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::comments::CommentEntry;
use crate::core::errors::FieldErrors;
use crate::feed::PostEntry;
use crate::groups::group_path;
use crate::images::image_url;
use crate::models::models::{Group, User};
use crate::pagination::Page;
use crate::permissions::can_edit;
use crate::posts::post_path;
use crate::stats::ProfileStats;
use crate::templates::{attr, esc};
use crate::users::profile_path;

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r#"(^|\s)(https?://[^\s<"]+)"#).expect("Regex should compile"))
}

fn date(at: &DateTime<Utc>) -> String {
    at.format("%d %b %Y %H:%M").to_string()
}

/// Post body as HTML: sanitized by ammonia, bare URLs turned into links and
/// line breaks kept. Only text between tags is rewritten; attribute values
/// and the text of existing links are left alone.
pub fn render_text(text: &str) -> String {
    let clean = ammonia::clean(text);
    let mut out = String::with_capacity(clean.len());
    let mut rest = clean.as_str();
    let mut link_depth = 0usize;
    while let Some(start) = rest.find('<') {
        push_text(&mut out, &rest[..start], link_depth == 0);
        let len = tag_len(&rest[start..]);
        let tag = &rest[start..start + len];
        if tag.starts_with("<a ") || tag == "<a>" {
            link_depth += 1;
        } else if tag == "</a>" {
            link_depth = link_depth.saturating_sub(1);
        }
        out.push_str(tag);
        rest = &rest[start + len..];
    }
    push_text(&mut out, rest, link_depth == 0);
    out
}

/// Length of the tag opening `html`. Serialized attribute values are always
/// double-quoted, so a `>` inside quotes does not close the tag.
fn tag_len(html: &str) -> usize {
    let mut quoted = false;
    for (i, c) in html.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '>' if !quoted => return i + 1,
            _ => {}
        }
    }
    html.len()
}

fn push_text(out: &mut String, text: &str, linkify: bool) {
    let text = if linkify {
        url_regex().replace_all(text, r#"$1<a href="$2" rel="nofollow">$2</a>"#)
    } else {
        Cow::Borrowed(text)
    };
    out.push_str(&text.replace('\n', "<br>\n"));
}

pub fn field_errors(errors: &FieldErrors, field: &str) -> String {
    let messages = errors.get(field);
    if messages.is_empty() {
        return String::new();
    }
    let items: String = messages.iter().map(|m| format!("<li>{}</li>", esc(m))).collect();
    format!(r#"<ul class="errorlist">{}</ul>"#, items)
}

pub fn group_options(groups: &[Group], selected: Option<&str>) -> String {
    let mut out = String::from(r#"<option value="">---------</option>"#);
    for group in groups {
        let mark = if selected == Some(group.slug.as_str()) { " selected" } else { "" };
        out.push_str(&format!(
            r#"<option value="{}"{}>{}</option>"#,
            attr(&group.slug),
            mark,
            esc(&group.title)
        ));
    }
    out
}

pub fn current_image(image: Option<&str>) -> String {
    match image {
        Some(name) => format!(
            r#"<div class="current-image">
                <img src="{}" alt="">
                <label><input type="checkbox" name="clear_image" value="on"> Remove image</label>
            </div>"#,
            attr(&image_url(name))
        ),
        None => String::new(),
    }
}

pub fn post_card(entry: &PostEntry, viewer: Option<&User>, full: bool) -> String {
    let post = &entry.post;
    let path = post_path(&entry.author.username, &post.id);

    let group = match &entry.group {
        Some(g) => format!(
            r#" in <a class="group-link" href="{}">{}</a>"#,
            attr(&group_path(&g.slug)),
            esc(&g.title)
        ),
        None => String::new(),
    };
    let edited = match &post.updated_at {
        Some(at) => format!(r#" <span class="muted">(edited {})</span>"#, date(at)),
        None => String::new(),
    };
    let image = match &post.image {
        Some(name) => format!(r#"<img class="post-image" src="{}" alt="">"#, attr(&image_url(name))),
        None => String::new(),
    };

    let mut actions = Vec::new();
    if !full {
        actions.push(format!(
            r#"<a href="{}">Comments ({})</a>"#,
            attr(&path),
            entry.comment_count
        ));
    }
    if can_edit(viewer, post) {
        actions.push(format!(r#"<a class="edit-link" href="{}edit/">Edit</a>"#, attr(&path)));
        if full {
            actions.push(format!(
                r#"<form class="inline" method="post" action="{}delete/"><button type="submit" class="danger">Delete</button></form>"#,
                attr(&path)
            ));
        }
    }

    format!(
        r#"<article class="post">
            <header><a class="author" href="{author_href}">{author}</a> · <a class="date" href="{href}">{created}</a>{group}{edited}</header>
            <div class="post-text">{text}</div>
            {image}
            <footer>{actions}</footer>
        </article>"#,
        author_href = attr(&profile_path(&entry.author.username)),
        author = esc(&entry.author.username),
        href = attr(&path),
        created = date(&post.created_at),
        group = group,
        edited = edited,
        text = render_text(&post.text),
        image = image,
        actions = actions.join(" "),
    )
}

pub fn post_list(page: &Page<PostEntry>, viewer: Option<&User>, empty: &str) -> String {
    if page.is_empty() {
        return format!(r#"<p class="muted">{}</p>"#, esc(empty));
    }
    page.object_list
        .iter()
        .map(|entry| post_card(entry, viewer, false))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Links to neighbouring pages under `base_path`, so filters survive paging.
pub fn paginator<T>(page: &Page<T>, base_path: &str) -> String {
    if !page.has_other_pages() {
        return String::new();
    }
    let link = |n: usize, label: &str| format!(r#"<a href="{}?page={}">{}</a>"#, attr(base_path), n, label);
    let mut parts = Vec::new();
    if let Some(previous) = page.previous_page_number() {
        parts.push(link(1, "« first"));
        parts.push(link(previous, "previous"));
    }
    parts.push(format!(
        r#"<span class="current">Page {} of {}</span>"#,
        page.number, page.num_pages
    ));
    if let Some(next) = page.next_page_number() {
        parts.push(link(next, "next"));
        parts.push(link(page.num_pages, "last »"));
    }
    format!(r#"<nav class="pagination">{}</nav>"#, parts.join(" "))
}

/// `follows` is `None` when no follow button applies (anonymous or self).
pub fn author_card(author: &User, stats: &ProfileStats, follows: Option<bool>) -> String {
    let base = profile_path(&author.username);
    let button = match follows {
        Some(true) => format!(
            r#"<form method="post" action="{}unfollow/"><button type="submit">Unfollow</button></form>"#,
            attr(&base)
        ),
        Some(false) => format!(
            r#"<form method="post" action="{}follow/"><button type="submit" class="primary">Follow</button></form>"#,
            attr(&base)
        ),
        None => String::new(),
    };
    let bio = author
        .bio
        .as_deref()
        .filter(|b| !b.is_empty())
        .map(|b| format!(r#"<p class="bio">{}</p>"#, esc(b)))
        .unwrap_or_default();
    format!(
        r#"<aside class="author-card">
            <h2><a href="{href}">{name}</a></h2>
            {bio}
            <ul class="stats">
                <li>Posts: <span class="post-count">{posts}</span></li>
                <li>Followers: <span class="follower-count">{followers}</span></li>
                <li>Following: <span class="following-count">{following}</span></li>
            </ul>
            {button}
        </aside>"#,
        href = attr(&base),
        name = esc(&author.username),
        bio = bio,
        posts = stats.posts,
        followers = stats.followers,
        following = stats.following,
        button = button,
    )
}

/// The add-comment form shown under a post.
pub fn comment_form(post_path: &str, text: &str, errors: &FieldErrors) -> String {
    format!(
        r#"<form class="comment-form" method="post" action="{action}comment/">
            <label for="id_text">Add a comment</label>
            {errors}
            <textarea id="id_text" name="text" rows="3" required>{text}</textarea>
            <button type="submit">Send</button>
        </form>"#,
        action = attr(post_path),
        errors = field_errors(errors, "text"),
        text = esc(text),
    )
}

pub fn comment_list(comments: &[CommentEntry], viewer: Option<&User>, post_path: &str) -> String {
    if comments.is_empty() {
        return r#"<p class="muted">No comments yet.</p>"#.to_string();
    }
    comments
        .iter()
        .map(|entry| {
            let comment = &entry.comment;
            let actions = if can_edit(viewer, comment) {
                let base = format!("{}comment/{}/", post_path, comment.id);
                format!(
                    r#"<a href="{base}edit/">Edit</a>
                    <form class="inline" method="post" action="{base}delete/"><button type="submit" class="link danger">Delete</button></form>"#,
                    base = attr(&base)
                )
            } else {
                String::new()
            };
            format!(
                r#"<div class="comment">
                    <header><a href="{href}">{name}</a> <span class="muted">{created}</span></header>
                    <p>{text}</p>
                    {actions}
                </div>"#,
                href = attr(&profile_path(&entry.author.username)),
                name = esc(&entry.author.username),
                created = date(&comment.created_at),
                text = esc(&comment.text).replace('\n', "<br>"),
                actions = actions,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

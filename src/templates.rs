use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use rust_embed::RustEmbed;
use spin_sdk::http::Response;

use crate::core::helpers::html;
use crate::models::models::User;

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("Regex should compile"))
}

pub fn load(name: &str) -> anyhow::Result<String> {
    let template = Templates::get(name)
        .ok_or_else(|| anyhow::anyhow!("Template {} not found", name))?
        .data
        .to_vec();
    Ok(String::from_utf8(template)?)
}

/// Fill `{{name}}` slots in one pass. Values are inserted verbatim and never
/// scanned again, so escaped user text cannot smuggle in new slots.
pub fn fill(template: &str, vars: &[(&str, String)]) -> String {
    let vars: HashMap<&str, &str> = vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
    placeholder_regex()
        .replace_all(template, |caps: &Captures| {
            vars.get(&caps[1]).copied().unwrap_or_default().to_string()
        })
        .into_owned()
}

pub fn render(name: &str, vars: &[(&str, String)]) -> anyhow::Result<String> {
    Ok(fill(&load(name)?, vars))
}

pub fn esc(text: &str) -> String {
    html_escape::encode_text(text).to_string()
}

pub fn attr(text: &str) -> String {
    html_escape::encode_double_quoted_attribute(text).to_string()
}

fn nav(viewer: Option<&User>) -> String {
    match viewer {
        Some(user) => format!(
            r#"<a href="/new/">New post</a>
            <a href="/follow/">Following</a>
            <a href="/{name}/">{text}</a>
            <form class="inline" method="post" action="/auth/logout/"><button type="submit">Log out</button></form>"#,
            name = attr(&urlencoding::encode(&user.username)),
            text = esc(&user.username),
        ),
        None => r#"<a href="/auth/login/">Log in</a>
            <a href="/auth/signup/">Sign up</a>"#
            .to_string(),
    }
}

/// Wrap page content in the site layout.
pub fn layout(viewer: Option<&User>, title: &str, content: String) -> anyhow::Result<String> {
    render(
        "base.html",
        &[("title", esc(title)), ("nav", nav(viewer)), ("content", content)],
    )
}

pub fn page(status: u16, viewer: Option<&User>, title: &str, content: String) -> anyhow::Result<Response> {
    Ok(html(status, layout(viewer, title, content)?))
}

/// 404 and 500 pages. Falls back to plain text if the templates are missing.
pub fn error_page(status: u16, path: &str) -> Response {
    let (name, title) = match status {
        404 => ("misc/404.html", "Page not found"),
        _ => ("misc/500.html", "Server error"),
    };
    let body = render(name, &[("path", esc(path))]).and_then(|c| layout(None, title, c));
    match body {
        Ok(body) => html(status, body),
        Err(_) => Response::builder().status(status).body(title).build(),
    }
}

pub fn message_page(status: u16, message: &str) -> Response {
    let body = render(
        "misc/message.html",
        &[("status", status.to_string()), ("message", esc(message))],
    )
    .and_then(|c| layout(None, message, c));
    match body {
        Ok(body) => html(status, body),
        Err(_) => Response::builder().status(status).body(message.to_string()).build(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_single_pass() {
        let out = fill(
            "<p>{{ a }}</p><p>{{b}}</p>{{missing}}",
            &[("a", "{{b}}".to_string()), ("b", "B".to_string())],
        );
        assert_eq!(out, "<p>{{b}}</p><p>B</p>");
    }

    #[test]
    fn every_page_template_is_embedded() {
        for name in [
            "base.html",
            "index.html",
            "group.html",
            "group_form.html",
            "profile.html",
            "post.html",
            "post_form.html",
            "comment_form.html",
            "follow.html",
            "login.html",
            "signup.html",
            "misc/404.html",
            "misc/500.html",
            "misc/message.html",
        ] {
            assert!(load(name).is_ok(), "missing template {}", name);
        }
    }

    #[test]
    fn error_page_escapes_path() {
        let resp = error_page(404, "/<script>/");
        assert_eq!(*resp.status(), 404);
        let body = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(body.contains("&lt;script&gt;"));
        assert!(!body.contains("<script>"));
    }
}

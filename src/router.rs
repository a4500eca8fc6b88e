use log::{debug, error};
use spin_sdk::http::{Request, Response};

use crate::auth::{current_user, handle_login, handle_logout, login_form};
use crate::comments::{edit_comment_form, handle_add_comment, handle_delete_comment, handle_edit_comment};
use crate::config::Config;
use crate::context::Ctx;
use crate::core::db::KvStore;
use crate::core::errors::ApiError;
use crate::core::helpers::redirect;
use crate::feed::{follow_index, index};
use crate::follow::{get_followers_list, get_followings_list, handle_follow, handle_unfollow};
use crate::groups::{group_posts, handle_create_group, handle_delete_group, new_group_form};
use crate::images::serve_image;
use crate::posts::{edit_post_form, handle_delete_post, handle_edit_post, handle_new_post, new_post_form, post_path, post_view};
use crate::static_server::serve_static;
use crate::templates;
use crate::users::{handle_delete_account, handle_signup, profile, signup_form};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Get,
    Post,
    Other,
}

/// Entry point shared by the Spin component and the native server. Never
/// fails: every error becomes a response here.
pub fn handle_request(store: &dyn KvStore, config: &Config, req: Request) -> Response {
    let path = req.path().to_string();
    let method = req.method().to_string();
    debug!("{} {}", method, path);

    let viewer = match current_user(store, config, &req) {
        Ok(viewer) => viewer,
        Err(e) => {
            error!("resolving session for {}: {:#}", path, e);
            return templates::error_page(500, &path);
        }
    };
    let ctx = Ctx::new(store, config, viewer);

    let verb = match method.to_ascii_uppercase().as_str() {
        "GET" | "HEAD" => Verb::Get,
        "POST" => Verb::Post,
        _ => Verb::Other,
    };
    match dispatch(&ctx, verb, &path, &req) {
        Ok(resp) => resp,
        Err(e) => e.into_response(&path),
    }
}

fn dispatch(ctx: &Ctx, verb: Verb, path: &str, req: &Request) -> Result<Response, ApiError> {
    // trailing slashes are optional
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    use Verb::{Get, Post};

    match (verb, segments.as_slice()) {
        (Get, []) => index(ctx, req),
        (Get, ["follow"]) => follow_index(ctx, req),
        (Get, ["new"]) => new_post_form(ctx),
        (Post, ["new"]) => handle_new_post(ctx, req),

        (Get, ["group", slug]) => group_posts(ctx, req, slug),
        (Post, ["group", slug, "delete"]) => handle_delete_group(ctx, slug),
        (Get, ["groups", "new"]) => new_group_form(ctx),
        (Post, ["groups", "new"]) => handle_create_group(ctx, req),

        (Get, ["followers", username]) => get_followers_list(ctx, username),
        (Get, ["followings", username]) => get_followings_list(ctx, username),

        (Get, ["auth", "signup"]) => signup_form(ctx),
        (Post, ["auth", "signup"]) => handle_signup(ctx, req),
        (Get, ["auth", "login"]) => login_form(ctx, req),
        (Post, ["auth", "login"]) => handle_login(ctx, req),
        (Get | Post, ["auth", "logout"]) => handle_logout(ctx, req),
        (Post, ["auth", "delete"]) => handle_delete_account(ctx),

        (Get, ["static", rest @ ..]) if !rest.is_empty() => serve_static(&rest.join("/")),
        (Get, ["media", "posts", name]) => serve_image(ctx.store, name),

        (Get | Post, [username, "follow"]) => handle_follow(ctx, req, username),
        (Get | Post, [username, "unfollow"]) => handle_unfollow(ctx, username),

        (Get, [username]) => profile(ctx, req, username),
        (Get, [username, post_id]) => post_view(ctx, username, post_id),
        (Get, [username, post_id, "edit"]) => edit_post_form(ctx, username, post_id),
        (Post, [username, post_id, "edit"]) => handle_edit_post(ctx, req, username, post_id),
        (Post, [username, post_id, "delete"]) => handle_delete_post(ctx, username, post_id),
        (Get, [username, post_id, "comment"]) => Ok(redirect(&post_path(username, post_id))),
        (Post, [username, post_id, "comment"]) => handle_add_comment(ctx, req, username, post_id),
        (Get, [username, post_id, "comment", comment_id, "edit"]) => {
            edit_comment_form(ctx, username, post_id, comment_id)
        }
        (Post, [username, post_id, "comment", comment_id, "edit"]) => {
            handle_edit_comment(ctx, req, username, post_id, comment_id)
        }
        (Post, [username, post_id, "comment", comment_id, "delete"]) => {
            handle_delete_comment(ctx, username, post_id, comment_id)
        }

        _ => Err(ApiError::NotFound(format!("No route for {}", path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::issue_token;
    use crate::core::db::MemoryStore;
    use crate::test_support::{make_post, make_user};
    use spin_sdk::http::Method;

    fn get(uri: &str, token: Option<&str>) -> Request {
        let mut builder = Request::builder();
        builder.method(Method::Get).uri(uri);
        if let Some(token) = token {
            builder.header("Cookie", format!("quill_session={}", token));
        }
        builder.body(Vec::new()).build()
    }

    fn post(uri: &str, body: &str, token: Option<&str>) -> Request {
        let mut builder = Request::builder();
        builder
            .method(Method::Post)
            .uri(uri)
            .header("Content-Type", "application/x-www-form-urlencoded");
        if let Some(token) = token {
            builder.header("Cookie", format!("quill_session={}", token));
        }
        builder.body(body.as_bytes().to_vec()).build()
    }

    fn body(resp: &Response) -> String {
        String::from_utf8_lossy(resp.body()).into_owned()
    }

    fn location(resp: &Response) -> Option<String> {
        resp.header("Location").and_then(|h| h.as_str()).map(str::to_string)
    }

    #[test]
    fn unknown_paths_render_the_404_page() {
        let store = MemoryStore::new();
        let resp = handle_request(&store, &Config::default(), get("/nobody/x/y/z/w/v/", None));
        assert_eq!(*resp.status(), 404);
        let resp = handle_request(&store, &Config::default(), get("/nobody/", None));
        assert_eq!(*resp.status(), 404);
    }

    #[test]
    fn anonymous_new_post_redirects_to_login() {
        let store = MemoryStore::new();
        let resp = handle_request(&store, &Config::default(), post("/new/", "text=hello", None));
        assert_eq!(*resp.status(), 302);
        assert_eq!(location(&resp).as_deref(), Some("/auth/login/?next=/new/"));
        assert!(store.keys_with_prefix("post:").unwrap().is_empty());
    }

    #[test]
    fn profile_shows_the_single_post() {
        let store = MemoryStore::new();
        let user = make_user(&store, "skywalker");
        let token = issue_token(&store, &user.id).unwrap();
        let resp = handle_request(&store, &Config::default(), post("/new/", "text=test&group=", Some(&token)));
        assert_eq!(*resp.status(), 302);

        let resp = handle_request(&store, &Config::default(), get("/skywalker", None));
        assert_eq!(*resp.status(), 200);
        let html = body(&resp);
        assert!(html.contains(r#"<span class="post-count">1</span>"#));
        assert_eq!(html.matches(r#"<article class="post">"#).count(), 1);
        assert!(html.contains("test"));
    }

    #[test]
    fn non_owner_edit_redirects_to_the_post() {
        let store = MemoryStore::new();
        let owner = make_user(&store, "skywalker");
        let other = make_user(&store, "vader");
        let target = make_post(&store, &owner, None, "mine");
        let token = issue_token(&store, &other.id).unwrap();
        let uri = format!("/skywalker/{}/edit/", target.id);

        let resp = handle_request(&store, &Config::default(), get(&uri, Some(&token)));
        assert_eq!(location(&resp), Some(post_path("skywalker", &target.id)));
        let resp = handle_request(&store, &Config::default(), post(&uri, "text=yours", Some(&token)));
        assert_eq!(location(&resp), Some(post_path("skywalker", &target.id)));
        assert_eq!(crate::posts::get_post(&store, &target.id).unwrap().unwrap().text, "mine");
    }

    #[test]
    fn comment_get_redirects_to_the_post() {
        let store = MemoryStore::new();
        let owner = make_user(&store, "skywalker");
        let target = make_post(&store, &owner, None, "mine");
        let resp = handle_request(
            &store,
            &Config::default(),
            get(&format!("/skywalker/{}/comment/", target.id), None),
        );
        assert_eq!(*resp.status(), 302);
        assert_eq!(location(&resp), Some(post_path("skywalker", &target.id)));
    }

    #[test]
    fn followers_endpoint_returns_json() {
        let store = MemoryStore::new();
        let a = make_user(&store, "leia");
        let b = make_user(&store, "han");
        crate::follow::insert_follow(&store, &a.id, &b.id).unwrap();
        let resp = handle_request(&store, &Config::default(), get("/followers/han", None));
        assert_eq!(*resp.status(), 200);
        let names: Vec<String> = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(names, vec!["leia"]);
    }
}

pub mod auth;
pub mod comments;
pub mod config;
pub mod context;
pub mod core;
pub mod feed;
pub mod follow;
pub mod groups;
pub mod images;
pub mod models;
pub mod pagination;
pub mod permissions;
pub mod posts;
pub mod router;
pub mod static_server;
pub mod stats;
pub mod templates;
pub mod users;
pub mod views;

#[cfg(not(target_arch = "wasm32"))]
pub mod server;

pub use router::handle_request;

// === Component entrypoint ===
#[cfg(target_arch = "wasm32")]
#[spin_sdk::http_component]
fn handle(req: spin_sdk::http::Request) -> anyhow::Result<spin_sdk::http::Response> {
    let store = crate::core::db::SpinStore::open_default()?;
    let config = crate::config::Config::from_env();
    if config.seed {
        crate::core::db::init_test_data(&store)?;
    }
    Ok(router::handle_request(&store, &config, req))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::OnceLock;

    use chrono::Duration;
    use uuid::Uuid;

    use crate::config::group_key;
    use crate::core::db::{JsonStore, KvStore};
    use crate::core::helpers::{hash_password, now};
    use crate::models::models::{Group, Post, User};
    use crate::posts::save_post;
    use crate::users::insert_user;

    /// 1x1 transparent GIF.
    pub const TINY_GIF: &str = "R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

    /// Every test user's password.
    pub const PASSWORD: &str = "password";

    fn password_hash() -> &'static str {
        static HASH: OnceLock<String> = OnceLock::new();
        HASH.get_or_init(|| hash_password(PASSWORD).expect("hashing works"))
    }

    pub fn make_user(store: &dyn KvStore, username: &str) -> User {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password: password_hash().to_string(),
            bio: None,
            created_at: now(),
        };
        insert_user(store, &user).unwrap();
        user
    }

    pub fn make_group(store: &dyn KvStore, slug: &str, title: &str) -> Group {
        let group = Group {
            slug: slug.to_string(),
            title: title.to_string(),
            description: String::new(),
        };
        store.set_json(&group_key(slug), &group).unwrap();
        group
    }

    /// A post created `offset_secs` after a fixed base time, for ordering tests.
    pub fn make_post_at(store: &dyn KvStore, author: &User, group: Option<&str>, text: &str, offset_secs: i64) -> Post {
        let base = now() - Duration::days(1);
        let post = Post {
            id: Uuid::new_v4().to_string(),
            user_id: author.id.clone(),
            group: group.map(str::to_string),
            text: text.to_string(),
            image: None,
            created_at: base + Duration::seconds(offset_secs),
            updated_at: None,
        };
        save_post(store, &post).unwrap();
        post
    }

    pub fn make_post(store: &dyn KvStore, author: &User, group: Option<&str>, text: &str) -> Post {
        let post = Post {
            id: Uuid::new_v4().to_string(),
            user_id: author.id.clone(),
            group: group.map(str::to_string),
            text: text.to_string(),
            image: None,
            created_at: now(),
            updated_at: None,
        };
        save_post(store, &post).unwrap();
        post
    }
}

pub const POSTS_PER_PAGE: usize = 10;
pub const MAX_POST_LENGTH: usize = 5000;
pub const MAX_COMMENT_LENGTH: usize = 2000;
pub const MAX_GROUP_TITLE_LENGTH: usize = 200;
pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 3;
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

pub const SESSION_COOKIE: &str = "quill_session";
pub const LOGIN_PATH: &str = "/auth/login/";

/// First path segments that can never be taken by a username.
pub const RESERVED_USERNAMES: &[&str] = &[
    "auth", "new", "follow", "group", "groups", "static", "media", "followers", "followings",
];

// === Record keys ===
pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn username_key(username: &str) -> String {
    format!("username:{}", username)
}

pub fn group_key(slug: &str) -> String {
    format!("group:{}", slug)
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn comment_prefix(post_id: &str) -> String {
    format!("comment:{}:", post_id)
}

pub fn comment_key(post_id: &str, id: &str) -> String {
    format!("comment:{}:{}", post_id, id)
}

pub fn follow_prefix(user_id: &str) -> String {
    format!("follow:{}:", user_id)
}

pub fn follow_key(user_id: &str, author_id: &str) -> String {
    format!("follow:{}:{}", user_id, author_id)
}

pub fn token_key(token: &str) -> String {
    format!("token:{}", token)
}

pub fn image_key(name: &str) -> String {
    format!("image:{}", name)
}

pub const USER_PREFIX: &str = "user:";
pub const GROUP_PREFIX: &str = "group:";
pub const POST_PREFIX: &str = "post:";
pub const COMMENT_PREFIX: &str = "comment:";
pub const FOLLOW_PREFIX: &str = "follow:";
pub const TOKEN_PREFIX: &str = "token:";
pub const USERNAME_PREFIX: &str = "username:";
pub const IMAGE_PREFIX: &str = "image:";

/// Runtime settings read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub token_expiration_hours: i64,
    pub admins: Vec<String>,
    pub seed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_expiration_hours: 24,
            admins: Vec::new(),
            seed: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            token_expiration_hours: token_expiration_hours(),
            admins: admin_usernames(),
            seed: env_flag("QUILL_SEED"),
        }
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.iter().any(|a| a == username)
    }
}

pub fn token_expiration_hours() -> i64 {
    std::env::var("QUILL_TOKEN_EXPIRATION_HOURS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(24)
}

fn admin_usernames() -> Vec<String> {
    std::env::var("QUILL_ADMINS")
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

use crate::config::Config;
use crate::models::models::{Comment, Post, User};

/// Anything owned by a single author.
pub trait Authored {
    fn author_id(&self) -> &str;
}

impl Authored for Post {
    fn author_id(&self) -> &str {
        &self.user_id
    }
}

impl Authored for Comment {
    fn author_id(&self) -> &str {
        &self.user_id
    }
}

/// Edits are allowed for the resource's author and nobody else.
pub fn can_edit<R: Authored + ?Sized>(viewer: Option<&User>, resource: &R) -> bool {
    viewer.is_some_and(|v| v.id == resource.author_id())
}

pub fn is_admin(config: &Config, viewer: Option<&User>) -> bool {
    viewer.is_some_and(|v| config.is_admin(&v.username))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::helpers::now;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            username: format!("user-{}", id),
            password: String::new(),
            bio: None,
            created_at: now(),
        }
    }

    fn post_by(id: &str) -> Post {
        Post {
            id: "p".to_string(),
            user_id: id.to_string(),
            group: None,
            text: "text".to_string(),
            image: None,
            created_at: now(),
            updated_at: None,
        }
    }

    #[test]
    fn only_the_author_may_edit() {
        let post = post_by("a");
        assert!(can_edit(Some(&user("a")), &post));
        assert!(!can_edit(Some(&user("b")), &post));
        assert!(!can_edit(None, &post));
    }

    #[test]
    fn comments_follow_the_same_rule() {
        let comment = Comment {
            id: "c".to_string(),
            post_id: "p".to_string(),
            user_id: "b".to_string(),
            text: "hi".to_string(),
            created_at: now(),
            updated_at: None,
        };
        assert!(can_edit(Some(&user("b")), &comment));
        assert!(!can_edit(Some(&user("a")), &comment));
    }

    #[test]
    fn admins_come_from_config() {
        let config = Config {
            admins: vec!["user-a".to_string()],
            ..Config::default()
        };
        assert!(is_admin(&config, Some(&user("a"))));
        assert!(!is_admin(&config, Some(&user("b"))));
        assert!(!is_admin(&config, None));
    }
}

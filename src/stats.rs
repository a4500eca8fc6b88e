use serde::Serialize;

use crate::config::POST_PREFIX;
use crate::core::db::{JsonStore, KvStore};
use crate::follow::{get_followers, get_followings};
use crate::models::models::Post;

/// Read-time aggregates for an author; never cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProfileStats {
    pub posts: usize,
    pub followers: usize,
    pub following: usize,
}

pub fn count_posts(store: &dyn KvStore, author_id: &str) -> anyhow::Result<usize> {
    Ok(store
        .scan_json::<Post>(POST_PREFIX)?
        .iter()
        .filter(|p| p.user_id == author_id)
        .count())
}

pub fn profile_stats(store: &dyn KvStore, author_id: &str) -> anyhow::Result<ProfileStats> {
    Ok(ProfileStats {
        posts: count_posts(store, author_id)?,
        followers: get_followers(store, author_id)?.len(),
        following: get_followings(store, author_id)?.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;
    use crate::follow::insert_follow;
    use crate::test_support::{make_post, make_user};

    #[test]
    fn counts_posts_and_both_edge_directions() {
        let store = MemoryStore::new();
        let a = make_user(&store, "anakin");
        let b = make_user(&store, "obiwan");
        let c = make_user(&store, "yoda");
        make_post(&store, &a, None, "one");
        make_post(&store, &a, None, "two");
        make_post(&store, &b, None, "three");
        insert_follow(&store, &b.id, &a.id).unwrap();
        insert_follow(&store, &c.id, &a.id).unwrap();
        insert_follow(&store, &a.id, &c.id).unwrap();

        let stats = profile_stats(&store, &a.id).unwrap();
        assert_eq!(stats, ProfileStats { posts: 2, followers: 2, following: 1 });
        assert_eq!(profile_stats(&store, &b.id).unwrap(), ProfileStats { posts: 1, followers: 0, following: 1 });
    }

    #[test]
    fn stats_reflect_current_state() {
        let store = MemoryStore::new();
        let a = make_user(&store, "anakin");
        let b = make_user(&store, "obiwan");
        insert_follow(&store, &b.id, &a.id).unwrap();
        assert_eq!(profile_stats(&store, &a.id).unwrap().followers, 1);
        crate::follow::delete_follow(&store, &b.id, &a.id).unwrap();
        assert_eq!(profile_stats(&store, &a.id).unwrap().followers, 0);
    }
}

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::config::*;
use crate::core::helpers::{hash_password, now};
use crate::models::models::{Group, Post, User};

/// Byte-level key-value storage. Every mutation touches exactly one key.
pub trait KvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>>;

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// JSON records on top of any [`KvStore`].
pub trait JsonStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>>;
    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()>;
    fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<Vec<T>>;
}

impl<S: KvStore + ?Sized> JsonStore for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).with_context(|| format!("corrupt record {}", key))?,
            )),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.set(key, &serde_json::to_vec(value)?)
    }

    fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<Vec<T>> {
        let mut out = Vec::new();
        for key in self.keys_with_prefix(prefix)? {
            // a key can vanish between listing and reading
            if let Some(value) = self.get_json(&key)? {
                out.push(value);
            }
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// A [`MemoryStore`] mirrored to a JSON file after every write.
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let inner = MemoryStore::new();
        if path.exists() {
            let raw = std::fs::read(&path)
                .with_context(|| format!("reading data file {}", path.display()))?;
            let snapshot: BTreeMap<String, String> = serde_json::from_slice(&raw)?;
            for (key, value) in snapshot {
                inner.set(&key, &STANDARD.decode(value)?)?;
            }
        }
        Ok(Self { path, inner })
    }

    fn flush(&self) -> anyhow::Result<()> {
        let snapshot: BTreeMap<String, String> = self
            .inner
            .lock()?
            .iter()
            .map(|(k, v)| (k.clone(), STANDARD.encode(v)))
            .collect();
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&snapshot)?)?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("writing data file {}", self.path.display()))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.inner.set(key, value)?;
        self.flush()
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner.delete(key)?;
        self.flush()
    }

    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        self.inner.keys_with_prefix(prefix)
    }
}

#[cfg(target_arch = "wasm32")]
pub struct SpinStore(spin_sdk::key_value::Store);

#[cfg(target_arch = "wasm32")]
impl SpinStore {
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self(spin_sdk::key_value::Store::open_default()?))
    }
}

#[cfg(target_arch = "wasm32")]
impl KvStore for SpinStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.0.get(key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Ok(self.0.set(key, value)?)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        Ok(self.0.delete(key)?)
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.0.exists(key)?)
    }

    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .0
            .get_keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

fn seed_user(store: &dyn KvStore, username: &str, bio: &str) -> anyhow::Result<User> {
    if let Some(user) = crate::users::find_by_username(store, username)? {
        return Ok(user);
    }
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        password: hash_password(username)?,
        bio: Some(bio.to_string()),
        created_at: now(),
    };
    crate::users::insert_user(store, &user)?;
    Ok(user)
}

fn seed_post(store: &dyn KvStore, author: &User, group: Option<&str>, text: &str) -> anyhow::Result<()> {
    let post = Post {
        id: Uuid::new_v4().to_string(),
        user_id: author.id.clone(),
        group: group.map(str::to_string),
        text: text.to_string(),
        image: None,
        created_at: now(),
        updated_at: None,
    };
    store.set_json(&post_key(&post.id), &post)
}

pub fn init_test_data(store: &dyn KvStore) -> anyhow::Result<()> {
    if crate::users::find_by_username(store, "test")?.is_some() {
        return Ok(()); // Already initialized
    }

    if store.get_json::<Group>(&group_key("general"))?.is_none() {
        store.set_json(
            &group_key("general"),
            &Group {
                slug: "general".to_string(),
                title: "General".to_string(),
                description: "Anything goes".to_string(),
            },
        )?;
    }

    let test = seed_user(store, "test", "Test user bio")?;
    let alice = seed_user(store, "alice", "Hello, I'm Alice!")?;
    let bob = seed_user(store, "bob", "Bob's corner of the internet")?;

    seed_post(store, &test, None, "This is my first post!")?;
    seed_post(store, &alice, Some("general"), "Welcome to my blog! Excited to share thoughts here.")?;
    seed_post(store, &alice, None, "Just finished an amazing project. Feeling productive today!")?;
    seed_post(store, &bob, Some("general"), "Hey everyone! Looking forward to connecting with you all.")?;

    crate::follow::insert_follow(store, &test.id, &bob.id)?;
    log::info!("seeded demo users test, alice and bob");
    Ok(())
}

pub fn reset_db_data(store: &dyn KvStore) -> anyhow::Result<()> {
    for prefix in [
        USER_PREFIX,
        USERNAME_PREFIX,
        GROUP_PREFIX,
        POST_PREFIX,
        COMMENT_PREFIX,
        FOLLOW_PREFIX,
        TOKEN_PREFIX,
        IMAGE_PREFIX,
    ] {
        for key in store.keys_with_prefix(prefix)? {
            store.delete(&key)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_stops_at_prefix_boundary() {
        let store = MemoryStore::new();
        store.set("post:1", b"1").unwrap();
        store.set("post:2", b"2").unwrap();
        store.set("posts", b"x").unwrap();
        store.set("q", b"x").unwrap();
        assert_eq!(store.keys_with_prefix("post:").unwrap(), vec!["post:1", "post:2"]);
    }

    #[test]
    fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        init_test_data(&store).unwrap();
        let size = store.len();
        init_test_data(&store).unwrap();
        assert_eq!(store.len(), size);
        assert_eq!(store.keys_with_prefix(POST_PREFIX).unwrap().len(), 4);
        assert_eq!(store.keys_with_prefix(FOLLOW_PREFIX).unwrap().len(), 1);
    }

    #[test]
    fn reset_clears_every_family() {
        let store = MemoryStore::new();
        init_test_data(&store).unwrap();
        reset_db_data(&store).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = std::env::temp_dir().join(format!("quill-{}.json", Uuid::new_v4()));
        {
            let store = FileStore::open(&path).unwrap();
            store.set_json("group:x", &"value").unwrap();
            store.set("image:a.png", &[0u8, 159, 146, 150]).unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get_json::<String>("group:x").unwrap().as_deref(), Some("value"));
        assert_eq!(store.get("image:a.png").unwrap(), Some(vec![0u8, 159, 146, 150]));
        let _ = std::fs::remove_file(path);
    }
}

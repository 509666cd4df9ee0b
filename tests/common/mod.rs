#![allow(dead_code)]

use rustuow::command::Command;
use rustuow::prelude::*;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct Blog {
    pub id: i64,
    pub url: String,
    pub rating: i64,
}

impl_entity!(Blog, table = "Blogs", key = id, columns { url, rating });

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub blog_id: i64,
    pub title: String,
}

impl_entity!(Post, table = "Posts", key = id, columns { blog_id, title });

pub fn blog(url: &str, rating: i64) -> Blog {
    Blog {
        id: 0,
        url: url.to_string(),
        rating,
    }
}

pub fn post(blog_id: i64, title: &str) -> Post {
    Post {
        id: 0,
        blog_id,
        title: title.to_string(),
    }
}

/// Blogs, Posts (referencing Blogs), the shared log table and its sequence.
pub fn store() -> MemoryStore {
    populate(MemoryStore::new())
}

pub fn populate(store: MemoryStore) -> MemoryStore {
    store
        .create_table(
            TableSchema::new("Blogs", "id")
                .required("url", DataType::Text)
                .required("rating", DataType::Integer),
        )
        .unwrap();
    store
        .create_table(
            TableSchema::new("Posts", "id")
                .required("blog_id", DataType::Integer)
                .required("title", DataType::Text)
                .foreign_key("blog_id", "Blogs"),
        )
        .unwrap();
    store.create_table(LogEntry::schema()).unwrap();
    store.create_sequence("LoggingSeq").unwrap();
    store
}

pub fn seed_blog(store: &MemoryStore, id: i64, url: &str, rating: i64) {
    store
        .seed(
            "Blogs",
            vec![Value::Integer(id), Value::Text(url.into()), Value::Integer(rating)],
        )
        .unwrap();
}

pub fn seed_post(store: &MemoryStore, id: i64, blog_id: i64, title: &str) {
    store
        .seed(
            "Posts",
            vec![Value::Integer(id), Value::Integer(blog_id), Value::Text(title.into())],
        )
        .unwrap();
}

pub fn builder(store: &MemoryStore, config: PersistenceConfig) -> rustuow::uow::UnitOfWorkFactoryBuilder {
    UnitOfWorkFactory::builder()
        .store(store.clone())
        .config(config)
        .entity::<Blog>()
        .entity::<Post>()
        .entity::<LogEntry>()
        .interceptor(SequenceKeyInterceptor::default())
}

pub async fn factory(store: &MemoryStore) -> UnitOfWorkFactory {
    builder(store, PersistenceConfig::new("tests"))
        .build()
        .await
        .unwrap()
}

pub async fn factory_with(store: &MemoryStore, config: PersistenceConfig) -> UnitOfWorkFactory {
    builder(store, config).build().await.unwrap()
}

pub fn urls(store: &MemoryStore) -> Vec<String> {
    store
        .rows("Blogs")
        .unwrap()
        .into_iter()
        .map(|row| row[1].to_string())
        .collect()
}

/// Captures the text of every command it sees.
#[derive(Clone, Default)]
pub struct Recorder {
    pub commands: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn texts(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandInterceptor for Recorder {
    fn reader_executing(&self, command: &mut Command) {
        self.commands.lock().unwrap().push(command.text.clone());
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use chrono::Utc;
use rustuow::audit::{AuditLog, LogEntry, LogType};
use rustuow::interceptor::{SequenceKeyInterceptor, SequenceSettings, rewrite_sequence_insert};
use rustuow::notify::ChangeNotification;
use rustuow::prelude::*;
use std::io::Read;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "uow-tool")]
#[command(about = "Developer tooling for the rustuow unit of work")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print an insert script with sequence keys swapped in
    Rewrite {
        #[arg(long, default_value = "Logging")]
        table: String,
        #[arg(long, default_value = "LoggingSeq")]
        sequence: String,
        #[arg(long, default_value = "Id")]
        key: String,
        /// Script to rewrite; stdin when omitted
        file: Option<PathBuf>,
    },
    /// Run a small scenario against the in-memory store
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Rewrite {
            table,
            sequence,
            key,
            file,
        } => rewrite(&SequenceSettings::new(&table, &key, &sequence), file),
        Command::Demo => demo().await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rustuow=info,uow_tool=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn rewrite(settings: &SequenceSettings, file: Option<PathBuf>) -> Result<()> {
    let script = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };

    match rewrite_sequence_insert(&script, settings) {
        Some(rewritten) => print!("{}", rewritten),
        None => {
            eprintln!("no insert into {} found, script unchanged", settings.table);
            print!("{}", script);
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct Blog {
    id: i64,
    url: String,
    rating: i64,
}

impl_entity!(Blog, table = "Blogs", key = id, columns { url, rating });

#[derive(Debug, Clone)]
struct Post {
    id: i64,
    blog_id: i64,
    title: String,
}

impl_entity!(Post, table = "Posts", key = id, columns { blog_id, title });

#[derive(Debug, Default)]
struct BlogRow {
    id: i64,
    url: String,
}

impl_from_record!(BlogRow { id, url });

fn demo_store() -> Result<MemoryStore> {
    let store = MemoryStore::new();
    store.create_table(
        TableSchema::new("Blogs", "id")
            .required("url", DataType::Text)
            .required("rating", DataType::Integer),
    )?;
    store.create_table(
        TableSchema::new("Posts", "id")
            .required("blog_id", DataType::Integer)
            .required("title", DataType::Text)
            .foreign_key("blog_id", "Blogs"),
    )?;
    store.create_table(LogEntry::schema())?;
    store.create_sequence("LoggingSeq")?;
    store.register_procedure("GetBlogs", |ctx| ctx.scan("Blogs"))?;

    // a row written by the other application sharing the log table
    store.seed(
        "Logging",
        vec![
            Value::Integer(7),
            Value::Timestamp(Utc::now()),
            Value::from(LogType::Unknown),
            Value::Text("written elsewhere".into()),
            Value::Null,
            Value::Null,
        ],
    )?;
    Ok(store)
}

async fn demo() -> Result<()> {
    let store = demo_store()?;
    let factory = UnitOfWorkFactory::builder()
        .store(store.clone())
        .config(PersistenceConfig::new("demo"))
        .entity::<Blog>()
        .entity::<Post>()
        .entity::<LogEntry>()
        .interceptor(SequenceKeyInterceptor::default())
        .observer(|n: &ChangeNotification| info!(unit = %n.unit, types = ?n.changed_types, "entities changed"))
        .build()
        .await?;

    let mut uow = factory.create().await?;

    let blog_id = uow
        .execute_in_transaction(|uow| {
            Box::pin(async move {
                let mut blog = Blog {
                    id: 0,
                    url: "https://blog.example".into(),
                    rating: 5,
                };
                let handle = uow.add(&blog)?;
                let summary = uow.commit().await?;
                if !summary.assign_key(handle, &mut blog) {
                    anyhow::bail!("store assigned no key to the new blog");
                }

                uow.add(&Post {
                    id: 0,
                    blog_id: blog.id,
                    title: "Hello".into(),
                })?;
                uow.commit().await?;
                Ok::<_, anyhow::Error>(blog.id)
            })
        })
        .await?;
    println!("blog {} saved with one post", blog_id);

    let logged = AuditLog::new(&mut uow)
        .save_log(LogEntry::new(LogType::BlogAdded, blog_id.to_string()).text("demo blog"))
        .await;
    println!("log entry saved: {}", logged);
    for entry in uow.query::<LogEntry>()?.no_tracking().load(&mut uow).await? {
        println!("  log {} {} {}", entry.id, entry.log_type, entry.log_value);
    }

    let rows: Vec<BlogRow> = uow.execute_stored_procedure("GetBlogs", &[]).await?;
    for row in &rows {
        println!("GetBlogs -> {} {}", row.id, row.url);
    }

    let report = uow.clear_all_tables(&["Logging"]).await?;
    println!(
        "cleared {:?}, failures: {}, blogs left: {}, log rows kept: {}",
        report.tables,
        report.failures.len(),
        store.row_count("Blogs")?,
        store.row_count("Logging")?
    );

    uow.dispose().await;
    Ok(())
}

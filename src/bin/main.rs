#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::path::PathBuf;
    use std::sync::Arc;

    use clap::Parser;
    use env_logger::Env;

    use quill::config::Config;
    use quill::core::db::{init_test_data, reset_db_data, FileStore, MemoryStore};
    use quill::server::{run, AppState, SharedStore};

    #[derive(Parser, Debug)]
    #[command(name = "quill", about = "Blogging platform server")]
    struct Args {
        /// Address to listen on
        #[arg(long, env = "QUILL_BIND", default_value = "0.0.0.0:8080")]
        bind: String,

        /// Persist records to this JSON file instead of keeping them in memory
        #[arg(long, env = "QUILL_DATA_FILE")]
        data_file: Option<PathBuf>,

        /// Create the demo users, group and posts on startup
        #[arg(long)]
        seed: bool,

        /// Wipe every stored record before starting
        #[arg(long)]
        reset: bool,
    }

    pub async fn main() -> anyhow::Result<()> {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
        let args = Args::parse();

        let mut config = Config::from_env();
        config.seed |= args.seed;

        let store: SharedStore = match &args.data_file {
            Some(path) => {
                log::info!("using data file {}", path.display());
                Arc::new(FileStore::open(path)?)
            }
            None => {
                log::warn!("no data file configured, records live in memory only");
                Arc::new(MemoryStore::new())
            }
        };
        if args.reset {
            log::warn!("wiping all stored records");
            reset_db_data(&*store)?;
        }
        if config.seed {
            init_test_data(&*store)?;
        }

        run(&args.bind, AppState::new(store, config)).await?;
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    native::main().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}

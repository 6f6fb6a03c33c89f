mod app;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use jsonapi_cache::config::Config;
use jsonapi_cache::logging;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "jcache")]
#[command(about = "Inspect and synchronize a local JSON:API resource cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/jcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List configured resource types
  Types,
  /// Fetch the listing of a resource type from its source
  Sync {
    resource_type: String,
    /// Listing filter as key=value (repeatable)
    #[arg(short, long)]
    filter: Vec<String>,
    /// Refetch even if the cached listing is fresh
    #[arg(long)]
    force: bool,
  },
  /// Print the cached listing of a resource type
  List { resource_type: String },
  /// Print a single record
  Show {
    resource_type: String,
    id: String,
    /// Refetch the record from its source
    #[arg(long)]
    refresh: bool,
  },
  /// Create a record from key=value attributes
  Create {
    resource_type: String,
    attributes: Vec<String>,
  },
  /// Delete a record
  Delete { resource_type: String, id: String },
  /// Print the cache snapshot of a resource type as JSON
  Export { resource_type: String },
  /// Merge a JSON snapshot file into the cache
  Import {
    resource_type: String,
    file: PathBuf,
  },
  /// Drop everything cached for a resource type
  Clear {
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    resource_type: Option<String>,
    /// Clear every configured resource type
    #[arg(long)]
    all: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init(args.verbose, args.log_file.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let mut app = app::App::new(config)?;

  match args.command {
    Command::Types => app.types(),
    Command::Sync {
      resource_type,
      filter,
      force,
    } => {
      let params = app::parse_filters(&filter)?;
      app.sync(&resource_type, params, force).await
    }
    Command::List { resource_type } => app.list(&resource_type),
    Command::Show {
      resource_type,
      id,
      refresh,
    } => app.show(&resource_type, &id, refresh).await,
    Command::Create {
      resource_type,
      attributes,
    } => app.create(&resource_type, &attributes).await,
    Command::Delete { resource_type, id } => app.delete(&resource_type, &id).await,
    Command::Export { resource_type } => app.export(&resource_type),
    Command::Import {
      resource_type,
      file,
    } => app.import(&resource_type, &file),
    Command::Clear { resource_type, .. } => match resource_type {
      Some(resource_type) => app.clear(&resource_type),
      None => app.clear_all(),
    },
  }
}

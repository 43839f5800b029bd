use adaptive_replication::{Config, CsvFeedSource, Pipeline, ReplicationError};
use clap::{Arg, ArgMatches, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ReplicationError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = Command::new("adaptive-replication")
        .version("0.1.0")
        .about("Access-driven replica count and placement planning")
        .subcommand_required(true)
        .subcommand(
            Command::new("plan")
                .about("Cluster files by access behaviour and emit a replica plan")
                .arg(Arg::new("config").long("config").help("JSON run configuration").required(true))
                .arg(Arg::new("manifest").long("manifest").help("File manifest CSV").required(true))
                .arg(
                    Arg::new("access-log")
                        .long("access-log")
                        .help("Access log CSV (ts,path,op,client,pid)")
                        .required(true),
                )
                .arg(Arg::new("nodes").long("nodes").help("Node capacity CSV").required(true))
                .arg(Arg::new("out").long("out").help("Where to write the plan JSON").required(true))
                .arg(
                    Arg::new("diagnostics")
                        .long("diagnostics")
                        .help("Where to write the diagnostics JSON")
                        .required(false),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("plan", args)) => plan(args).await,
        _ => Err(ReplicationError::InvalidConfig("unknown subcommand".to_string())),
    }
}

fn arg<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a String, ReplicationError> {
    args.get_one::<String>(name)
        .ok_or_else(|| ReplicationError::InvalidConfig(format!("--{} is required", name)))
}

async fn plan(args: &ArgMatches) -> Result<(), ReplicationError> {
    let config = Config::load(arg(args, "config")?).await?;
    info!("Run configuration: {:?}", config);

    let source = CsvFeedSource::new(arg(args, "manifest")?, arg(args, "access-log")?, arg(args, "nodes")?);
    let pipeline = Pipeline::new(config)?;
    let output = pipeline.run_feeds(&source).await?;

    let out = arg(args, "out")?;
    output.document.write(out).await?;
    info!("Wrote {} replica plans to {} (fingerprint {})", output.document.plans.len(), out, output.document.fingerprint);

    info!("Diagnostics: {}", serde_json::to_string(&output.diagnostics)?);
    if let Some(path) = args.get_one::<String>("diagnostics") {
        output.diagnostics.write(path).await?;
        info!("Wrote diagnostics to {}", path);
    }

    Ok(())
}

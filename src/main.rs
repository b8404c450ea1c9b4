use std::env;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{error, info, LevelFilter};

use plastid_pipelines::cli::parse;
use plastid_pipelines::config::defs::RunConfig;
use plastid_pipelines::config::settings::ExternalSettings;
use plastid_pipelines::pipelines::plastid_consensus;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n Plastid Pipelines\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}", dir);

    let run_config = match RunConfig::build(args, ExternalSettings::from_env(), dir).await {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(1);
        }
    };
    info!(
        "{} sample(s); reference {} ({} bp); species abbreviation {}; {} thread(s)",
        run_config.samples.len(),
        run_config.reference.path.display(),
        run_config.reference.length,
        run_config.species_abbr,
        run_config.threads
    );

    match plastid_consensus::run(run_config).await {
        Ok(stats) => eprint!("{}", stats.report()),
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(1);
        }
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}

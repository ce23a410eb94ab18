use anyhow::Result;
use candle_hgae::{config::Config, train::Experiment};
use clap::Parser;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse().load_overrides()?;
    log::info!("{config:?}");
    Experiment::new(config)?.run()?;
    Ok(())
}

mod cli;
mod error;
mod model;
mod utils;

use burn::backend::Autodiff;
use clap::Parser;

#[cfg(feature = "cuda")]
pub type MyBackend = burn::backend::Cuda<f32, i32>;
#[cfg(not(feature = "cuda"))]
pub type MyBackend = burn::backend::NdArray<f32>;

pub type MyAutodiffBackend = Autodiff<MyBackend>;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = cli::Cli::parse();
    log::debug!("{cli:?}");
    cli::run(cli)
}

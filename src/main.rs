use anyhow::Result;
use clap::Parser;
use topogen::{CLIArguments, check_main, generate_main, graph_main, vocab_main};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = CLIArguments::parse();

    match args {
        CLIArguments::Generate(args) => generate_main(args),
        CLIArguments::Check(args) => check_main(args),
        CLIArguments::Graph(args) => graph_main(args),
        CLIArguments::Vocab(args) => vocab_main(args),
    }
}

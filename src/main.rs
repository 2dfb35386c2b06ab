// src/main.rs

use seqdag::{cli, config, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();

    let cfg = match config::load_or_default(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("seqdag: configuration error: {err}");
            std::process::exit(1);
        }
    };

    let log = match logging::init_logging(cfg.loglevel.as_deref(), args.verbose, args.quiet) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("seqdag error: {err:?}");
            std::process::exit(1);
        }
    };

    match run(args, cfg, log).await {
        Ok(status) => std::process::exit(status.code()),
        Err(err) => {
            eprintln!("seqdag error: {err:?}");
            std::process::exit(1);
        }
    }
}

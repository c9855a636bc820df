mod app;
mod cli;

use clap::Parser;
use cli::{Cli, Command, RunArgs};
use quizgate_core::config::Config;
use quizgate_core::lifecycle::logging::{LogOptions, init_logging};
use quizgate_core::registry::ProxyRegistry;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => cmd_run(&cli.global, args),
        Command::Check => cmd_check(&cli.global),
    }
}

fn cmd_run(global: &cli::GlobalArgs, args: RunArgs) -> anyhow::Result<()> {
    // Peek at the file only for logging settings; a load error surfaces in build.
    let peek = Config::load(&global.config).ok();
    let _guard = init_logging(&LogOptions {
        level: &global.log_level,
        to_file: peek.as_ref().is_some_and(|c| c.logging_to_file),
        log_dir: peek.as_ref().and_then(|c| c.log_dir.as_deref()),
        json: global.log_json,
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let application = app::Application::build(&global.config, &args)?;
        application.serve().await
    })
}

fn cmd_check(global: &cli::GlobalArgs) -> anyhow::Result<()> {
    let config = Config::load(&global.config)?;
    let registry = ProxyRegistry::empty();
    registry.load(&config.third_party_apis)?;
    let stats = registry.stats();

    println!("Config OK: {}", global.config);
    println!(
        "{} proxies ({} active), {} keys, {} models",
        stats.total_proxies, stats.active_proxies, stats.total_keys, stats.total_models
    );
    for proxy in &stats.proxies {
        println!(
            "  [{}] {} {} keys={} models={}{}",
            proxy.priority,
            proxy.name,
            proxy.base_url,
            proxy.key_count,
            proxy.models.join(","),
            if proxy.active { "" } else { " (inactive)" },
        );
    }
    Ok(())
}

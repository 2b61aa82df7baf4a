// Entry point for `cargo run -p web-server`: serves with `config.toml` and
// environment overrides. The root binary's `serve` subcommand does the same.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = configuration::load_config(None)?;
    let _guard = configuration::init_tracing(&config.logging)?;
    web_server::run_server(config).await
}

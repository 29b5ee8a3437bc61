// Entry point for `cargo run -p web-server`: serve only, no subcommands.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (settings, env_file) = configuration::load_settings()?;
    web_server::init_tracing(settings.app.debug);
    env_file.log();
    web_server::run_server(settings).await
}

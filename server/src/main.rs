use server::{launch_app, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let settings = Settings::load(None).await?;
    let listener = std::net::TcpListener::bind(&settings.listen_addr)?;
    launch_app(listener, settings).await
}

use anyhow::Context;
use clap::Parser;
use model_viewer::{Application, cli::Cli, layers::ModelViewerLayer, platform::DesktopPlatform};

fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str())).init();

  let config = cli.app_config().context("invalid configuration")?;
  let mut app = Application::new(config)?;

  let viewer = ModelViewerLayer::new();
  if let Some(path) = &cli.model {
    viewer.queue_model(path.clone());
  }
  app.push_layer(viewer);

  app.run(DesktopPlatform::new())?;
  Ok(())
}

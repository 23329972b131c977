use anyhow::Result;
use clap::Parser;
use enginemux::config::Config;
use enginemux::fleet::Fleet;
use enginemux::health::HealthProber;
use enginemux::mirror::MirrorPool;
use enginemux::router::Router;
use enginemux::server::App;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
	/// Comma-separated list of execution node urls
	#[arg(long, value_name = "urls")]
	nodes: String,

	/// File holding the hex-encoded 32-byte engine jwt secret
	#[arg(long, value_name = "file")]
	jwt_secret: std::path::PathBuf,

	/// Port to listen on
	#[arg(long, default_value_t = 8000)]
	port: u16,

	/// Address to bind
	#[arg(long, default_value = "0.0.0.0")]
	listen_addr: String,

	/// Fraction of identical responses required before an INVALID
	/// forkchoice verdict is trusted
	#[arg(long, default_value_t = 0.6)]
	fcu_invalid_threshold: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
		.init();

	let args = Args::parse();
	let config = Config::load(
		&args.nodes,
		&args.jwt_secret,
		args.port,
		args.listen_addr,
		args.fcu_invalid_threshold,
	)?;

	let client = reqwest::Client::builder()
		.timeout(Duration::from_secs(8))
		.build()?;

	let fleet = Arc::new(Fleet::new(config.nodes, client));
	let prober = HealthProber::new(fleet.clone(), Arc::new(config.secret));
	let mirror = MirrorPool::new(num_cpus::get());
	let router = Arc::new(Router::new(
		fleet,
		prober.clone(),
		mirror,
		config.fcu_invalid_threshold,
	));

	// label the fleet before accepting any traffic
	prober.run_cycle().await;
	tokio::spawn(prober.run());

	let app = App::new(router);
	let listener =
		tokio::net::TcpListener::bind((config.listen_addr.as_str(), config.port)).await?;
	info!("listening on {}:{}", config.listen_addr, config.port);

	tokio::select! {
		res = async { axum::serve(listener, app.router()).await } => {
			res?;
		},
		signal = shutdown_signal() => {
			info!("caught {}, stopping", signal);
		},
	}
	Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
	use tokio::signal::unix::{SignalKind, signal};
	let mut interrupt = signal(SignalKind::interrupt()).expect("failed to register signal handler");
	let mut terminate = signal(SignalKind::terminate()).expect("failed to register signal handler");
	tokio::select! {
		_ = interrupt.recv() => "SIGINT",
		_ = terminate.recv() => "SIGTERM",
	}
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
	let _ = tokio::signal::ctrl_c().await;
	"ctrl-c"
}

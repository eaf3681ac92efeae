use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	let cli = place_server::cli::Cli::parse();
	place_server::run(cli).await
}

use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = feedliker::Cli::parse();
    match feedliker::run(cli).await {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the security gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status and detector mode
    Status,
    /// List actors currently blocked
    Blocks,
    /// View pipeline counters
    Stats,
    /// Lift every block on an actor
    Unblock {
        /// Actor key (client IP address)
        actor: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = match &cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Blocks => client.get(format!("{}/admin/blocks", cli.url)),
        Commands::Stats => client.get(format!("{}/admin/stats", cli.url)),
        Commands::Unblock { actor } => client.delete(format!(
            "{}/admin/blocks/{}",
            cli.url,
            urlencoding::encode(actor)
        )),
    }
    .headers(headers)
    .send()
    .await?;

    if let Commands::Unblock { actor } = &cli.command {
        match res.status() {
            reqwest::StatusCode::NO_CONTENT => println!("Unblocked {}", actor),
            reqwest::StatusCode::NOT_FOUND => println!("{} was not blocked", actor),
            status => eprintln!("Error: Admin API returned status {}", status),
        }
        return Ok(());
    }

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

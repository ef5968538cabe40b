use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "cluster-cli")]
#[command(about = "Management CLI for media-cluster", long_about = None)]
struct Cli {
    /// Admin API base URL (primary for status/cluster, worker port for breakers)
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "MEDIA_CLUSTER_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check primary status
    Status,
    /// Aggregate worker metrics
    Cluster,
    /// List circuit breakers on one worker
    Breakers,
    /// Reset one circuit breaker
    Reset { name: String },
    /// Reset every circuit breaker
    ResetAll,
    /// Remove a circuit breaker
    Remove { name: String },
}

impl Commands {
    fn request(&self) -> (Method, String) {
        match self {
            Commands::Status => (Method::GET, "/admin/status".to_string()),
            Commands::Cluster => (Method::GET, "/admin/cluster".to_string()),
            Commands::Breakers => (Method::GET, "/admin/breakers".to_string()),
            Commands::Reset { name } => (Method::POST, format!("/admin/breakers/{}/reset", name)),
            Commands::ResetAll => (Method::POST, "/admin/breakers/reset".to_string()),
            Commands::Remove { name } => (Method::DELETE, format!("/admin/breakers/{}", name)),
        }
    }
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

    let (method, path) = cli.command.request();
    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Details: {}", text);
            }
        }
        std::process::exit(1);
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("OK ({})", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

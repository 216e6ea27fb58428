use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "admin-cli")]
#[command(about = "Admin CLI for the HTTP autoscaler interceptor", long_about = None)]
struct Cli {
    /// Interceptor admin base URL.
    #[arg(short, long, default_value = "http://localhost:9090", env = "HTTP_AUTOSCALER_ADMIN_URL")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the replica's pending request count
    Queue,
    /// Print the installed routing table
    Routes,
    /// Ask the replica to re-fetch the routing table
    Refresh,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Queue => {
            let res = client.get(format!("{}/queue", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Routes => {
            let res = client.get(format!("{}/routing_table", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Refresh => {
            let res = client.post(format!("{}/routing_ping", base)).send().await?;
            let status = res.status();
            let text = res.text().await?;
            if status.is_success() {
                println!("{}", text);
            } else {
                eprintln!("Error: refresh returned status {}: {}", status, text);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

use clap::{Parser, Subcommand, ValueEnum};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Admin CLI for the guard service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Session token of an allowlisted admin.
    #[arg(short, long)]
    session: String,

    /// Session cookie name configured on the server.
    #[arg(long, default_value = "session")]
    cookie_name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show service status and read-only flag
    Status,
    /// Show the most recent audit entries
    Audit {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Verify the audit hash chain
    Verify,
    /// Run an ingestion job
    Ingest {
        /// `verify-and-upsert` or `enrich`
        job: String,
        /// Company ids to process
        companies: Vec<String>,
    },
    /// Switch read-only mode
    ReadOnly {
        #[arg(value_enum)]
        mode: Switch,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let session_cookie = format!("{}={}", cli.cookie_name, cli.session);

    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_str(&session_cookie)?);

    match cli.command {
        Commands::Status => {
            let res = client
                .get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Audit { limit } => {
            let res = client
                .get(format!("{}/admin/audit", cli.url))
                .query(&[("limit", limit)])
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Verify => {
            let res = client
                .get(format!("{}/admin/audit/verify", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Ingest { job, companies } => {
            let headers = with_csrf(&client, &cli.url, &session_cookie).await?;
            let res = client
                .post(format!("{}/admin/ingest/{}", cli.url, job))
                .headers(headers)
                .json(&json!({ "company_ids": companies }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::ReadOnly { mode } => {
            let headers = with_csrf(&client, &cli.url, &session_cookie).await?;
            let res = client
                .post(format!("{}/admin/read-only", cli.url))
                .headers(headers)
                .json(&json!({ "enabled": matches!(mode, Switch::On) }))
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

/// Fetch a CSRF token and return headers carrying the session cookie, the
/// CSRF cookie and the matching `x-csrf-token` header.
async fn with_csrf(
    client: &reqwest::Client,
    url: &str,
    session_cookie: &str,
) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let body: Value = client
        .get(format!("{}/api/csrf-token", url))
        .header(COOKIE, session_cookie)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let token = body["token"]
        .as_str()
        .ok_or("csrf-token response has no token")?;

    let mut headers = HeaderMap::new();
    headers.insert(
        COOKIE,
        HeaderValue::from_str(&format!("{}; csrf-token={}", session_cookie, token))?,
    );
    headers.insert("x-csrf-token", HeaderValue::from_str(token)?);
    Ok(headers)
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

use clap::{Parser, Subcommand, ValueEnum};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Management CLI for the DApp provider bridge", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8787")]
    url: String,

    #[arg(short, long, env = "BRIDGE_ADMIN_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Tier {
    Slow,
    Standard,
    Fast,
}

impl Tier {
    fn as_str(self) -> &'static str {
        match self {
            Tier::Slow => "slow",
            Tier::Standard => "standard",
            Tier::Fast => "fast",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Wallet and daemon status
    Status,
    /// Lock state and failed unlock attempts
    Session,
    /// Unlock the wallet
    Unlock {
        #[arg(long, env = "BRIDGE_PASSWORD")]
        password: String,
    },
    /// Lock the wallet
    Lock,
    /// List pending approval requests
    Approvals,
    /// Approve a connect or permission request
    ApproveConnect { id: String },
    /// Approve a transaction request
    ApproveTx {
        id: String,
        #[arg(long, value_enum, default_value = "standard")]
        tier: Tier,
        #[arg(long, env = "BRIDGE_PASSWORD")]
        password: String,
    },
    /// Approve a signing request
    ApproveSign {
        id: String,
        #[arg(long, env = "BRIDGE_PASSWORD")]
        password: String,
    },
    /// Reject a pending request
    Reject { id: String },
    /// List connected origins
    Connections,
    /// Disconnect one origin, or every origin when none is given
    Disconnect { origin: Option<String> },
    /// Import a private key, or generate one when none is given
    ImportKey {
        #[arg(long)]
        private_key: Option<String>,
        #[arg(long, env = "BRIDGE_PASSWORD")]
        password: String,
    },
    /// Re-encrypt every key under a new password
    ChangePassword {
        #[arg(long)]
        old_password: String,
        #[arg(long)]
        new_password: String,
    },
    /// Price a send on the active chain
    Estimate {
        to: String,
        amount: String,
        #[arg(long)]
        token: Option<String>,
    },
    /// Sign and broadcast a send on the active chain
    Send {
        to: String,
        amount: String,
        #[arg(long)]
        token: Option<String>,
        #[arg(long, value_enum, default_value = "standard")]
        tier: Tier,
        #[arg(long, env = "BRIDGE_PASSWORD")]
        password: String,
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
    let request = |method: Method, path: &str| -> RequestBuilder {
        client
            .request(method, format!("{}{}", cli.url, path))
            .headers(headers.clone())
    };

    let builder = match cli.command {
        Commands::Status => request(Method::GET, "/status"),
        Commands::Session => request(Method::GET, "/session"),
        Commands::Unlock { password } => {
            request(Method::POST, "/session/unlock").json(&json!({ "password": password }))
        }
        Commands::Lock => request(Method::POST, "/session/lock"),
        Commands::Approvals => request(Method::GET, "/approvals"),
        Commands::ApproveConnect { id } => request(Method::POST, &format!("/approvals/{id}/approve"))
            .json(&json!({ "kind": "connect" })),
        Commands::ApproveTx { id, tier, password } => {
            request(Method::POST, &format!("/approvals/{id}/approve")).json(&json!({
                "kind": "transaction",
                "tier": tier.as_str(),
                "password": password,
            }))
        }
        Commands::ApproveSign { id, password } => {
            request(Method::POST, &format!("/approvals/{id}/approve"))
                .json(&json!({ "kind": "sign", "password": password }))
        }
        Commands::Reject { id } => request(Method::POST, &format!("/approvals/{id}/reject")),
        Commands::Connections => request(Method::GET, "/connections"),
        Commands::Disconnect { origin } => {
            let builder = request(Method::DELETE, "/connections");
            match origin {
                Some(origin) => builder.query(&[("origin", origin)]),
                None => builder,
            }
        }
        Commands::ImportKey { private_key, password } => request(Method::POST, "/keys/import")
            .json(&json!({ "privateKey": private_key, "password": password })),
        Commands::ChangePassword { old_password, new_password } => {
            request(Method::POST, "/keys/password").json(&json!({
                "oldPassword": old_password,
                "newPassword": new_password,
            }))
        }
        Commands::Estimate { to, amount, token } => request(Method::POST, "/wallet/estimate")
            .json(&json!({ "to": to, "amount": amount, "token": token })),
        Commands::Send { to, amount, token, tier, password } => {
            request(Method::POST, "/wallet/send").json(&json!({
                "to": to,
                "amount": amount,
                "token": token,
                "tier": tier.as_str(),
                "password": password,
            }))
        }
    };

    print_response(builder.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: management API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

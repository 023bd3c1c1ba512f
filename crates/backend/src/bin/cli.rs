use anyhow::Context;
use clap::{Parser, Subcommand};
use reqwest::Client;
use shared_types::{PredictRequest, ScanRecord, UpdateStatusRequest};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "phish-cli")]
#[command(about = "CLI for classifying emails and reviewing scan results via the backend API")]
#[command(
    long_about = "A command-line interface for interacting with the phishing scanner backend.\n\n\
    Sends email bodies to the classifier, lists a user's scanned emails and\n\
    overrides verdicts by hand."
)]
struct Cli {
    /// Backend server URL to connect to.
    ///
    /// The CLI will make HTTP requests to this server's API endpoints.
    /// Use this to connect to a remote server or a different port.
    #[arg(
        short,
        long,
        default_value = "http://localhost:8000",
        env = "PHISH_API_URL"
    )]
    base_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify one or more email bodies
    ///
    /// Prints one verdict per body, in the order given. Bodies the classifier
    /// could not score are reported as "error".
    Predict {
        /// Email bodies to classify. HTML is accepted.
        bodies: Vec<String>,

        /// Read an additional body from this file.
        #[arg(short, long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Inspect and correct stored scan results
    Emails {
        #[command(subcommand)]
        action: EmailAction,
    },
}

#[derive(Subcommand)]
enum EmailAction {
    /// List a user's scanned emails, most recently stored first
    List {
        /// Mailbox address the records belong to.
        #[arg(short, long, value_name = "EMAIL")]
        user_id: String,
    },

    /// List a user's scanned emails, newest message first
    ///
    /// Requires an access token issued to the same user.
    Phishing {
        /// Mailbox address the records belong to.
        #[arg(short, long, value_name = "EMAIL")]
        user_email: String,

        /// Provider access token for that mailbox.
        #[arg(short, long, env = "PHISH_ACCESS_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Override the verdict of one scanned email
    UpdateStatus {
        /// Record id, as shown by 'emails list'.
        id: i32,

        /// New verdict: "Phishing" or "Safe".
        status: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = cli.base_url.trim_end_matches('/');

    match cli.command {
        Commands::Predict { bodies, file } => handle_predict(&client, base_url, bodies, file).await?,
        Commands::Emails { action } => handle_emails(&client, base_url, action).await?,
    }

    Ok(())
}

async fn handle_predict(
    client: &Client,
    base_url: &str,
    mut bodies: Vec<String>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(file) = file {
        let content = std::fs::read_to_string(&file).context("Failed to read email file")?;
        bodies.push(content);
    }
    if bodies.is_empty() {
        anyhow::bail!("Nothing to classify: pass email bodies or --file");
    }

    let req = PredictRequest { emails: bodies };
    let verdicts: Vec<String> = client
        .post(format!("{}/predict", base_url))
        .json(&req)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    for (index, (body, verdict)) in req.emails.iter().zip(&verdicts).enumerate() {
        println!("{:>3}. {:<12} {}", index + 1, verdict, preview(body));
    }

    Ok(())
}

async fn handle_emails(client: &Client, base_url: &str, action: EmailAction) -> anyhow::Result<()> {
    match action {
        EmailAction::List { user_id } => {
            let records: Vec<ScanRecord> = client
                .get(format!("{}/emails", base_url))
                .query(&[("user_id", &user_id)])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            print_records(&records);
        }
        EmailAction::Phishing { user_email, token } => {
            let records: Vec<ScanRecord> = client
                .get(format!("{}/phishing-emails", base_url))
                .query(&[("user_email", &user_email)])
                .bearer_auth(token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            print_records(&records);
        }
        EmailAction::UpdateStatus { id, status } => {
            let req = UpdateStatusRequest { status };
            let record: ScanRecord = client
                .patch(format!("{}/update-email-status/{}", base_url, id))
                .json(&req)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("Updated email [{}] {} -> {}", record.id, record.subject, record.status);
        }
    }

    Ok(())
}

fn print_records(records: &[ScanRecord]) {
    if records.is_empty() {
        println!("No emails found.");
        return;
    }
    for record in records {
        let marker = if record.status == "Phishing" { "!" } else { " " };
        println!(
            "{} [{}] {:<12} {} ({})",
            marker, record.id, record.status, record.subject, record.sender
        );
        if !record.date.is_empty() {
            println!("    Received: {}", record.date);
        }
    }
}

fn preview(body: &str) -> String {
    let line = body.lines().next().unwrap_or_default().trim();
    if line.chars().count() > 60 {
        format!("{}...", line.chars().take(60).collect::<String>())
    } else {
        line.to_string()
    }
}

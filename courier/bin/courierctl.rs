//! Command-line utility for managing a running courier instance
//!
//! Talks to the control socket to:
//! - inspect and prune the spool queue
//! - list, view and replay mail held in repositories such as `dead-letter`
//! - submit a message straight into the pipeline

use std::{io::Read, path::PathBuf, time::Duration};

use clap::{ArgGroup, Parser, Subcommand};
use courier_control::{
    ControlClient, DEFAULT_CONTROL_SOCKET, QueueCommand, RepositoryCommand, RequestCommand,
    ResponseData, ResponsePayload, SystemCommand, auth::hash_token,
};

/// Command-line utility for managing courier
#[derive(Parser, Debug)]
#[command(name = "courierctl")]
#[command(about = "Manage a running courier instance", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the control socket
    #[arg(short = 'c', long, default_value = DEFAULT_CONTROL_SOCKET)]
    control_socket: String,

    /// Token sent when the server requires authentication
    #[arg(long, env = "COURIER_CONTROL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Seconds to wait for a response
    #[arg(long, default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// System status and liveness
    System {
        #[command(subcommand)]
        action: SystemAction,
    },
    /// Spool queue management
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Mail held in named repositories
    Repository {
        #[command(subcommand)]
        action: RepositoryAction,
    },
    /// Submit a message read from a file, or stdin when no file is given
    Submit {
        /// Envelope sender, omit for the null sender
        #[arg(long)]
        from: Option<String>,

        /// Envelope recipient, may be repeated
        #[arg(long = "to", required = true)]
        recipients: Vec<String>,

        file: Option<PathBuf>,
    },
    /// Print the SHA-256 hash of a token, for `control.auth.token_hashes`
    HashToken { token: String },
}

#[derive(Subcommand, Debug)]
enum SystemAction {
    /// Check that courier is responding
    Ping,
    /// Version, uptime, queue size and processors
    Status,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// Number of queued mails
    Size,
    /// Ready, delayed and leased counts
    Stats,
    /// Remove every queued mail not currently being processed
    Clear,
    /// Make delayed mail visible now
    Flush,
    /// Remove queued mail by id, sender or recipient
    #[command(group(ArgGroup::new("selector").required(true).args(["name", "sender", "recipient"])))]
    Remove {
        /// Mail id, or a root id to remove every branch
        #[arg(long)]
        name: Option<String>,

        /// Envelope sender, `<>` for the null sender
        #[arg(long)]
        sender: Option<String>,

        #[arg(long)]
        recipient: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum RepositoryAction {
    /// Names of the configured repositories
    Names,
    /// Mail held in a repository
    List { repository: String },
    /// Headers, attributes and the start of the body of a held mail
    View { repository: String, id: String },
    /// Queue a held mail again from the initial state
    Replay { repository: String, id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::HashToken { token } => {
            println!("{}", hash_token(&token));
            return Ok(());
        }
        Commands::System { action } => RequestCommand::System(match action {
            SystemAction::Ping => SystemCommand::Ping,
            SystemAction::Status => SystemCommand::Status,
        }),
        Commands::Queue { action } => RequestCommand::Queue(queue_command(action)?),
        Commands::Repository { action } => RequestCommand::Repository(match action {
            RepositoryAction::Names => RepositoryCommand::Names,
            RepositoryAction::List { repository } => RepositoryCommand::List { repository },
            RepositoryAction::View { repository, id } => RepositoryCommand::View { repository, id },
            RepositoryAction::Replay { repository, id } => {
                RepositoryCommand::Replay { repository, id }
            }
        }),
        Commands::Submit {
            from,
            recipients,
            file,
        } => RequestCommand::Submit {
            sender: from,
            recipients,
            content: read_message(file.as_ref())?,
        },
    };

    let client = connect(&cli.control_socket, cli.token, cli.timeout)?;
    let response = client.execute(command).await?;

    match response.payload {
        ResponsePayload::Ok => println!("OK"),
        ResponsePayload::Data(data) => print_data(*data),
        ResponsePayload::Error(err) => anyhow::bail!("Server error: {err}"),
    }

    Ok(())
}

fn queue_command(action: QueueAction) -> anyhow::Result<QueueCommand> {
    Ok(match action {
        QueueAction::Size => QueueCommand::Size,
        QueueAction::Stats => QueueCommand::Stats,
        QueueAction::Clear => QueueCommand::Clear,
        QueueAction::Flush => QueueCommand::Flush,
        QueueAction::Remove {
            name,
            sender,
            recipient,
        } => match (name, sender, recipient) {
            (Some(name), _, _) => QueueCommand::RemoveByName(name),
            (_, Some(sender), _) => QueueCommand::RemoveBySender(sender),
            (_, _, Some(recipient)) => QueueCommand::RemoveByRecipient(recipient),
            _ => anyhow::bail!("One of --name, --sender or --recipient is required"),
        },
    })
}

fn read_message(file: Option<&PathBuf>) -> anyhow::Result<Vec<u8>> {
    match file {
        Some(path) => std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display())),
        None => {
            let mut content = Vec::new();
            std::io::stdin().read_to_end(&mut content)?;
            Ok(content)
        }
    }
}

fn connect(socket_path: &str, token: Option<String>, timeout: u64) -> anyhow::Result<ControlClient> {
    let mut client = ControlClient::new(socket_path).with_timeout(Duration::from_secs(timeout));
    if let Some(token) = token {
        client = client.with_token(token);
    }

    if let Err(e) = client.check_socket_exists() {
        anyhow::bail!(
            "Cannot connect to the courier control socket at {socket_path}.\n\
             Error: {e}\n\
             \n\
             Is courier running?\n\
             You can configure the socket path with --control-socket or in courier.config.ron"
        );
    }

    Ok(client)
}

fn print_data(data: ResponseData) {
    match data {
        ResponseData::SystemStatus(status) => println!("{status}"),
        ResponseData::Count(-1) => println!("Spool repository unavailable, see the server log"),
        ResponseData::Count(count) => println!("{count}"),
        ResponseData::QueueStats(stats) => println!("{stats}"),
        ResponseData::Repositories(names) => {
            for name in names {
                println!("{name}");
            }
        }
        ResponseData::MailList(entries) => {
            if entries.is_empty() {
                println!("No mail held");
                return;
            }
            for entry in &entries {
                println!("{entry}\n");
            }
            println!("Total: {} mail(s)", entries.len());
        }
        ResponseData::MailDetails(details) => println!("{details}"),
        ResponseData::Message(message) => println!("{message}"),
    }
}

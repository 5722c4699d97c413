use std::io::{self, Write};
use std::path::Path;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tradfri_mood::{session, Credentials, Error, Gateway, PskStore, Session, CONFIG_FILE};

/// Set a mood on a Tradfri group depending on the state of one of its
/// bulbs. Meant to be run periodically, e.g. from cron:
///
///     0 6 * * 1-5 change-mood 192.168.178.45 bathroom light FOCUS "FOCUS OFF"
///
/// activates "FOCUS" at 6:00 on weekdays if the bulb named "light" is on,
/// and "FOCUS OFF" (which leaves the light off) otherwise.
#[derive(Parser)]
#[command(author, version, about, verbatim_doc_comment)]
struct Cli {
    /// IP address of your Tradfri gateway
    #[arg(value_name = "IP")]
    host: String,
    /// Name of the Tradfri group
    group: String,
    /// This member of the group determines the group state
    object_determining_state: String,
    /// Mood to set if the group is on
    mood_on: String,
    /// Mood to set if the group is off
    mood_off: String,
    /// Security code found on your Tradfri gateway
    #[arg(short = 'K', long)]
    key: Option<String>,
}

fn main() -> Result<()> {
    // Initialize tracing with pretty colors
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("tradfri_mood=info,change_mood=info")),
        )
        .compact()
        .init();

    // Initialize color-eyre for pretty error reporting
    color_eyre::install()?;

    let mut cli = Cli::parse();
    debug!("Parsed command line arguments");

    let config_path = Path::new(CONFIG_FILE);
    let mut store = PskStore::load(config_path)?;

    // First contact with this gateway and no --key: ask for the code.
    if store.get(&cli.host).is_none() && cli.key.is_none() {
        cli.key = Some(prompt_security_code()?);
    }

    let credentials = match store.get(&cli.host).cloned() {
        Some(credentials) => credentials,
        None => {
            let security_code = cli.key.take().ok_or(Error::MissingSecurityCode)?;
            info!("No stored credentials for {}, pairing with the gateway", cli.host);
            let identity = Uuid::new_v4().simple().to_string();
            let key = session::generate_psk(&cli.host, &security_code, &identity)?;
            info!("Generated PSK: {}", key);
            let credentials = Credentials { identity, key };
            store.insert(cli.host.clone(), credentials.clone());
            store.save(config_path)?;
            credentials
        }
    };

    let session = Session::connect(&cli.host, &credentials.identity, &credentials.key)?;
    let mut gateway = Gateway::new(session);

    gateway.change_mood(
        &cli.group,
        &cli.object_determining_state,
        &cli.mood_on,
        &cli.mood_off,
    )?;

    Ok(())
}

/// Asks for the gateway's security code on the terminal, one attempt.
fn prompt_security_code() -> Result<String, Error> {
    print!("Please provide the 'Security Code' on the back of your Tradfri gateway: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    security_code_from_input(&input)
}

/// Security codes are exactly 16 characters; anything else is rejected.
fn security_code_from_input(input: &str) -> Result<String, Error> {
    let code = input.trim();
    if code.len() != 16 {
        return Err(Error::InvalidSecurityCode);
    }
    Ok(code.to_string())
}

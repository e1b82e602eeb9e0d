use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::time::Instant;

use q2net::protocol::{PRINT_CHAT, PRINT_HIGH, PRINT_LOW, PRINT_MEDIUM};
use q2net::{ClientConfig, NetworkClient, NetworkEvent, UserCommand};

const SERVER_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "q2client")]
#[command(about = "Quake II protocol network client")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Query a server's name, map and player count without joining
    Query {
        #[arg(help = "Server address (e.g., 127.0.0.1:27910 or ws://localhost:8080)")]
        address: String,
    },
    /// Measure the time it takes to open a session
    Ping { address: String },
    /// Join a server and idle until disconnected
    Connect {
        address: String,

        #[arg(short, long, default_value = "Player")]
        name: String,

        #[arg(short, long, default_value_t = 3)]
        retries: u32,

        #[arg(short, long, help = "Disconnect after this many seconds")]
        duration: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Command::Query { address } => {
            let client = NetworkClient::new(ClientConfig::default());
            let info = client.query_server(&address).await?;
            println!("Address:  {}", info.address);
            println!("Name:     {}", info.name);
            println!("Map:      {}", info.map);
            println!("Players:  {}/{}", info.players, info.max_players);
            println!("Game:     {}", info.gamemode);
            println!("Ping:     {} ms", info.ping);
        }
        Command::Ping { address } => {
            let client = NetworkClient::new(ClientConfig::default());
            let elapsed = client.ping(&address).await?;
            println!("{}: {} ms", address, elapsed.as_millis());
        }
        Command::Connect {
            address,
            name,
            retries,
            duration,
        } => {
            let config = ClientConfig {
                name,
                max_retries: retries,
                ..Default::default()
            };
            run_session(NetworkClient::new(config), &address, duration).await?;
        }
    }

    Ok(())
}

async fn run_session(client: NetworkClient, address: &str, duration: Option<u64>) -> Result<()> {
    let mut events = client.subscribe();
    client.connect(address).await?;

    let interval = client.config().send_interval();
    let msec = interval.as_millis().clamp(1, u8::MAX as u128) as u8;
    let mut ticker = tokio::time::interval(interval);

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let stop = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if client.is_timed_out(Duration::from_secs(SERVER_TIMEOUT_SECS)) {
                    log::warn!("Server connection lost");
                    client.disconnect("Server timed out");
                    break;
                }
                client.send_command(&UserCommand::new(msec));
            }
            Some(event) = events.recv() => {
                if !report(&event) {
                    break;
                }
            }
            _ = &mut stop => {
                client.disconnect("User disconnected");
                break;
            }
            _ = &mut ctrl_c => {
                client.disconnect("User disconnected");
                break;
            }
        }
    }

    Ok(())
}

/// Logs one event; returns `false` once the session is over.
fn report(event: &NetworkEvent) -> bool {
    match event {
        NetworkEvent::Connected => log::info!("Connected"),
        NetworkEvent::Disconnected { reason } => {
            log::info!("Disconnected: {}", reason);
            return false;
        }
        NetworkEvent::Error { message } => log::error!("{}", message),
        NetworkEvent::Snapshot(snapshot) => log::trace!("Frame {}", snapshot.time),
        NetworkEvent::ServerCommand { opcode, body } => {
            log::trace!("svc {} ({} bytes)", opcode, body.len());
        }
        NetworkEvent::ConfigString { index, value } => log::debug!("cs {} = {}", index, value),
        NetworkEvent::Print { level, text } => match *level {
            PRINT_LOW => log::debug!("{}", text.trim_end()),
            PRINT_MEDIUM => log::info!("{}", text.trim_end()),
            PRINT_HIGH | PRINT_CHAT => print!("{}", text),
            other => log::debug!("print level {}: {}", other, text.trim_end()),
        },
        NetworkEvent::CenterPrint(text) => println!("{}", text),
        NetworkEvent::StuffText(text) => log::debug!("stufftext: {}", text.trim_end()),
        NetworkEvent::ServerData(data) => log::info!("Game: {}", data.game_dir),
    }
    true
}

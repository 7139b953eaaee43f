use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand};
use futures::future::try_join_all;

use token_lease::{
    client::{send_close, ClientSession, LeaseClient},
    config::{ClientConfig, ServerConfig, TransportConfig},
    error::Result,
    interface::Transport,
    transport::UnixDatagramTransport,
    util::clock::{Clock, SystemClock},
    LeaseServer,
};

#[derive(Debug, Parser)]
#[command(name = "token-lease", about = "Time-bounded token leases over local sockets")]
struct Cli {
    /// Directory holding the channel sockets.
    #[arg(long, global = true)]
    socket_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the lease server until a client asks it to close.
    Serve {
        /// Lease store file.
        #[arg(long, default_value = "db")]
        store: PathBuf,
        /// Worker pool capacity.
        #[arg(long, default_value_t = 12)]
        workers: usize,
        /// Lease lifetime in seconds.
        #[arg(long, default_value_t = 10)]
        ttl: i64,
    },
    /// Run one or more request sessions, then optionally close the server.
    Clients(ClientsArgs),
    /// Ask the server to shut down.
    Close,
}

#[derive(Debug, Args)]
struct ClientsArgs {
    /// Concurrent sessions to run.
    #[arg(long, default_value_t = 6)]
    count: u8,
    /// Reply port of the first session; the rest count up from it.
    #[arg(long, default_value_t = 100)]
    first_port: u8,
    /// Requests per session.
    #[arg(long, default_value_t = 20)]
    runs: usize,
    /// Highest token requested.
    #[arg(long, default_value_t = 20)]
    max_token: u16,
    /// Upper bound of the pause before each request, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    max_wait_ms: u64,
    /// Give up on a reply after this many milliseconds.
    #[arg(long)]
    reply_timeout_ms: Option<u64>,
    /// Send CLOSE once every session has finished.
    #[arg(long)]
    close: bool,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut transport_config = TransportConfig::default();
    if let Some(dir) = cli.socket_dir {
        transport_config = transport_config.with_socket_dir(dir);
    }
    let transport: Arc<dyn Transport> = Arc::new(UnixDatagramTransport::new(transport_config));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Command::Serve {
            store,
            workers,
            ttl,
        } => {
            let config = ServerConfig::default()
                .with_store_path(store)
                .with_workers(workers)
                .with_lease_ttl(ttl);
            LeaseServer::open(config, transport, clock).await?.run().await?;
        }
        Command::Clients(args) => run_clients(args, transport, clock).await?,
        Command::Close => {
            send_close(
                transport.as_ref(),
                clock.as_ref(),
                &ClientConfig::default(),
                std::process::id(),
            )
            .await?;
        }
    }
    Ok(())
}

async fn run_clients(
    args: ClientsArgs,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
) -> Result<()> {
    let mut config = ClientConfig::default()
        .with_runs(args.runs)
        .with_max_token(args.max_token)
        .with_wait(Duration::from_secs(0), Duration::from_millis(args.max_wait_ms));
    if let Some(ms) = args.reply_timeout_ms {
        config = config.with_reply_timeout(Duration::from_millis(ms));
    }

    // Sessions share this process, so each needs its own requester id.
    let pid = std::process::id();
    let first_port = args.first_port;
    let sessions = (0..args.count).map(|i| {
        let transport = transport.clone();
        let clock = clock.clone();
        let config = config.clone();
        async move {
            let requester = (pid << 8) | u32::from(i);
            let port = first_port.wrapping_add(i);
            let client = LeaseClient::connect(transport, clock, config, requester, port).await?;
            ClientSession::new(client).run().await
        }
    });
    let reports = try_join_all(sessions).await?;
    for report in &reports {
        tracing::info!(
            granted = report.granted,
            rejected = report.rejected,
            unknown = report.unknown,
            "session finished"
        );
    }

    if args.close {
        send_close(transport.as_ref(), clock.as_ref(), &config, pid).await?;
    }
    Ok(())
}

//! CLI command implementations

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use piecemeal_core::PiecemealError;
use piecemeal_core::config::PiecemealConfig;
use piecemeal_core::torrent::{
    Bitfield, MetaData, PeerId, PeerMessage, PeerMessageEvent, PeerPool, SessionContext,
    TorrentCreator, TorrentError, accept_loop, connect_peer,
};
use tokio::fs;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Hash a file into a metadata document
    Create {
        /// File to share
        file: PathBuf,
        /// Piece length in bytes
        #[arg(long)]
        piece_length: Option<u32>,
        /// Where to write the document (defaults to `<file>.torrent`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Accept peers for a metadata document and advertise every piece
    Serve {
        /// Metadata document to serve
        metadata: PathBuf,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Connect to one peer and log what it sends
    Dial {
        /// Metadata document shared with the peer
        metadata: PathBuf,
        /// Peer address
        addr: SocketAddr,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that failed, with a user facing summary
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let config = PiecemealConfig::from_env();
    match command {
        Commands::Create {
            file,
            piece_length,
            output,
        } => create(&config, file, piece_length, output).await,
        Commands::Serve { metadata, port } => serve(config, &metadata, port).await,
        Commands::Dial { metadata, addr } => dial(config, &metadata, addr).await,
    }
}

fn describe(error: TorrentError) -> anyhow::Error {
    let error = PiecemealError::from(error);
    let message = error.user_message();
    anyhow::Error::new(error).context(message)
}

async fn load_metadata(path: &Path) -> anyhow::Result<MetaData> {
    let data = fs::read(path)
        .await
        .with_context(|| format!("Reading {}", path.display()))?;
    MetaData::from_bencode(&data).map_err(describe)
}

async fn create(
    config: &PiecemealConfig,
    file: PathBuf,
    piece_length: Option<u32>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let creator = TorrentCreator::with_piece_length(
        piece_length.unwrap_or(config.torrent.default_piece_length),
    );
    let metadata = creator.create_from_file(&file).await.map_err(describe)?;

    let output = output.unwrap_or_else(|| {
        let mut path = file.into_os_string();
        path.push(".torrent");
        PathBuf::from(path)
    });
    fs::write(&output, metadata.to_bencode())
        .await
        .with_context(|| format!("Writing {}", output.display()))?;

    println!("Info hash: {}", metadata.info_hash());
    println!(
        "Pieces:    {} x {} bytes ({} bytes total)",
        metadata.piece_count(),
        metadata.piece_length(),
        metadata.total_size()
    );
    println!("Written:   {}", output.display());
    Ok(())
}

fn session_context(
    config: &PiecemealConfig,
    metadata: &MetaData,
) -> (SessionContext, mpsc::Receiver<PeerMessageEvent>) {
    let (events_tx, events_rx) = mpsc::channel(64);
    let context = SessionContext::new(
        Arc::new(PeerPool::new()),
        metadata.info_hash(),
        config.torrent.generate_peer_id(),
        metadata.piece_count(),
        config.network.clone(),
    )
    .with_events(events_tx);
    (context, events_rx)
}

async fn serve(config: PiecemealConfig, path: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let metadata = load_metadata(path).await?;
    let (context, mut events) = session_context(&config, &metadata);
    let port = port.unwrap_or(config.network.listen_port);

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .with_context(|| format!("Binding port {port}"))?;
    tracing::info!(
        "Serving {} ({}) on {}",
        metadata.name(),
        metadata.info_hash(),
        listener.local_addr()?
    );

    let pool = context.pool.clone();
    let piece_count = metadata.piece_count();
    let announce = move |peer_id: PeerId| {
        let pool = pool.clone();
        tokio::spawn(async move {
            let bitfield = PeerMessage::Bitfield {
                bitfield: Bitfield::full(piece_count).to_bytes(),
            };
            for message in [bitfield, PeerMessage::Unchoke] {
                if let Err(e) = pool.send_message(&peer_id, Some(&message)).await {
                    tracing::warn!("Could not greet {}: {}", peer_id, e);
                    return;
                }
            }
        });
    };

    let pool = context.pool.clone();
    let accepting = tokio::spawn(accept_loop(listener, context, announce));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    accepting.abort();
    let closed = pool.shutdown().await;
    tracing::info!("Closed {} peer connections", closed);
    Ok(())
}

async fn dial(config: PiecemealConfig, path: &Path, addr: SocketAddr) -> anyhow::Result<()> {
    let metadata = load_metadata(path).await?;
    let (context, mut events) = session_context(&config, &metadata);

    let (peer_id, session) = connect_peer(&context, addr).await.map_err(describe)?;
    tracing::info!("Connected to {} at {}", peer_id, addr);

    context
        .pool
        .send_message(&peer_id, Some(&PeerMessage::Interested))
        .await
        .map_err(describe)?;

    // The session holds its own sender clone; drop ours so the channel ends with it
    drop(context);
    while let Some(event) = events.recv().await {
        log_event(&event);
    }

    let reason = session.await?;
    tracing::info!("Connection to {} closed: {}", peer_id, reason);
    Ok(())
}

fn log_event(event: &PeerMessageEvent) {
    match &event.message {
        PeerMessage::Bitfield { bitfield } => tracing::info!(
            "{} has {} pieces",
            event.peer_id,
            bitfield.iter().map(|byte| byte.count_ones()).sum::<u32>()
        ),
        PeerMessage::Piece {
            piece_index,
            offset,
            data,
        } => tracing::info!(
            "{} sent {} bytes of piece {} at offset {}",
            event.peer_id,
            data.len(),
            piece_index,
            offset
        ),
        message => tracing::info!("{} sent {:?}", event.peer_id, message),
    }
}

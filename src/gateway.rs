//! The accept loop: one task per socket, a timer task for queue draining,
//! and the pass-through splice for already-verified clients.

use crate::{
    admission::AdmissionControl,
    assets::Assets,
    blacklist::Blacklist,
    config::{Config, Validators},
    event::{EventSink, LogSink},
    session::{Session, SessionOutcome},
    verified::{Persistence, VerifiedStore},
};
use anyhow::Context;
use std::{
    net::SocketAddr,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    task,
};

/// Cadence of the queue-drain / attack-window tick.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

pub struct Gateway {
    config: Arc<Config>,
    validators: Arc<Validators>,
    assets: Arc<Assets>,
    control: Arc<AdmissionControl>,
    sink: Arc<dyn EventSink>,
}

impl Gateway {
    /// Wires the pipeline together. Precomputed assets are built here,
    /// once.
    pub fn new(config: Config, persistence: Arc<dyn Persistence>) -> anyhow::Result<Self> {
        let attack_mode = Arc::new(AtomicBool::new(false));
        let sink: Arc<dyn EventSink> = Arc::new(LogSink::new(
            Arc::clone(&attack_mode),
            config.log_connections,
            config.log_during_attack,
        ));
        Self::with_sink(config, persistence, sink, attack_mode)
    }

    /// Same as [`Gateway::new`] with a caller-provided event sink.
    pub fn with_sink(
        config: Config,
        persistence: Arc<dyn Persistence>,
        sink: Arc<dyn EventSink>,
        attack_mode: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let validators = Arc::new(config.validators().context("invalid validator regex")?);
        let assets = Arc::new(Assets::prepare(&config).context("failed to prepare assets")?);

        let verified = Arc::new(VerifiedStore::new(
            config.max_verified_entries,
            config.verified_ttl(),
            persistence,
        ));
        let restored = verified.restore().context("failed to load verified set")?;
        if restored > 0 {
            tracing::info!(restored, "restored verified entries");
        }

        let blacklist = Arc::new(Blacklist::new(config.blacklist_ttl()));
        let control = Arc::new(AdmissionControl::new(
            config.clone(),
            verified,
            blacklist,
            Arc::clone(&sink),
            attack_mode,
        ));

        Ok(Self {
            config: Arc::new(config),
            validators,
            assets,
            control,
            sink,
        })
    }

    pub fn control(&self) -> Arc<AdmissionControl> {
        Arc::clone(&self.control)
    }

    /// Accepts connections until the listener fails. Call
    /// [`Gateway::shutdown`] to drain the queue when tearing down.
    pub async fn run(&self, listener: TcpListener) -> anyhow::Result<()> {
        let ticker = {
            let control = Arc::clone(&self.control);
            task::spawn(async move {
                let mut interval = tokio::time::interval(TICK_INTERVAL);
                loop {
                    interval.tick().await;
                    control.tick();
                }
            })
        };

        let result = self.accept_loop(&listener).await;
        ticker.abort();
        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await.context("listener closed")?;
            stream.set_nodelay(true).ok();
            self.spawn_connection(stream, peer);
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let config = Arc::clone(&self.config);
        let validators = Arc::clone(&self.validators);
        let assets = Arc::clone(&self.assets);
        let control = Arc::clone(&self.control);
        let sink = Arc::clone(&self.sink);

        task::spawn(async move {
            let _guard = control.track_connection(peer.ip());
            let backend = config.backend_address;
            let session = Session::new(
                stream,
                peer.ip(),
                config,
                validators,
                assets,
                control,
                sink,
            );
            match session.run().await {
                Ok(SessionOutcome::Verified { username, .. }) => {
                    tracing::debug!(%peer, username, "verified, told to reconnect");
                }
                Ok(SessionOutcome::PassThrough {
                    stream,
                    replay,
                    username,
                }) => {
                    if let Err(error) = splice_to_backend(stream, replay, backend).await {
                        tracing::debug!(%peer, username, "pass-through ended: {error:#}");
                    }
                }
                Ok(SessionOutcome::Rejected(reason)) => {
                    tracing::trace!(%peer, reason = reason.as_ref(), "rejected");
                }
                Ok(SessionOutcome::Status) => {}
                Err(error) => {
                    tracing::trace!(%peer, "verification failed: {error}");
                }
            }
        });
    }

    /// Drains the queue, rejecting pending admissions.
    pub fn shutdown(&self) {
        self.control.shutdown();
    }
}

/// Replays the consumed handshake/login bytes to the backend and splices
/// the two sockets until either side closes.
async fn splice_to_backend(
    mut client: TcpStream,
    replay: Vec<u8>,
    backend: SocketAddr,
) -> anyhow::Result<()> {
    let mut server = TcpStream::connect(backend)
        .await
        .context("backend unreachable")?;
    server.set_nodelay(true).ok();
    server.write_all(&replay).await?;
    tokio::io::copy_bidirectional(&mut client, &mut server).await?;
    Ok(())
}

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::select;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use utmatch::lobby::{BeaconConnector, BeaconState, LobbyBeacon, LobbyTarget};
use utmatch::protocol::{Connection, FrameError, LobbyCommand, LobbyMessage};

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSED: u8 = 2;

/// Spawns lobby connections onto a tokio runtime.
pub struct TcpBeaconConnector {
    handle: Handle,
}

impl TcpBeaconConnector {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl BeaconConnector for TcpBeaconConnector {
    fn connect(&mut self, target: &LobbyTarget) -> Box<dyn LobbyBeacon> {
        Box::new(TcpLobbyBeacon::spawn(&self.handle, target.clone()))
    }
}

/// A lobby connection running on its own task. The game loop only ever
/// touches the shared state flag and the two channels.
pub struct TcpLobbyBeacon {
    state: Arc<AtomicU8>,
    outgoing: UnboundedSender<LobbyMessage>,
    incoming: UnboundedReceiver<LobbyCommand>,
    task: JoinHandle<()>,
}

impl TcpLobbyBeacon {
    pub fn spawn(handle: &Handle, target: LobbyTarget) -> Self {
        let state = Arc::new(AtomicU8::new(CONNECTING));
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming) = mpsc::unbounded_channel();

        let task_state = state.clone();
        let task = handle.spawn(async move {
            if let Err(e) = run(target, &task_state, outgoing_rx, incoming_tx).await {
                log::error!("Lobby beacon closed with an error\n{e:?}");
            }
            task_state.store(CLOSED, Ordering::Release);
        });

        Self {
            state,
            outgoing,
            incoming,
            task,
        }
    }
}

async fn run(
    target: LobbyTarget,
    state: &AtomicU8,
    mut outgoing: UnboundedReceiver<LobbyMessage>,
    incoming: UnboundedSender<LobbyCommand>,
) -> Result<(), FrameError> {
    let socket = TcpStream::connect((target.address.as_str(), target.port)).await?;
    let mut connection = Connection::new(socket);
    connection
        .write_frame(&LobbyMessage::InstanceHello {
            instance_id: target.instance_id,
            server_guid: target.server_guid,
            hub_key: target.hub_key,
        })
        .await?;
    state.store(OPEN, Ordering::Release);
    log::info!(
        "Lobby beacon for instance {:#X} connected to {}:{}",
        target.instance_id,
        target.address,
        target.port
    );

    loop {
        select! {
            m = outgoing.recv() => {
                match m {
                    Some(m) => connection.write_frame(&m).await?,
                    // The game mode dropped the beacon
                    None => return Ok(()),
                }
            }
            command = connection.read_frame::<LobbyCommand>() => {
                match command? {
                    Some(command) => {
                        log::debug!("Received lobby command\nCommand: {command:?}");
                        if incoming.send(command).is_err() {
                            return Ok(());
                        }
                    }
                    None => {
                        log::info!("Lobby closed the beacon connection");
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl LobbyBeacon for TcpLobbyBeacon {
    fn connection_state(&self) -> BeaconState {
        match self.state.load(Ordering::Acquire) {
            CONNECTING => BeaconState::Connecting,
            OPEN => BeaconState::Open,
            _ => BeaconState::Closed,
        }
    }

    fn send(&mut self, message: LobbyMessage) {
        if self.outgoing.send(message).is_err() {
            log::warn!("Dropping lobby message, beacon is closed");
        }
    }

    fn poll_commands(&mut self) -> Vec<LobbyCommand> {
        let mut commands = Vec::new();
        loop {
            match self.incoming.try_recv() {
                Ok(command) => commands.push(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        commands
    }
}

impl Drop for TcpLobbyBeacon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

//! The single context that drives a [TransactionManager]: a tokio task that processes commands
//!  from the application, incoming datagrams and timer expirations one at a time. This is what
//!  allows the transaction layer to do without any locking, and it guarantees that a
//!  transaction's retransmissions are strictly ordered.
//!
//! Application code interacts with the task through a cloneable [EngineHandle]. The task
//!  terminates when all handles are dropped, clearing all open transactions.

use std::sync::Arc;
use bytes::Bytes;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use crate::config::TransactionConfig;
use crate::endpoint::Endpoint;
use crate::error::TransactionError;
use crate::header::{self, MessageType};
use crate::manager::TransactionManager;
use crate::observe::ObserverRegistry;
use crate::timer::tokio_timer::{TimerExpirations, TokioTimerService};
use crate::transaction::TransactionHandle;
use crate::transport::Transport;
use crate::util::random::RngRandom;

const COMMAND_QUEUE_SIZE: usize = 1024;

/// How a confirmable message ended
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TransactionOutcome {
    /// the complete reply datagram (ACK or RST)
    Reply(Bytes),
    /// all retransmissions went unanswered
    TimedOut,
}

enum EngineCommand {
    CreateTransaction {
        message_id: u16,
        endpoint: Endpoint,
        reply: oneshot::Sender<Result<TransactionHandle, TransactionError>>,
    },
    Send {
        handle: TransactionHandle,
        packet: Bytes,
        outcome: oneshot::Sender<TransactionOutcome>,
        reply: oneshot::Sender<Result<(), TransactionError>>,
    },
    ClearOnAck {
        message_id: u16,
        reply: oneshot::Sender<bool>,
    },
    FindByMessageId {
        message_id: u16,
        reply: oneshot::Sender<Option<TransactionHandle>>,
    },
    OpenTransactions {
        reply: oneshot::Sender<usize>,
    },
    Datagram {
        from: Endpoint,
        datagram: Bytes,
    },
}

#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T, TransactionError> {
        let (send, recv) = oneshot::channel();
        self.commands.send(command(send)).await
            .map_err(|_| TransactionError::EngineStopped)?;
        recv.await
            .map_err(|_| TransactionError::EngineStopped)
    }

    pub async fn create_transaction(&self, message_id: u16, endpoint: Endpoint) -> Result<TransactionHandle, TransactionError> {
        self.request(|reply| EngineCommand::CreateTransaction { message_id, endpoint, reply }).await?
    }

    /// Stores the packet in the transaction and sends it. The returned receiver yields the
    ///  outcome of a confirmable message; for a non-confirmable message (or a transaction that
    ///  is cleared without reply) it is closed without a value.
    ///
    /// A transaction is sent once: sending it again while it awaits its reply fails with
    ///  [TransactionError::AlreadySent].
    pub async fn send(&self, handle: TransactionHandle, packet: impl Into<Bytes>) -> Result<oneshot::Receiver<TransactionOutcome>, TransactionError> {
        let packet = packet.into();
        let (outcome, outcome_receiver) = oneshot::channel();
        self.request(|reply| EngineCommand::Send { handle, packet, outcome, reply }).await??;
        Ok(outcome_receiver)
    }

    /// stops retransmission of the transaction with the given message id, returning `false` if
    ///  there is no such transaction
    pub async fn clear_on_ack(&self, message_id: u16) -> Result<bool, TransactionError> {
        self.request(|reply| EngineCommand::ClearOnAck { message_id, reply }).await
    }

    pub async fn find_by_message_id(&self, message_id: u16) -> Result<Option<TransactionHandle>, TransactionError> {
        self.request(|reply| EngineCommand::FindByMessageId { message_id, reply }).await
    }

    pub async fn open_transactions(&self) -> Result<usize, TransactionError> {
        self.request(|reply| EngineCommand::OpenTransactions { reply }).await
    }

    /// Passes a received datagram to the engine. Acknowledgements and resets complete the
    ///  matching transaction; everything else is forwarded to the inbound channel (if any).
    pub async fn on_datagram(&self, from: Endpoint, datagram: Bytes) -> Result<(), TransactionError> {
        self.commands.send(EngineCommand::Datagram { from, datagram }).await
            .map_err(|_| TransactionError::EngineStopped)
    }
}

/// Starts an engine with tokio based timers and random jitter. Datagrams that are not replies
///  to open transactions are forwarded to `inbound`.
pub fn start(
    config: Arc<TransactionConfig>,
    transport: Box<dyn Transport>,
    observers: Box<dyn ObserverRegistry>,
    inbound: Option<mpsc::Sender<(Endpoint, Bytes)>>,
) -> anyhow::Result<(EngineHandle, JoinHandle<()>)> {
    let (timer, expirations) = TokioTimerService::new();
    let manager = TransactionManager::new(
        config,
        transport,
        Box::new(timer),
        observers,
        Box::new(RngRandom {}),
    )?;
    Ok(spawn_engine(manager, expirations, inbound))
}

/// Spawns the engine task for a manager that was set up with the [TokioTimerService]
///  belonging to `expirations`
pub fn spawn_engine(
    manager: TransactionManager,
    expirations: TimerExpirations,
    inbound: Option<mpsc::Sender<(Endpoint, Bytes)>>,
) -> (EngineHandle, JoinHandle<()>) {
    let (send, recv) = mpsc::channel(COMMAND_QUEUE_SIZE);
    let join_handle = tokio::spawn(run_engine(manager, recv, expirations, inbound));
    (EngineHandle { commands: send }, join_handle)
}

async fn run_engine(
    mut manager: TransactionManager,
    mut commands: mpsc::Receiver<EngineCommand>,
    mut expirations: TimerExpirations,
    inbound: Option<mpsc::Sender<(Endpoint, Bytes)>>,
) {
    info!("starting transaction engine with {} transaction slots", manager.capacity());

    loop {
        select! {
            command = commands.recv() => {
                match command {
                    Some(command) => on_command(&mut manager, command, inbound.as_ref()),
                    None => break,
                }
            }
            Some(expiration) = expirations.recv() => {
                manager.on_timer_expired(expiration);
            }
        }
    }

    info!("shutting down transaction engine, discarding {} open transactions", manager.open_transactions());
    manager.clear_all();
}

fn on_command(manager: &mut TransactionManager, command: EngineCommand, inbound: Option<&mpsc::Sender<(Endpoint, Bytes)>>) {
    match command {
        EngineCommand::CreateTransaction { message_id, endpoint, reply } => {
            let _ = reply.send(manager.create_transaction(message_id, endpoint));
        }
        EngineCommand::Send { handle, packet, outcome, reply } => {
            let result = prepare_send(manager, handle, &packet, outcome);
            let is_ok = result.is_ok();
            let _ = reply.send(result);
            if is_ok {
                manager.send(handle);
            }
        }
        EngineCommand::ClearOnAck { message_id, reply } => {
            let handle = manager.find_by_message_id(message_id);
            if let Some(handle) = handle {
                manager.clear_on_ack(handle);
            }
            let _ = reply.send(handle.is_some());
        }
        EngineCommand::FindByMessageId { message_id, reply } => {
            let _ = reply.send(manager.find_by_message_id(message_id));
        }
        EngineCommand::OpenTransactions { reply } => {
            let _ = reply.send(manager.open_transactions());
        }
        EngineCommand::Datagram { from, datagram } => {
            on_datagram(manager, from, datagram, inbound);
        }
    }
}

fn prepare_send(manager: &mut TransactionManager, handle: TransactionHandle, packet: &[u8], outcome: oneshot::Sender<TransactionOutcome>) -> Result<(), TransactionError> {
    let transaction = manager.transaction_mut(handle)
        .ok_or(TransactionError::StaleHandle)?;
    // replacing the packet would silently drop the pending outcome
    if transaction.is_timer_armed() {
        return Err(TransactionError::AlreadySent);
    }
    transaction.set_packet(packet)?;
    transaction.set_response_handler(move |_, reply| {
        let result = match reply {
            Some(reply) => TransactionOutcome::Reply(Bytes::copy_from_slice(reply)),
            None => TransactionOutcome::TimedOut,
        };
        if outcome.send(result).is_err() {
            trace!("receiver for transaction outcome was dropped");
        }
    });
    Ok(())
}

fn on_datagram(manager: &mut TransactionManager, from: Endpoint, datagram: Bytes, inbound: Option<&mpsc::Sender<(Endpoint, Bytes)>>) {
    let message_type = header::message_type(&datagram);
    let message_id = header::message_id(&datagram);

    if let (Some(MessageType::Acknowledgement | MessageType::Reset), Some(message_id)) = (message_type, message_id) {
        if !manager.complete_with_reply(message_id, &from, &datagram) {
            debug!("discarding {:?} with message id {} from {} without matching transaction", message_type, message_id, from);
        }
        return;
    }

    match inbound {
        Some(inbound) => {
            if inbound.try_send((from, datagram)).is_err() {
                warn!("inbound queue is full or closed - dropping datagram from {}", from);
            }
        }
        None => trace!("no inbound queue - dropping datagram from {}", from),
    }
}

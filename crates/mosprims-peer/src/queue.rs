//! Command queue state machine.
//!
//! [`CommandQueue`] holds everything about one channel's commands and nothing
//! about sockets or timers: the owner feeds it the current time, connection
//! state and received replies, and it says what to transmit and when to wake
//! up next. Every command's responder is completed exactly once, whichever way
//! the command ends.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use mosprims_model::{IncomingMessage, MessageId, MosMessage};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CommandError;
use crate::sequence::IdLease;

/// Completion side of a command.
pub type Responder = oneshot::Sender<Result<IncomingMessage, CommandError>>;

/// A command waiting in a queue.
#[derive(Debug)]
pub struct QueuedCommand {
    pub id: MessageId,
    pub message: MosMessage,
    pub enqueued_at: Instant,
    responder: Responder,
    /// Keeps `id` reserved in the shared sequence until the command is gone.
    lease: Option<IdLease>,
}

impl QueuedCommand {
    pub fn new(id: MessageId, message: MosMessage, enqueued_at: Instant, responder: Responder) -> Self {
        Self {
            id,
            message,
            enqueued_at,
            responder,
            lease: None,
        }
    }

    /// A command whose id is reserved by `lease`.
    pub fn leased(lease: IdLease, message: MosMessage, enqueued_at: Instant, responder: Responder) -> Self {
        let mut command = Self::new(lease.id(), message, enqueued_at, responder);
        command.lease = Some(lease);
        command
    }

    /// Complete the command. A caller that stopped waiting is not an error.
    pub fn complete(self, result: Result<IncomingMessage, CommandError>) {
        let _ = self.responder.send(result);
    }

    pub fn is_heartbeat(&self) -> bool {
        self.message.is_heartbeat()
    }
}

#[derive(Debug)]
struct InFlight {
    command: QueuedCommand,
    sent_at: Instant,
    deadline: Instant,
    retried: bool,
}

/// Something to write to the socket.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmit {
    pub id: MessageId,
    pub message: MosMessage,
    pub retry: bool,
}

/// Commands removed from a channel for re-homing on another connection.
#[derive(Debug, Default)]
pub struct HandedOverQueue {
    pub commands: Vec<QueuedCommand>,
}

impl HandedOverQueue {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Fail every command, e.g. when there is nowhere to put them.
    pub fn fail(self, error: CommandError) {
        for command in self.commands {
            command.complete(Err(error.clone()));
        }
    }
}

/// How a received message related to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Matched the outstanding command, which has been resolved.
    Resolved { id: MessageId },
    /// Matched the outstanding command, which was NACKed and has been failed.
    Rejected { id: MessageId },
    /// A buddy server deferred to the main server; the outstanding command is resolved.
    Deferred { id: MessageId },
    /// Carried an id other than the outstanding command's. A cleanup pass is scheduled.
    Mismatch { expected: MessageId, received: MessageId },
    /// Reply to a command that already timed out.
    Late { id: MessageId, after: Duration },
    /// Reply to nothing we know of.
    Unexpected { id: MessageId },
    /// A NACK without a message id.
    NackWithoutId { description: String },
    /// No message id and not a NACK.
    Unknown,
}

/// FIFO queue with a single command in flight.
#[derive(Debug)]
pub struct CommandQueue {
    queue: VecDeque<QueuedCommand>,
    in_flight: Option<InFlight>,
    lingering: Option<QueuedCommand>,
    timed_out: HashMap<MessageId, Instant>,
    cleanup_at: Option<Instant>,
    command_timeout: Duration,
    timed_out_retention: Duration,
    disposed: bool,
}

impl CommandQueue {
    pub fn new(command_timeout: Duration, timed_out_retention: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: None,
            lingering: None,
            timed_out: HashMap::new(),
            cleanup_at: None,
            command_timeout,
            timed_out_retention,
            disposed: false,
        }
    }

    /// Append a command at the tail.
    pub fn push(&mut self, command: QueuedCommand) {
        if self.disposed {
            command.complete(Err(CommandError::Disposed));
            return;
        }
        self.queue.push_back(command);
    }

    /// Append handed-over commands at the tail, keeping their order.
    pub fn requeue(&mut self, handed: HandedOverQueue) {
        for command in handed.commands {
            self.push(command);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn in_flight(&self) -> Option<MessageId> {
        self.in_flight.as_ref().map(|f| f.command.id)
    }

    pub fn lingering(&self) -> Option<MessageId> {
        self.lingering.as_ref().map(|c| c.id)
    }

    /// Next command to send, if the channel is free.
    ///
    /// While disconnected nothing is sent; instead queued commands that have
    /// waited longer than the command timeout are failed from the head.
    pub fn poll_transmit(&mut self, now: Instant, connected: bool) -> Option<Transmit> {
        if self.disposed || self.in_flight.is_some() {
            return None;
        }
        self.prune_timed_out(now);

        if !connected {
            self.expire_queued(now);
            return None;
        }

        let command = self.queue.pop_front()?;
        if let Some(previous) = self.lingering.take() {
            debug!(id = %previous.id, "dropping lingering command");
            previous.complete(Err(CommandError::Superseded));
        }
        let transmit = Transmit {
            id: command.id,
            message: command.message.clone(),
            retry: false,
        };
        self.in_flight = Some(InFlight {
            command,
            sent_at: now,
            deadline: now + self.command_timeout,
            retried: false,
        });
        Some(transmit)
    }

    /// Earliest instant at which [`on_timer`](Self::on_timer) has work to do.
    pub fn next_deadline(&self, connected: bool) -> Option<Instant> {
        let in_flight = self.in_flight.as_ref().map(|f| f.deadline);
        let queued = match (&self.in_flight, connected) {
            (None, false) => self.queue.front().map(|c| c.enqueued_at + self.command_timeout),
            _ => None,
        };
        [in_flight, queued, self.cleanup_at].into_iter().flatten().min()
    }

    /// Advance timers.
    ///
    /// Returns a retransmission when the in-flight command hit its first
    /// timeout and the channel is connected. On the second timeout the command
    /// fails and its id is remembered so a late reply is recognized.
    pub fn on_timer(&mut self, now: Instant, connected: bool) -> Option<Transmit> {
        if self.disposed {
            return None;
        }
        if self.cleanup_at.is_some_and(|at| at <= now) {
            self.cleanup_at = None;
            self.cleanup(now);
        }
        if !connected && self.in_flight.is_none() {
            self.expire_queued(now);
        }

        let expired = self.in_flight.as_ref().is_some_and(|f| f.deadline <= now);
        if !expired {
            return None;
        }
        let mut flight = self.in_flight.take()?;
        if !flight.retried {
            flight.retried = true;
            flight.deadline = now + self.command_timeout;
            let transmit = Transmit {
                id: flight.command.id,
                message: flight.command.message.clone(),
                retry: true,
            };
            self.in_flight = Some(flight);
            return connected.then_some(transmit);
        }

        let elapsed = now.saturating_duration_since(flight.sent_at);
        debug!(id = %flight.command.id, ?elapsed, "command timed out after retry");
        self.timed_out.insert(flight.command.id, now);
        flight.command.complete(Err(CommandError::SentTimeout { elapsed }));
        None
    }

    /// Correlate a received message with the outstanding command.
    pub fn on_reply(&mut self, now: Instant, message: IncomingMessage) -> ReplyOutcome {
        let Some(id) = message.message_id else {
            return self.on_reply_without_id(message);
        };

        if self.in_flight() == Some(id) {
            if let Some(flight) = self.in_flight.take() {
                return resolve(flight.command, message);
            }
        }
        if self.lingering() == Some(id) {
            if let Some(command) = self.lingering.take() {
                return resolve(command, message);
            }
        }
        if let Some(expected) = self.in_flight().or(self.lingering()) {
            self.cleanup_at.get_or_insert(now + self.command_timeout);
            return ReplyOutcome::Mismatch {
                expected,
                received: id,
            };
        }
        if let Some(at) = self.timed_out.remove(&id) {
            return ReplyOutcome::Late {
                id,
                after: now.saturating_duration_since(at),
            };
        }
        ReplyOutcome::Unexpected { id }
    }

    fn on_reply_without_id(&mut self, message: IncomingMessage) -> ReplyOutcome {
        let Some(ack) = message.ack().filter(|ack| ack.is_nack()) else {
            return ReplyOutcome::Unknown;
        };
        if ack.is_buddy_deferral() {
            if let Some(flight) = self.in_flight.take() {
                let id = flight.command.id;
                flight.command.complete(Ok(message));
                return ReplyOutcome::Deferred { id };
            }
        }
        ReplyOutcome::NackWithoutId {
            description: ack.description.unwrap_or_default(),
        }
    }

    /// Fail queued commands that have waited longer than the command timeout.
    pub fn cleanup(&mut self, now: Instant) {
        let timeout = self.command_timeout;
        let (expired, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.queue)
            .into_iter()
            .partition(|c| now.saturating_duration_since(c.enqueued_at) > timeout);
        self.queue = kept;
        for command in expired {
            let waited = now.saturating_duration_since(command.enqueued_at);
            command.complete(Err(CommandError::CleanupTimeout { waited }));
        }
    }

    /// Remove everything except heartbeats for transfer to another channel.
    ///
    /// Queued heartbeats stay. An in-flight heartbeat becomes the lingering
    /// command so its late reply is still matched; any other in-flight command
    /// goes first in the handed-over list and will be sent again by its new
    /// owner. A previous lingering command is superseded.
    pub fn hand_over(&mut self) -> HandedOverQueue {
        let mut commands = Vec::new();

        if let Some(flight) = self.in_flight.take() {
            if flight.command.is_heartbeat() {
                if let Some(previous) = self.lingering.replace(flight.command) {
                    previous.complete(Err(CommandError::Superseded));
                }
            } else {
                commands.push(flight.command);
                if let Some(previous) = self.lingering.take() {
                    previous.complete(Err(CommandError::Superseded));
                }
            }
        } else if let Some(previous) = self.lingering.take() {
            previous.complete(Err(CommandError::Superseded));
        }

        let (heartbeats, others): (VecDeque<_>, VecDeque<_>) =
            std::mem::take(&mut self.queue).into_iter().partition(QueuedCommand::is_heartbeat);
        self.queue = heartbeats;
        commands.extend(others);
        HandedOverQueue { commands }
    }

    /// Fail every outstanding command. Terminal.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.cleanup_at = None;
        if let Some(flight) = self.in_flight.take() {
            flight.command.complete(Err(CommandError::Disposed));
        }
        if let Some(command) = self.lingering.take() {
            command.complete(Err(CommandError::Disposed));
        }
        for command in self.queue.drain(..) {
            command.complete(Err(CommandError::Disposed));
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn expire_queued(&mut self, now: Instant) {
        while let Some(head) = self.queue.front() {
            let waited = now.saturating_duration_since(head.enqueued_at);
            if waited < self.command_timeout {
                break;
            }
            if let Some(command) = self.queue.pop_front() {
                debug!(id = %command.id, ?waited, "command timed out in queue");
                command.complete(Err(CommandError::QueueTimeout { waited }));
            }
        }
    }

    fn prune_timed_out(&mut self, now: Instant) {
        let retention = self.timed_out_retention;
        self.timed_out
            .retain(|_, at| now.saturating_duration_since(*at) < retention);
    }
}

fn resolve(command: QueuedCommand, message: IncomingMessage) -> ReplyOutcome {
    let id = command.id;
    match message.ack() {
        Some(ack) if ack.is_nack() && !ack.is_buddy_deferral() => {
            command.complete(Err(CommandError::Nack {
                description: ack.description.unwrap_or_default(),
            }));
            ReplyOutcome::Rejected { id }
        }
        _ => {
            command.complete(Ok(message));
            ReplyOutcome::Resolved { id }
        }
    }
}

#[cfg(test)]
mod tests {
    use mosprims_frame::{Document, XmlElement};
    use mosprims_model::{MosAck, PortType, BUDDY_DEFERRAL};
    use tokio::sync::oneshot::error::TryRecvError;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    type Reply = oneshot::Receiver<Result<IncomingMessage, CommandError>>;

    fn id(n: u32) -> MessageId {
        MessageId::new(n).unwrap()
    }

    fn command(n: u32, message: MosMessage, at: Instant) -> (QueuedCommand, Reply) {
        let (tx, rx) = oneshot::channel();
        (QueuedCommand::new(id(n), message, at, tx), rx)
    }

    fn custom(n: u32, at: Instant) -> (QueuedCommand, Reply) {
        let payload = XmlElement::new("roReq").with_child(XmlElement::text_element("roID", n.to_string()));
        command(
            n,
            MosMessage::Custom {
                port: PortType::Upper,
                payload,
            },
            at,
        )
    }

    fn heartbeat(n: u32, at: Instant) -> (QueuedCommand, Reply) {
        command(n, MosMessage::heartbeat(PortType::Lower), at)
    }

    fn reply(n: Option<u32>, payload: &str) -> IncomingMessage {
        let id = n.map(|n| format!("<messageID>{n}</messageID>")).unwrap_or_default();
        let raw = format!("<mos><mosID>m</mosID><ncsID>n</ncsID>{id}{payload}</mos>");
        IncomingMessage::decode(Document {
            root: XmlElement::parse(&raw).unwrap(),
            raw,
        })
        .unwrap()
    }

    fn queue() -> CommandQueue {
        CommandQueue::new(TIMEOUT, Duration::from_secs(3600))
    }

    #[test]
    fn test_single_in_flight_fifo() {
        let now = Instant::now();
        let mut q = queue();
        let (a, mut ra) = custom(1, now);
        let (b, mut rb) = custom(2, now);
        q.push(a);
        q.push(b);

        let first = q.poll_transmit(now, true).expect("head is sent");
        assert_eq!(first.id, id(1));
        assert!(!first.retry);
        assert!(q.poll_transmit(now, true).is_none(), "only one in flight");

        assert_eq!(
            q.on_reply(now, reply(Some(1), "<roAck/>")),
            ReplyOutcome::Resolved { id: id(1) }
        );
        assert!(ra.try_recv().unwrap().is_ok());
        assert_eq!(q.poll_transmit(now, true).unwrap().id, id(2));
        assert!(matches!(rb.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_retry_once_then_fail() {
        let start = Instant::now();
        let mut q = queue();
        let (a, mut ra) = custom(7, start);
        q.push(a);
        q.poll_transmit(start, true).unwrap();
        assert_eq!(q.next_deadline(true), Some(start + TIMEOUT));

        let retry = q.on_timer(start + TIMEOUT, true).expect("first expiry retries");
        assert_eq!(retry.id, id(7));
        assert!(retry.retry);
        assert!(matches!(ra.try_recv(), Err(TryRecvError::Empty)));

        assert!(q.on_timer(start + TIMEOUT * 2, true).is_none());
        match ra.try_recv().unwrap() {
            Err(CommandError::SentTimeout { elapsed }) => assert_eq!(elapsed, TIMEOUT * 2),
            other => panic!("expected sent timeout, got {other:?}"),
        }

        // The late reply is recognized and swallowed.
        assert!(matches!(
            q.on_reply(start + TIMEOUT * 3, reply(Some(7), "<roAck/>")),
            ReplyOutcome::Late { .. }
        ));
        assert_eq!(
            q.on_reply(start + TIMEOUT * 3, reply(Some(7), "<roAck/>")),
            ReplyOutcome::Unexpected { id: id(7) }
        );
    }

    #[test]
    fn test_reply_to_retry_resolves() {
        let start = Instant::now();
        let mut q = queue();
        let (a, mut ra) = custom(3, start);
        q.push(a);
        q.poll_transmit(start, true).unwrap();
        q.on_timer(start + TIMEOUT, true).unwrap();
        assert_eq!(
            q.on_reply(start + TIMEOUT, reply(Some(3), "<roAck/>")),
            ReplyOutcome::Resolved { id: id(3) }
        );
        assert!(ra.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_queue_timeout_while_disconnected() {
        let start = Instant::now();
        let mut q = queue();
        let (a, mut ra) = custom(1, start);
        let (b, mut rb) = custom(2, start + Duration::from_secs(3));
        q.push(a);
        q.push(b);

        assert!(q.poll_transmit(start, false).is_none());
        assert_eq!(q.next_deadline(false), Some(start + TIMEOUT));

        q.on_timer(start + TIMEOUT + Duration::from_millis(1), false);
        assert!(matches!(
            ra.try_recv().unwrap(),
            Err(CommandError::QueueTimeout { .. })
        ));
        assert!(matches!(rb.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_mismatch_schedules_cleanup() {
        let start = Instant::now();
        let mut q = queue();
        let (a, _ra) = custom(1, start);
        let (b, mut rb) = custom(2, start);
        q.push(a);
        q.push(b);
        q.poll_transmit(start, true).unwrap();

        let later = start + Duration::from_secs(1);
        assert_eq!(
            q.on_reply(later, reply(Some(99), "<roAck/>")),
            ReplyOutcome::Mismatch {
                expected: id(1),
                received: id(99)
            }
        );
        assert_eq!(q.next_deadline(true), Some(start + TIMEOUT));

        // Retry fires at start+TIMEOUT, cleanup at later+TIMEOUT fails the stale queued command.
        q.on_timer(start + TIMEOUT, true);
        q.on_timer(later + TIMEOUT, true);
        assert!(matches!(
            rb.try_recv().unwrap(),
            Err(CommandError::CleanupTimeout { .. })
        ));
        assert!(q.is_empty());
    }

    #[test]
    fn test_nack_rejects_but_buddy_deferral_resolves() {
        let now = Instant::now();
        let mut q = queue();
        let (a, mut ra) = custom(1, now);
        let (b, mut rb) = custom(2, now);
        q.push(a);
        q.push(b);

        q.poll_transmit(now, true).unwrap();
        let nack = MosAck::nack("roID unknown").to_xml().to_xml();
        assert_eq!(q.on_reply(now, reply(Some(1), &nack)), ReplyOutcome::Rejected { id: id(1) });
        assert_eq!(
            ra.try_recv().unwrap(),
            Err(CommandError::Nack {
                description: "roID unknown".into()
            })
        );

        q.poll_transmit(now, true).unwrap();
        let buddy = MosAck::nack(BUDDY_DEFERRAL).to_xml().to_xml();
        assert_eq!(q.on_reply(now, reply(None, &buddy)), ReplyOutcome::Deferred { id: id(2) });
        assert!(rb.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_messages_without_id() {
        let now = Instant::now();
        let mut q = queue();
        let nack = MosAck::nack("bad things").to_xml().to_xml();
        assert_eq!(
            q.on_reply(now, reply(None, &nack)),
            ReplyOutcome::NackWithoutId {
                description: "bad things".into()
            }
        );
        assert_eq!(q.on_reply(now, reply(None, "<heartbeat/>")), ReplyOutcome::Unknown);
    }

    #[test]
    fn test_hand_over_keeps_heartbeats_and_order() {
        let now = Instant::now();
        let mut q = queue();
        let (a, _ra) = custom(1, now);
        let (h, _rh) = heartbeat(2, now);
        let (b, _rb) = custom(3, now);
        let (c, _rc) = custom(4, now);
        q.push(a);
        q.push(h);
        q.push(b);
        q.push(c);
        q.poll_transmit(now, true).unwrap();

        let handed = q.hand_over();
        let ids: Vec<u32> = handed.commands.iter().map(|c| c.id.get()).collect();
        assert_eq!(ids, vec![1, 3, 4], "in-flight first, then queued order, no heartbeats");
        assert_eq!(q.len(), 1);
        assert_eq!(q.in_flight(), None);
        assert_eq!(q.poll_transmit(now, true).unwrap().id, id(2));
    }

    #[test]
    fn test_hand_over_lingers_in_flight_heartbeat() {
        let now = Instant::now();
        let mut q = queue();
        let (h, mut rh) = heartbeat(5, now);
        q.push(h);
        q.poll_transmit(now, true).unwrap();

        assert!(q.hand_over().is_empty());
        assert_eq!(q.lingering(), Some(id(5)));
        assert_eq!(q.on_reply(now, reply(Some(5), "<heartbeat/>")), ReplyOutcome::Resolved { id: id(5) });
        assert!(rh.try_recv().unwrap().is_ok());
        assert_eq!(q.lingering(), None);
    }

    #[test]
    fn test_second_hand_over_supersedes_lingering() {
        let now = Instant::now();
        let mut q = queue();
        let (h, mut rh) = heartbeat(5, now);
        q.push(h);
        q.poll_transmit(now, true).unwrap();
        q.hand_over();
        q.hand_over();
        assert_eq!(q.lingering(), None);
        assert_eq!(rh.try_recv().unwrap(), Err(CommandError::Superseded));
    }

    #[test]
    fn test_requeue_appends_in_order() {
        let now = Instant::now();
        let mut source = queue();
        let mut target = queue();
        let (a, _ra) = custom(1, now);
        let (b, _rb) = custom(2, now);
        let (c, _rc) = custom(3, now);
        source.push(a);
        source.push(b);
        target.push(c);

        target.requeue(source.hand_over());
        let sent: Vec<u32> = std::iter::from_fn(|| {
            let t = target.poll_transmit(now, true)?;
            target.on_reply(now, reply(Some(t.id.get()), "<roAck/>"));
            Some(t.id.get())
        })
        .collect();
        assert_eq!(sent, vec![3, 1, 2]);
    }

    #[test]
    fn test_dispose_fails_everything_once() {
        let now = Instant::now();
        let mut q = queue();
        let (a, mut ra) = custom(1, now);
        let (b, mut rb) = custom(2, now);
        q.push(a);
        q.push(b);
        q.poll_transmit(now, true).unwrap();
        q.dispose();

        assert_eq!(ra.try_recv().unwrap(), Err(CommandError::Disposed));
        assert_eq!(rb.try_recv().unwrap(), Err(CommandError::Disposed));
        assert!(q.poll_transmit(now, true).is_none());
        assert!(q.on_timer(now + TIMEOUT * 3, true).is_none());

        let (late, mut rl) = custom(3, now);
        q.push(late);
        assert_eq!(rl.try_recv().unwrap(), Err(CommandError::Disposed));
    }

    #[test]
    fn test_retry_while_disconnected_restarts_timer_without_sending() {
        let start = Instant::now();
        let mut q = queue();
        let (a, mut ra) = custom(1, start);
        q.push(a);
        q.poll_transmit(start, true).unwrap();
        assert!(q.on_timer(start + TIMEOUT, false).is_none());
        assert_eq!(q.next_deadline(false), Some(start + TIMEOUT * 2));
        q.on_timer(start + TIMEOUT * 2, false);
        assert!(matches!(
            ra.try_recv().unwrap(),
            Err(CommandError::SentTimeout { .. })
        ));
    }

    #[test]
    fn test_id_stays_reserved_until_the_command_resolves() {
        let now = Instant::now();
        let sequence = crate::MessageIdSequence::new();
        let (tx, _rx) = oneshot::channel();
        let leased = QueuedCommand::leased(sequence.lease(), MosMessage::ReqMachInfo, now, tx);
        let leased_id = leased.id;

        let mut from = queue();
        from.push(leased);
        let handed = from.hand_over();
        assert_eq!(sequence.outstanding(), 1);

        let mut to = queue();
        to.requeue(handed);
        let sent = to.poll_transmit(now, true).expect("handed-over command is sent");
        assert_eq!(sent.id, leased_id);
        assert_eq!(sequence.outstanding(), 1);

        to.on_reply(now, reply(Some(leased_id.get()), "<listMachInfo/>"));
        assert_eq!(sequence.outstanding(), 0);
    }
}

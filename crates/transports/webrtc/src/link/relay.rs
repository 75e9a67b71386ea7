//! Relay link
//!
//! A [`RelayLink`] owns two endpoints: A (initiator) carries the source
//! tracks and makes the offer, B (responder) answers and hands remote tracks
//! to a [`RenderSink`]. The two sides talk over an in-process signaling
//! channel. The offer is rewritten in transit, and trickled candidates are
//! buffered until their target has a remote description.
//!
//! Negotiation order:
//!
//! ```text
//! A.create_offer
//! B.set_remote(rewritten offer) ; B.create_answer
//! A.set_local(offer) ; A.set_remote(answer)
//! B.set_local(answer)
//! ```

use super::candidates::CandidateGate;
use super::pump::{run_pump, TransformSlot};
use super::state::LinkState;
use super::stats::{LinkCounters, LinkStats};
use crate::config::LinkConfig;
use crate::media::{MediaSource, RenderSink};
use crate::sdp::SessionDescription;
use crate::signaling::{InProcessSignaling, SignalingChannel, SignalingMessage};
use crate::substrate::{TrackEvent, TransportEndpoint, TransportSubstrate};
use crate::{Error, Result};
use framerelay_core::{Direction, FrameTransform, MediaKind};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Messages buffered per direction on the signaling channel
const SIGNALING_CAPACITY: usize = 64;

/// How long `close` waits to hand `bye` to the responder
const BYE_TIMEOUT: Duration = Duration::from_millis(100);

/// Background tasks of one link
///
/// Once shut down the set refuses new tasks, so nothing spawned while the
/// link closes outlives it.
#[derive(Clone, Default)]
struct TaskSet {
    inner: Arc<Mutex<TaskSetInner>>,
}

#[derive(Default)]
struct TaskSetInner {
    closed: bool,
    handles: Vec<JoinHandle<()>>,
}

impl TaskSet {
    /// Spawn `future` unless the set is shut down
    fn spawn<F>(&self, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.handles.push(tokio::spawn(future));
        true
    }

    /// Abort every task and refuse new ones
    fn shutdown(&self) -> usize {
        let handles = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.handles)
        };
        let count = handles.len();
        for handle in handles {
            handle.abort();
        }
        count
    }
}

/// A two-endpoint media link with its own signaling
pub struct RelayLink {
    config: LinkConfig,
    state: watch::Sender<LinkState>,
    initiator: Arc<dyn TransportEndpoint>,
    responder: Arc<dyn TransportEndpoint>,
    initiator_gate: Arc<CandidateGate>,
    responder_gate: Arc<CandidateGate>,
    sender_slot: TransformSlot,
    receiver_slot: TransformSlot,
    sink: Arc<dyn RenderSink>,
    counters: Arc<LinkCounters>,
    channel: Mutex<Option<Arc<InProcessSignaling>>>,
    tasks: TaskSet,
}

impl RelayLink {
    /// Create a link carrying every track of `source`
    ///
    /// Both endpoints are created and the source tracks are attached to A.
    /// Nothing is negotiated until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or an endpoint cannot
    /// be created. An unsupported preferred codec is only logged.
    #[instrument(skip_all, fields(link = %config.name))]
    pub async fn new(
        config: LinkConfig,
        substrate: &dyn TransportSubstrate,
        source: &MediaSource,
        sink: Arc<dyn RenderSink>,
    ) -> Result<Self> {
        config.validate()?;

        let initiator = substrate
            .create_endpoint(
                &format!("{}/A", config.name),
                config.initiator,
                &config.ice_servers,
                config.frame_channel_capacity,
            )
            .await?;
        let responder = match substrate
            .create_endpoint(
                &format!("{}/B", config.name),
                config.responder,
                &config.ice_servers,
                config.frame_channel_capacity,
            )
            .await
        {
            Ok(endpoint) => endpoint,
            Err(e) => {
                if let Err(close_err) = initiator.close().await {
                    warn!("Failed to close {}: {}", initiator.label(), close_err);
                }
                return Err(e);
            }
        };

        let (state, _) = watch::channel(LinkState::New);
        let link = Self {
            initiator_gate: Arc::new(CandidateGate::new(
                Arc::clone(&initiator),
                config.max_pending_candidates,
            )),
            responder_gate: Arc::new(CandidateGate::new(
                Arc::clone(&responder),
                config.max_pending_candidates,
            )),
            state,
            initiator,
            responder,
            sender_slot: TransformSlot::default(),
            receiver_slot: TransformSlot::default(),
            sink,
            counters: Arc::new(LinkCounters::default()),
            channel: Mutex::new(None),
            tasks: TaskSet::default(),
            config,
        };

        if let Err(e) = link.attach_source(substrate, source).await {
            link.close().await;
            return Err(e);
        }

        info!(
            "Created link {} ({} tracks from {})",
            link.config.name,
            source.tracks().len(),
            source.id()
        );
        Ok(link)
    }

    async fn attach_source(
        &self,
        substrate: &dyn TransportSubstrate,
        source: &MediaSource,
    ) -> Result<()> {
        for track in source.tracks() {
            self.initiator.add_track(track, source.id()).await?;
        }

        if source.track(MediaKind::Video).is_some() {
            if let Some(mime_type) = &self.config.preferred_video_codec {
                self.apply_codec_preference(substrate, mime_type);
            }
        }

        if self.initiator.config().enable_frame_interception {
            for (sender, kind) in self.initiator.senders() {
                let streams = self.initiator.sender_streams(sender)?;
                let label = format!("{}/A/{}/{}", self.config.name, sender, kind);
                self.spawn(run_pump(
                    self.sender_slot.clone(),
                    Direction::Forward,
                    label,
                    streams,
                    Arc::clone(&self.counters),
                ));
            }
        }

        Ok(())
    }

    /// Move the preferred video codec to the front of A's codec list
    fn apply_codec_preference(&self, substrate: &dyn TransportSubstrate, mime_type: &str) {
        let mut codecs = substrate.sender_capabilities(MediaKind::Video);
        let Some(index) = codecs
            .iter()
            .position(|c| c.mime_type.eq_ignore_ascii_case(mime_type))
        else {
            let err = Error::UnsupportedCodecPreference(mime_type.to_string());
            warn!(link = %self.config.name, "{}; keeping default codec order", err);
            return;
        };

        let preferred = codecs.remove(index);
        codecs.insert(0, preferred);
        match self.initiator.set_codec_preferences(MediaKind::Video, codecs) {
            Ok(()) => info!(link = %self.config.name, "Preferring {}", mime_type),
            Err(e) => warn!(link = %self.config.name, "Could not prefer {}: {}", mime_type, e),
        }
    }

    /// Link name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Link configuration
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Endpoint A
    pub fn initiator(&self) -> &Arc<dyn TransportEndpoint> {
        &self.initiator
    }

    /// Endpoint B
    pub fn responder(&self) -> &Arc<dyn TransportEndpoint> {
        &self.responder
    }

    /// Whether negotiation completed and the link is not closed
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Attach the forward transform to every sender on A
    ///
    /// Allowed before [`start`](Self::start) or once connected. Frames
    /// already in flight are not transformed retroactively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InterceptionDisabled`] if A was created without frame
    /// interception, [`Error::LinkClosed`] after close, and
    /// [`Error::InvalidState`] if a sender transform is already attached.
    pub fn attach_sender_transform(&self, transform: Arc<dyn FrameTransform>) -> Result<()> {
        self.ensure_open()?;
        if !self.initiator.config().enable_frame_interception {
            return Err(Error::InterceptionDisabled(format!(
                "link {}: initiator senders",
                self.config.name
            )));
        }
        let name = transform.name().to_string();
        self.sender_slot.install(transform)?;
        info!(link = %self.config.name, transform = %name, "Sender transform attached");
        Ok(())
    }

    /// Attach the inverse transform to every receiver on B
    ///
    /// # Errors
    ///
    /// Same as [`attach_sender_transform`](Self::attach_sender_transform),
    /// checked against B.
    pub fn attach_receiver_transform(&self, transform: Arc<dyn FrameTransform>) -> Result<()> {
        self.ensure_open()?;
        if !self.responder.config().enable_frame_interception {
            return Err(Error::InterceptionDisabled(format!(
                "link {}: responder receivers",
                self.config.name
            )));
        }
        let name = transform.name().to_string();
        self.receiver_slot.install(transform)?;
        info!(link = %self.config.name, transform = %name, "Receiver transform attached");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state().is_closed() {
            return Err(Error::LinkClosed(self.config.name.clone()));
        }
        Ok(())
    }

    /// Negotiate the link
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless the link is `New`
    /// - [`Error::LinkClosed`] if the link is or gets closed meanwhile
    /// - [`Error::Negotiation`] if any description step fails or times out;
    ///   the link is closed in that case
    #[instrument(skip(self), fields(link = %self.config.name))]
    pub async fn start(&self) -> Result<()> {
        if let Err(current) = self.advance(LinkState::Negotiating) {
            return Err(match current {
                LinkState::Closed => Error::LinkClosed(self.config.name.clone()),
                other => Error::InvalidState(format!(
                    "link {} cannot start while {}",
                    self.config.name, other
                )),
            });
        }
        info!("Negotiating link {}", self.config.name);

        let (initiator_end, responder_end) =
            InProcessSignaling::pair(&self.config.name, SIGNALING_CAPACITY);
        let initiator_end = Arc::new(initiator_end);
        let responder_end = Arc::new(responder_end);
        *self.channel.lock() = Some(Arc::clone(&initiator_end));

        let replies = self.spawn_agents(&initiator_end, &responder_end);

        match self.negotiate(&initiator_end, replies).await {
            Ok(()) => {
                if self.advance(LinkState::Connected).is_err() {
                    return Err(Error::LinkClosed(self.config.name.clone()));
                }
                info!("Link {} connected", self.config.name);
                Ok(())
            }
            Err(_) if self.state().is_closed() => {
                debug!("Link {} closed during negotiation", self.config.name);
                Err(Error::LinkClosed(self.config.name.clone()))
            }
            Err(e) => {
                error!("Negotiation of link {} failed: {}", self.config.name, e);
                self.close().await;
                Err(match e {
                    Error::Negotiation(_) => e,
                    other => Error::Negotiation(other.to_string()),
                })
            }
        }
    }

    /// Start the responder, candidate forwarders and the remote track handler
    ///
    /// Returns the stream of replies addressed to the initiator.
    fn spawn_agents(
        &self,
        initiator_end: &Arc<InProcessSignaling>,
        responder_end: &Arc<InProcessSignaling>,
    ) -> mpsc::Receiver<SignalingMessage> {
        self.spawn(run_responder(
            Arc::clone(&self.responder),
            Arc::clone(&self.responder_gate),
            Arc::clone(responder_end),
        ));

        if let Some(events) = self.initiator.take_candidate_events() {
            self.spawn(forward_candidates(
                events,
                Arc::clone(initiator_end),
                Arc::clone(&self.counters),
            ));
        }
        if let Some(events) = self.responder.take_candidate_events() {
            self.spawn(forward_candidates(
                events,
                Arc::clone(responder_end),
                Arc::clone(&self.counters),
            ));
        }

        if let Some(events) = self.responder.take_track_events() {
            self.spawn(handle_remote_tracks(
                events,
                RemoteTrackContext {
                    link: self.config.name.clone(),
                    endpoint: Arc::clone(&self.responder),
                    slot: self.receiver_slot.clone(),
                    sink: Arc::clone(&self.sink),
                    counters: Arc::clone(&self.counters),
                    tasks: self.tasks.clone(),
                },
            ));
        }

        let (reply_tx, reply_rx) = mpsc::channel(4);
        self.spawn(run_initiator_inbound(
            Arc::clone(initiator_end),
            Arc::clone(&self.initiator_gate),
            reply_tx,
        ));
        reply_rx
    }

    async fn negotiate(
        &self,
        channel: &InProcessSignaling,
        mut replies: mpsc::Receiver<SignalingMessage>,
    ) -> Result<()> {
        let offer = self
            .bounded("create offer", self.initiator.create_offer())
            .await?;
        let sent = offer.rewritten(&self.config.offer_rewrites);
        if sent.sdp != offer.sdp {
            debug!(rules = self.config.offer_rewrites.len(), "Offer rewritten in transit");
        }
        channel
            .send(SignalingMessage::Offer { description: sent })
            .await?;

        let answer = match self.bounded("answer", next_reply(&mut replies)).await? {
            SignalingMessage::Answer { description } => description,
            SignalingMessage::Failed { reason } => {
                return Err(Error::Negotiation(format!(
                    "responder rejected offer: {}",
                    reason
                )))
            }
            other => {
                return Err(Error::Negotiation(format!(
                    "expected answer, got {}",
                    other.kind()
                )))
            }
        };

        self.bounded(
            "apply local offer",
            self.initiator.set_local_description(offer),
        )
        .await?;
        self.bounded(
            "apply remote answer",
            self.initiator.set_remote_description(answer),
        )
        .await?;
        self.initiator_gate.open().await;

        channel.send(SignalingMessage::Commit).await?;
        match self.bounded("commit", next_reply(&mut replies)).await? {
            SignalingMessage::Committed => Ok(()),
            SignalingMessage::Failed { reason } => Err(Error::Negotiation(format!(
                "responder could not apply its answer: {}",
                reason
            ))),
            other => Err(Error::Negotiation(format!(
                "expected committed, got {}",
                other.kind()
            ))),
        }
    }

    async fn bounded<T>(&self, step: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.negotiation_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Negotiation(format!(
                "{} timed out after {} ms",
                step,
                timeout.as_millis()
            ))),
        }
    }

    /// Wait until both endpoints report a connected media path
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationTimeout`] if the path is not up in time and
    /// [`Error::LinkClosed`] if the link closes meanwhile.
    pub async fn wait_for_media(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.state().is_closed() {
                return Err(Error::LinkClosed(self.config.name.clone()));
            }
            if self.initiator.is_transport_connected() && self.responder.is_transport_connected()
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::OperationTimeout(format!(
                    "link {} media path not up after {:?}",
                    self.config.name, timeout
                )));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Close the link (idempotent)
    ///
    /// Buffered candidates are dropped, background tasks stop and both
    /// endpoints are released. A concurrent [`start`](Self::start) returns
    /// [`Error::LinkClosed`].
    #[instrument(skip(self), fields(link = %self.config.name))]
    pub async fn close(&self) {
        let previous = match self.advance(LinkState::Closed) {
            Ok(previous) => previous,
            Err(_) => {
                debug!("Link {} already closed", self.config.name);
                return;
            }
        };
        info!("Closing link {} (was {})", self.config.name, previous);

        let dropped = self.initiator_gate.close().await + self.responder_gate.close().await;
        if dropped > 0 {
            debug!(candidates = dropped, "Dropped buffered candidates");
        }

        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            match tokio::time::timeout(BYE_TIMEOUT, channel.send(SignalingMessage::Bye)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Bye not delivered: {}", e),
                Err(_) => debug!("Bye not delivered within {:?}", BYE_TIMEOUT),
            }
        }

        let aborted = self.tasks.shutdown();
        debug!(tasks = aborted, "Background tasks stopped");

        if let Err(e) = self.initiator.close().await {
            warn!("Failed to close {}: {}", self.initiator.label(), e);
        }
        if let Err(e) = self.responder.close().await {
            warn!("Failed to close {}: {}", self.responder.label(), e);
        }
    }

    /// Statistics snapshot
    pub fn stats(&self) -> LinkStats {
        LinkStats {
            name: self.config.name.clone(),
            role: self.config.role,
            state: self.state(),
            candidates_relayed: self.counters.candidates_relayed(),
            candidates: self.initiator_gate.stats() + self.responder_gate.stats(),
            remote_tracks: self.counters.remote_tracks(),
            passthrough_frames: self.counters.passthrough(),
            sender_transform: self.counters.transform_stats(Direction::Forward),
            receiver_transform: self.counters.transform_stats(Direction::Inverse),
        }
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.tasks.spawn(future) {
            debug!("Link {} closed, task not started", self.config.name);
        }
    }

    /// Move to `next` if the lifecycle allows it
    ///
    /// Returns the state left behind, or the current state when the move is
    /// not allowed.
    fn advance(&self, next: LinkState) -> std::result::Result<LinkState, LinkState> {
        let mut previous = next;
        let moved = self.state.send_if_modified(|state| {
            previous = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            Ok(previous)
        } else {
            Err(previous)
        }
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.tasks.shutdown();
    }
}

async fn next_reply(replies: &mut mpsc::Receiver<SignalingMessage>) -> Result<SignalingMessage> {
    replies
        .recv()
        .await
        .ok_or_else(|| Error::Signaling("signaling channel closed".to_string()))
}

/// B's side of the exchange
async fn run_responder(
    endpoint: Arc<dyn TransportEndpoint>,
    gate: Arc<CandidateGate>,
    channel: Arc<InProcessSignaling>,
) {
    let mut pending_answer: Option<SessionDescription> = None;

    while let Some(message) = channel.recv().await {
        let reply = match message {
            SignalingMessage::Offer { description } => {
                match answer_offer(endpoint.as_ref(), &gate, description).await {
                    Ok(answer) => {
                        pending_answer = Some(answer.clone());
                        SignalingMessage::Answer {
                            description: answer,
                        }
                    }
                    Err(e) => {
                        warn!(endpoint = %endpoint.label(), "Cannot answer offer: {}", e);
                        SignalingMessage::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            SignalingMessage::Commit => match pending_answer.take() {
                Some(answer) => match endpoint.set_local_description(answer).await {
                    Ok(()) => SignalingMessage::Committed,
                    Err(e) => SignalingMessage::Failed {
                        reason: e.to_string(),
                    },
                },
                None => SignalingMessage::Failed {
                    reason: "commit without a pending answer".to_string(),
                },
            },
            SignalingMessage::Candidate { candidate } => {
                gate.deliver(candidate).await;
                continue;
            }
            SignalingMessage::Bye => break,
            other => {
                warn!(endpoint = %endpoint.label(), "Ignoring unexpected {}", other.kind());
                continue;
            }
        };

        if channel.send(reply).await.is_err() {
            break;
        }
    }
    debug!(endpoint = %endpoint.label(), "Responder stopped");
}

async fn answer_offer(
    endpoint: &dyn TransportEndpoint,
    gate: &CandidateGate,
    offer: SessionDescription,
) -> Result<SessionDescription> {
    endpoint.set_remote_description(offer).await?;
    gate.open().await;
    endpoint.create_answer().await
}

/// A's inbound side: candidates go to the gate, everything else is a reply
async fn run_initiator_inbound(
    channel: Arc<InProcessSignaling>,
    gate: Arc<CandidateGate>,
    replies: mpsc::Sender<SignalingMessage>,
) {
    while let Some(message) = channel.recv().await {
        match message {
            SignalingMessage::Candidate { candidate } => {
                gate.deliver(candidate).await;
            }
            SignalingMessage::Bye => break,
            reply => {
                // negotiation is over once the receiver is gone
                if replies.send(reply).await.is_err() {
                    debug!(channel = %channel.label(), "Dropping late reply");
                }
            }
        }
    }
}

async fn forward_candidates(
    mut events: mpsc::Receiver<RTCIceCandidateInit>,
    channel: Arc<InProcessSignaling>,
    counters: Arc<LinkCounters>,
) {
    while let Some(candidate) = events.recv().await {
        if channel
            .send(SignalingMessage::Candidate { candidate })
            .await
            .is_err()
        {
            debug!(channel = %channel.label(), "Peer gone, no more candidates");
            break;
        }
        counters.record_candidate_relayed();
    }
}

struct RemoteTrackContext {
    link: String,
    endpoint: Arc<dyn TransportEndpoint>,
    slot: TransformSlot,
    sink: Arc<dyn RenderSink>,
    counters: Arc<LinkCounters>,
    tasks: TaskSet,
}

async fn handle_remote_tracks(mut events: mpsc::Receiver<TrackEvent>, ctx: RemoteTrackContext) {
    let intercepting = ctx.endpoint.config().enable_frame_interception;

    while let Some(TrackEvent { receiver, track }) = events.recv().await {
        ctx.counters.record_remote_track();
        info!(
            link = %ctx.link,
            kind = %track.kind(),
            mid = %track.mid(),
            "Remote track {} received",
            track.id()
        );

        if intercepting {
            match ctx.endpoint.receiver_streams(receiver) {
                Ok(streams) => {
                    let label = format!("{}/B/{}/{}", ctx.link, receiver, track.kind());
                    let pump = run_pump(
                        ctx.slot.clone(),
                        Direction::Inverse,
                        label,
                        streams,
                        Arc::clone(&ctx.counters),
                    );
                    if !ctx.tasks.spawn(pump) {
                        debug!(link = %ctx.link, "Link closing, no pump for {}", receiver);
                        break;
                    }
                }
                Err(e) => warn!(link = %ctx.link, "No frame access on {}: {}", receiver, e),
            }
        }

        ctx.sink.render(track);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_task_set_refuses_tasks_after_shutdown() {
        let tasks = TaskSet::default();

        let (mut tx, rx) = tokio::sync::oneshot::channel::<()>();
        assert!(tasks.spawn(async move {
            let _ = rx.await;
        }));
        assert_eq!(tasks.shutdown(), 1);
        // the aborted task drops its receiver
        assert!(tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .is_ok());

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        assert!(!tasks.spawn(async move {
            flag.store(true, Ordering::SeqCst);
        }));
        tokio::task::yield_now().await;
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(tasks.shutdown(), 0);
    }
}

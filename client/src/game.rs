//! Client-side lockstep state
//!
//! `ClientGame` replays the server's steps on a local copy of the simulation.
//! It never predicts or corrects: the state only changes by applying steps in
//! tick order or by loading a snapshot wholesale.

use crate::config::ClientConfig;
use crate::scheduler::{Admission, StepScheduler};
use log::{debug, info, warn};
use shared::{
    ClientMessage, DesyncAuditor, FormatError, PlayerSlot, RejectReason, Result, ServerMessage,
    Simulation, SnapshotEnvelope, StepLayout, StepPacket, Tick, PROTOCOL_VERSION,
};
use std::time::Duration;

/// Local captures kept for auditing against snapshots.
const AUDIT_HISTORY: usize = 32;

pub struct ClientGame<S: Simulation> {
    sim: S,
    scheduler: StepScheduler,
    auditor: DesyncAuditor,
    layout: Option<StepLayout>,
    slot: Option<PlayerSlot>,
    tick_rate: u16,
    rejected: Option<RejectReason>,
    snapshot_retry: Duration,
    /// Time since the outstanding snapshot request was sent.
    snapshot_wait: Option<Duration>,
    applied: u64,
}

impl<S: Simulation> ClientGame<S> {
    pub fn new(sim: S, config: &ClientConfig) -> Self {
        Self {
            sim,
            scheduler: StepScheduler::new(config.scheduler.clone(), Duration::from_millis(33)),
            auditor: DesyncAuditor::new(AUDIT_HISTORY),
            layout: None,
            slot: None,
            tick_rate: 0,
            rejected: None,
            snapshot_retry: config.snapshot_retry,
            snapshot_wait: None,
            applied: 0,
        }
    }

    pub fn hello() -> ClientMessage {
        ClientMessage::Hello {
            version: PROTOCOL_VERSION,
        }
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn slot(&self) -> Option<PlayerSlot> {
        self.slot
    }

    pub fn layout(&self) -> Option<&StepLayout> {
        self.layout.as_ref()
    }

    pub fn tick_rate(&self) -> u16 {
        self.tick_rate
    }

    pub fn rejected(&self) -> Option<RejectReason> {
        self.rejected
    }

    pub fn last_applied(&self) -> Option<Tick> {
        self.scheduler.last_applied()
    }

    /// Total steps applied since start.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_initialized()
    }

    pub fn awaiting_snapshot(&self) -> bool {
        self.snapshot_wait.is_some()
    }

    pub fn interpolation(&self) -> f32 {
        self.scheduler.interpolation()
    }

    pub fn scheduler(&self) -> &StepScheduler {
        &self.scheduler
    }

    pub fn auditor(&self) -> &DesyncAuditor {
        &self.auditor
    }

    /// Decodes one server message and handles it.
    ///
    /// Returns a message to send back, if any.
    pub fn handle_bytes(
        &mut self,
        bytes: &[u8],
    ) -> std::result::Result<Option<ClientMessage>, FormatError> {
        let message = ServerMessage::decode(bytes, self.layout.as_ref())?;
        Ok(self.handle_message(message))
    }

    pub fn handle_message(&mut self, message: ServerMessage) -> Option<ClientMessage> {
        match message {
            ServerMessage::SendId {
                slot,
                slots,
                max_actions,
                tick_rate,
            } => {
                if self.slot == Some(slot) && self.layout.is_some() {
                    // Repeat of an id we already have.
                    return None;
                }
                info!(
                    "Assigned slot {} of {} ({} Hz, {} rare actions per tick)",
                    slot, slots, tick_rate, max_actions
                );
                self.slot = Some(slot);
                self.layout = Some(StepLayout::new(slots as usize, max_actions as usize));
                self.tick_rate = tick_rate;
                self.scheduler
                    .set_tick_interval(Duration::from_nanos(1_000_000_000 / tick_rate.max(1) as u64));
                self.scheduler.clear();
                Some(self.request_snapshot())
            }
            ServerMessage::SendStep(packet) => self.push_step(packet),
            ServerMessage::SendSnapshot(envelope) => {
                if let Err(e) = self.load_snapshot(envelope) {
                    warn!("Failed to load snapshot: {}", e);
                }
                None
            }
            ServerMessage::Reject(reason) => {
                warn!("Server rejected the connection: {:?}", reason);
                self.rejected = Some(reason);
                None
            }
        }
    }

    fn push_step(&mut self, packet: StepPacket) -> Option<ClientMessage> {
        let tick = packet.tick();
        match self.scheduler.push(packet) {
            Admission::Buffered => None,
            Admission::Stale | Admission::Duplicate => {
                debug!("Discarding step {}", tick);
                None
            }
            Admission::Overflow if self.scheduler.is_initialized() && !self.awaiting_snapshot() => {
                warn!("Step {} overflows the buffer, requesting a snapshot", tick);
                Some(self.request_snapshot())
            }
            Admission::Overflow => None,
        }
    }

    fn request_snapshot(&mut self) -> ClientMessage {
        self.snapshot_wait = Some(Duration::ZERO);
        ClientMessage::RequestSnapshot
    }

    /// Replaces the local state with a snapshot and restarts the scheduler from its tick.
    pub fn load_snapshot(&mut self, envelope: SnapshotEnvelope) -> Result<()> {
        let tick = envelope.tick;
        if let Some(last) = self.scheduler.last_applied() {
            if tick < last {
                debug!("Ignoring snapshot of tick {} (already at {})", tick, last);
                return Ok(());
            }
        }

        self.sim.deserialize_state(&envelope.state)?;

        if self.scheduler.last_applied() == Some(tick) {
            // Same tick as ours: the loaded state should match what we had.
            let loaded = self.sim.capture_debug_state();
            let _ = self.auditor.check(tick, &loaded);
        }
        self.auditor.clear();
        self.auditor.record(tick, &self.sim);

        self.scheduler.reset_to(tick);
        self.snapshot_wait = None;
        info!(
            "Loaded snapshot of tick {} ({} bytes), {} steps buffered",
            tick,
            envelope.state.len(),
            self.scheduler.buffered()
        );
        Ok(())
    }

    /// Advances local time: applies due steps and handles snapshot retries.
    ///
    /// Returns a message to send, if any.
    pub fn update(&mut self, dt: Duration) -> Option<ClientMessage> {
        for packet in self.scheduler.advance(dt) {
            self.apply(&packet);
        }

        if let Some(waited) = self.snapshot_wait.as_mut() {
            *waited += dt;
            if *waited >= self.snapshot_retry {
                info!("No snapshot after {:?}, asking again", self.snapshot_retry);
                *waited = Duration::ZERO;
                return Some(ClientMessage::RequestSnapshot);
            }
            return None;
        }

        if self.scheduler.needs_resync() {
            return Some(self.request_snapshot());
        }
        None
    }

    fn apply(&mut self, packet: &StepPacket) {
        self.sim.apply_tick(packet.inputs(), packet.actions());
        self.auditor.record(packet.tick(), &self.sim);
        self.applied += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{DemoWorld, Input, RareAction};

    fn client() -> ClientGame<DemoWorld> {
        ClientGame::new(DemoWorld::new(), &ClientConfig::default())
    }

    fn send_id() -> ServerMessage {
        ServerMessage::SendId {
            slot: 1,
            slots: 2,
            max_actions: 4,
            tick_rate: 20,
        }
    }

    fn step(tick: Tick, actions: Vec<RareAction>) -> ServerMessage {
        ServerMessage::SendStep(
            StepPacket::new(tick, vec![Input::NEUTRAL; 2], actions, &StepLayout::new(2, 4)).unwrap(),
        )
    }

    fn snapshot_of(world: &DemoWorld, tick: Tick) -> ServerMessage {
        ServerMessage::SendSnapshot(SnapshotEnvelope::new(tick, world.serialize_state().unwrap()))
    }

    const INTERVAL: Duration = Duration::from_millis(50);

    #[test]
    fn test_send_id_requests_snapshot() {
        let mut game = client();
        assert_eq!(game.handle_message(send_id()), Some(ClientMessage::RequestSnapshot));
        assert_eq!(game.slot(), Some(1));
        assert_eq!(game.layout(), Some(&StepLayout::new(2, 4)));
        assert_eq!(game.scheduler().tick_interval(), INTERVAL);
        assert!(game.awaiting_snapshot());

        // A repeated SendId changes nothing.
        assert_eq!(game.handle_message(send_id()), None);
    }

    #[test]
    fn test_steps_before_snapshot_are_held() {
        let mut game = client();
        game.handle_message(send_id());
        game.handle_message(step(6, vec![RareAction::PlayerJoin(1)]));
        game.handle_message(step(7, Vec::new()));
        assert!(game.update(INTERVAL * 4).is_none());
        assert_eq!(game.applied(), 0);

        let mut server_world = DemoWorld::new();
        for _ in 0..5 {
            server_world.apply_tick(&[Input::NEUTRAL; 2], &[]);
        }
        game.handle_message(snapshot_of(&server_world, 5));
        assert!(!game.awaiting_snapshot());
        assert_eq!(game.last_applied(), Some(5));

        game.update(INTERVAL);
        game.update(INTERVAL);
        assert_eq!(game.last_applied(), Some(7));
        assert!(game.simulation().player_in_slot(1).is_some());
        assert_eq!(game.simulation().ticks(), 7);
    }

    #[test]
    fn test_snapshot_retry_after_timeout() {
        let config = ClientConfig {
            snapshot_retry: Duration::from_millis(100),
            ..ClientConfig::default()
        };
        let mut game = ClientGame::new(DemoWorld::new(), &config);
        game.handle_message(send_id());

        assert_eq!(game.update(Duration::from_millis(60)), None);
        assert_eq!(
            game.update(Duration::from_millis(60)),
            Some(ClientMessage::RequestSnapshot)
        );
        assert_eq!(game.update(Duration::from_millis(60)), None);
    }

    #[test]
    fn test_matching_snapshot_passes_audit() {
        let mut game = client();
        game.handle_message(send_id());
        game.handle_message(snapshot_of(&DemoWorld::new(), 0));
        game.handle_message(step(1, vec![RareAction::PlayerJoin(0)]));
        game.update(INTERVAL);
        assert_eq!(game.last_applied(), Some(1));

        let snapshot = snapshot_of(game.simulation(), 1);
        let copy = game.simulation().clone();
        game.handle_message(snapshot);
        assert_eq!(game.auditor().detected(), 0);
        assert_eq!(game.simulation(), &copy);
    }

    #[test]
    fn test_diverged_snapshot_is_reported_and_loaded() {
        let mut game = client();
        game.handle_message(send_id());
        game.handle_message(snapshot_of(&DemoWorld::new(), 0));
        game.handle_message(step(1, Vec::new()));
        game.update(INTERVAL);

        let mut other = DemoWorld::new();
        other.apply_tick(&[Input::NEUTRAL; 2], &[RareAction::PlayerJoin(0)]);
        game.handle_message(snapshot_of(&other, 1));

        assert_eq!(game.auditor().detected(), 1);
        assert_eq!(game.simulation(), &other);
    }

    #[test]
    fn test_old_snapshot_ignored() {
        let mut game = client();
        game.handle_message(send_id());
        game.handle_message(snapshot_of(&DemoWorld::new(), 3));
        game.handle_message(step(4, Vec::new()));
        game.update(INTERVAL);

        let mut stale = DemoWorld::new();
        stale.apply_tick(&[Input::NEUTRAL; 2], &[RareAction::PlayerJoin(0)]);
        game.handle_message(snapshot_of(&stale, 2));
        assert_eq!(game.last_applied(), Some(4));
        assert!(game.simulation().player_in_slot(0).is_none());
    }

    #[test]
    fn test_overflow_requests_resync_once() {
        let mut game = client();
        game.handle_message(send_id());
        game.handle_message(snapshot_of(&DemoWorld::new(), 0));

        assert_eq!(
            game.handle_message(step(100, Vec::new())),
            Some(ClientMessage::RequestSnapshot)
        );
        assert_eq!(game.handle_message(step(101, Vec::new())), None);
        assert!(game.awaiting_snapshot());
    }

    #[test]
    fn test_step_needs_layout() {
        let mut game = client();
        let bytes = ServerMessage::SendStep(
            StepPacket::new(1, vec![Input::NEUTRAL; 2], Vec::new(), &StepLayout::new(2, 4))
                .unwrap(),
        )
        .encode();
        assert_eq!(game.handle_bytes(&bytes), Err(FormatError::MissingLayout));

        game.handle_message(send_id());
        assert_eq!(game.handle_bytes(&bytes), Ok(None));
    }

    #[test]
    fn test_reject_is_recorded() {
        let mut game = client();
        game.handle_message(ServerMessage::Reject(RejectReason::ServerFull));
        assert_eq!(game.rejected(), Some(RejectReason::ServerFull));
    }
}

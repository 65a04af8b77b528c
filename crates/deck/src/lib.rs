//! Tandem deck: the swipe-card state machine.
//!
//! The platform clients express this as gesture callbacks and animated
//! values; here it is an explicit state machine with pure transitions.
//! The animation layer observes `phase`, `offset` and `exit` and
//! interpolates — it never owns a decision. Network calls (join,
//! best-effort swipe record) are the only suspension points.

#![forbid(unsafe_code)]

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::debug;

use tandem_api::{ClientApi, JoinRequest, SessionProvider, SwipeAction};
use tandem_core::gesture::{self, Direction, DragOffset, Overlay};
use tandem_core::{Candidate, Decision, RequestTier};

const STATUS_SENT: &str = "Join request sent.";
const STATUS_SUPERLIKE: &str = "Superlike sent.";
const STATUS_REJECT: &str = "Not interested.";
const STATUS_REWOUND: &str = "Rewound.";
const STATUS_NOTHING_TO_REWIND: &str = "Nothing to rewind.";
const STATUS_SIGN_IN: &str = "Sign in to continue.";
const STATUS_JOIN_FAILED: &str = "Unable to join.";
const STATUS_HOLD_ON: &str = "Hold on.";

/// Deck lifecycle. `Committing` covers both the in-flight network call
/// and the animate-out window that follows; `settle` ends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No candidate left (or none supplied). Terminal, rendered as an
    /// explicit empty state.
    Idle,
    Presenting,
    Dragging,
    Committing,
}

/// What a drag release asks of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Below threshold: the card springs back, nothing decided.
    Settled,
    /// Threshold crossed: commit in this direction.
    Commit(Decision),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Decision recorded; card is animating out, call `settle` when done.
    Committed(Direction),
    /// The remote call failed; card sprang back, status has the detail.
    SpringBack,
    /// Invalid in the current phase; nothing happened.
    Ignored,
}

/// One deck session over an immutable, ordered candidate sequence.
pub struct DeckState {
    candidates: Vec<Candidate>,
    cursor: usize,
    history: Vec<usize>,
    offset: DragOffset,
    media_index: usize,
    sent: FxHashSet<tandem_core::CandidateId>,
    phase: Phase,
    status: Option<String>,
    exit: Option<Direction>,
    card_width: f32,
    api: Arc<dyn ClientApi>,
    session: Arc<dyn SessionProvider>,
}

impl DeckState {
    pub fn new(
        candidates: Vec<Candidate>,
        card_width: f32,
        api: Arc<dyn ClientApi>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        let phase = if candidates.is_empty() { Phase::Idle } else { Phase::Presenting };
        Self {
            candidates,
            cursor: 0,
            history: Vec::new(),
            offset: DragOffset::ZERO,
            media_index: 0,
            sent: FxHashSet::default(),
            phase,
            status: None,
            exit: None,
            card_width,
            api,
            session,
        }
    }

    // ---- read side (render layer) ----

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current(&self) -> Option<&Candidate> {
        self.candidates.get(self.cursor)
    }

    /// Next cards for the stacked preview behind the active one.
    pub fn upcoming(&self, n: usize) -> &[Candidate] {
        let start = (self.cursor + 1).min(self.candidates.len());
        let end = (start + n).min(self.candidates.len());
        &self.candidates[start..end]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn offset(&self) -> DragOffset {
        self.offset
    }

    pub fn media_index(&self) -> usize {
        self.media_index
    }

    /// Direction the committed card is exiting in, while `Committing`.
    pub fn exit(&self) -> Option<Direction> {
        self.exit
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn overlay(&self) -> Option<Overlay> {
        if self.phase != Phase::Dragging {
            return None;
        }
        gesture::overlay(self.offset, self.card_width)
    }

    pub fn rotation_deg(&self) -> f32 {
        gesture::rotation_deg(self.offset)
    }

    pub fn progress_percent(&self) -> u8 {
        if self.candidates.is_empty() {
            return 0;
        }
        let pct = ((self.cursor + 1) * 100) / self.candidates.len();
        pct.min(100) as u8
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.candidates.len()
    }

    // ---- gesture transitions ----

    /// Pointer down on the active card. No-op mid-animation or when
    /// there is nothing to drag.
    pub fn begin_drag(&mut self) -> bool {
        if self.phase != Phase::Presenting {
            debug!(phase = ?self.phase, "drag ignored");
            self.status = Some(STATUS_HOLD_ON.to_string());
            return false;
        }
        self.phase = Phase::Dragging;
        true
    }

    /// Absolute displacement since pointer-down.
    pub fn update_drag(&mut self, delta: DragOffset) {
        if self.phase != Phase::Dragging {
            return;
        }
        self.offset = delta;
    }

    /// Pointer up. Below the threshold the card springs back and no
    /// decision is made; past it, the driver commits the returned
    /// decision.
    pub fn end_drag(&mut self) -> Release {
        if self.phase != Phase::Dragging {
            return Release::Settled;
        }
        match gesture::past_threshold(self.offset, self.card_width) {
            None => {
                self.offset = DragOffset::ZERO;
                self.phase = Phase::Presenting;
                Release::Settled
            }
            Some(Direction::Right) => Release::Commit(Decision::Accept),
            Some(Direction::Left) => Release::Commit(Decision::Reject),
        }
    }

    // ---- decisions ----

    pub async fn commit(&mut self, decision: Decision) -> CommitOutcome {
        self.commit_with_tier(decision, RequestTier::Like).await
    }

    /// Commit a decision for the current candidate. Accept performs the
    /// join round-trip (idempotent per candidate within the session);
    /// reject records a best-effort swipe and always advances. On
    /// remote failure the card springs back with the detail in
    /// `status` and cursor/history stay untouched.
    pub async fn commit_with_tier(&mut self, decision: Decision, tier: RequestTier) -> CommitOutcome {
        if !matches!(self.phase, Phase::Presenting | Phase::Dragging) {
            debug!(phase = ?self.phase, "commit ignored");
            return CommitOutcome::Ignored;
        }
        let Some(candidate) = self.current() else {
            return CommitOutcome::Ignored;
        };
        let id = candidate.id;
        self.phase = Phase::Committing;
        let direction = match decision {
            Decision::Accept => {
                if self.sent.contains(&id) {
                    debug!(%id, "join already sent; skipping network call");
                } else {
                    if self.session.bearer().is_none() {
                        return self.spring_back(STATUS_SIGN_IN.to_string());
                    }
                    let req = JoinRequest::with_tier(tier);
                    if let Err(e) = self.api.join(id, &req).await {
                        let detail = match e {
                            tandem_api::ApiError::Rejected(d) if !d.is_empty() => d,
                            other => {
                                debug!(%id, "join failed: {other}");
                                STATUS_JOIN_FAILED.to_string()
                            }
                        };
                        return self.spring_back(detail);
                    }
                    self.sent.insert(id);
                }
                // Best-effort like record, same semantics as the
                // reject path: a dropped record never blocks the card.
                if let Err(e) = self.api.record_swipe(id, SwipeAction::Like).await {
                    debug!(%id, "swipe record dropped: {e}");
                }
                self.status = Some(
                    match tier {
                        RequestTier::Like => STATUS_SENT,
                        RequestTier::Superlike => STATUS_SUPERLIKE,
                    }
                    .to_string(),
                );
                Direction::Right
            }
            Decision::Reject => {
                // Fire-and-forget: lost reject records are acceptable.
                if let Err(e) = self.api.record_swipe(id, SwipeAction::Pass).await {
                    debug!(%id, "swipe record dropped: {e}");
                }
                self.status = Some(STATUS_REJECT.to_string());
                Direction::Left
            }
        };
        self.exit = Some(direction);
        CommitOutcome::Committed(direction)
    }

    /// The animation layer reports the card has left the screen: the
    /// cursor advances and the committed position becomes undoable.
    pub fn settle(&mut self) {
        if self.phase != Phase::Committing {
            return;
        }
        self.history.push(self.cursor);
        self.cursor += 1;
        self.offset = DragOffset::ZERO;
        self.media_index = 0;
        self.exit = None;
        self.phase = if self.is_exhausted() { Phase::Idle } else { Phase::Presenting };
    }

    /// Client-view-only undo: moves the cursor back one committed step.
    /// The remote join/pass record is not retracted.
    pub fn rewind(&mut self) -> bool {
        if self.phase != Phase::Presenting || self.history.is_empty() {
            self.status = Some(STATUS_NOTHING_TO_REWIND.to_string());
            return false;
        }
        let previous = self.history.pop().unwrap_or(0);
        self.cursor = previous;
        self.offset = DragOffset::ZERO;
        self.media_index = 0;
        self.status = Some(STATUS_REWOUND.to_string());
        true
    }

    /// Step through the current candidate's media with wraparound.
    /// Cursor and history are untouched.
    pub fn cycle_media(&mut self, direction: Direction) {
        let count = self.current().map(|c| c.media.len()).unwrap_or(0);
        if count <= 1 {
            return;
        }
        self.media_index = match direction {
            Direction::Right => (self.media_index + 1) % count,
            Direction::Left => (self.media_index + count - 1) % count,
        };
    }

    fn spring_back(&mut self, status: String) -> CommitOutcome {
        self.offset = DragOffset::ZERO;
        self.phase = Phase::Presenting;
        self.status = Some(status);
        CommitOutcome::SpringBack
    }
}
